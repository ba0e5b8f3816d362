//! Move Oracle: an external engine consulted in bot mode.
//!
//! The oracle lives across a worker boundary. Requests go out as UCI text,
//! and every line the worker prints comes back as an [`OracleLine`] message
//! on the owning actor's mailbox, so replies are handled on the same event
//! loop as player input.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use actix::{Message, Recipient};
use chess::{MoveGen, Piece};
use log::{debug, info};

use crate::error::{OracleError, WireError};
use crate::game::engine::{CandidateMove, Position};

/// One line of output from the oracle worker.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct OracleLine(pub String);

pub trait MoveOracle {
    /// Starts a search for `notation`. The answer arrives later as an
    /// [`OracleLine`] starting with `bestmove`.
    fn search(&mut self, notation: &str, depth: u8) -> Result<(), OracleError>;

    fn shutdown(&mut self) {}
}

/// Interprets a worker line.
///
/// * `None`: not a `bestmove` line (handshake chatter, `info` output).
/// * `Some(Ok(None))`: the engine has no move (`(none)` / `0000`).
/// * `Some(Ok(Some(mv)))`: a move; promotion suffix kept when present.
pub fn parse_bestmove(line: &str) -> Option<Result<Option<CandidateMove>, WireError>> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("bestmove") {
        return None;
    }
    let result = match tokens.next() {
        None => Err(WireError::OracleReply {
            line: line.to_string(),
        }),
        Some("(none)") | Some("0000") => Ok(None),
        Some(mv) => CandidateMove::from_uci(mv).map(Some).map_err(WireError::from),
    };
    Some(result)
}

/// A UCI engine running as a child process.
pub struct UciOracle {
    child: Child,
    stdin: ChildStdin,
}

impl UciOracle {
    pub fn spawn(path: &Path, replies: Recipient<OracleLine>) -> Result<Self, OracleError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| OracleError::Spawn {
                path: path.display().to_string(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            OracleError::Io(std::io::Error::other("engine stdin unavailable"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            OracleError::Io(std::io::Error::other("engine stdout unavailable"))
        })?;

        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => replies.do_send(OracleLine(l)),
                    Err(_) => break,
                }
            }
            debug!("Oracle reader finished");
        });

        let mut oracle = Self { child, stdin };
        oracle.send("uci")?;
        oracle.send("isready")?;
        oracle.send("ucinewgame")?;
        info!("Spawned UCI oracle at {}", path.display());
        Ok(oracle)
    }

    fn send(&mut self, command: &str) -> Result<(), OracleError> {
        debug!("oracle <- {}", command);
        writeln!(self.stdin, "{}", command)?;
        self.stdin.flush()?;
        Ok(())
    }
}

impl MoveOracle for UciOracle {
    fn search(&mut self, notation: &str, depth: u8) -> Result<(), OracleError> {
        self.send(&format!("position fen {}", notation))?;
        self.send(&format!("go depth {}", depth))
    }

    fn shutdown(&mut self) {
        let _ = self.send("quit");
        if let Err(e) = self.child.kill() {
            debug!("Oracle already exited: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for UciOracle {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

/// Built-in stand-in used when no engine binary is configured: takes the
/// most valuable capture on offer, otherwise the first legal move.
pub struct FallbackOracle {
    replies: Recipient<OracleLine>,
}

impl FallbackOracle {
    pub fn new(replies: Recipient<OracleLine>) -> Self {
        Self { replies }
    }

    pub fn choose(position: &Position) -> Option<CandidateMove> {
        let board = position.board();
        let value = |piece: Option<Piece>| match piece {
            Some(Piece::Queen) => 9,
            Some(Piece::Rook) => 5,
            Some(Piece::Bishop) | Some(Piece::Knight) => 3,
            Some(Piece::Pawn) => 1,
            Some(Piece::King) | None => 0,
        };
        MoveGen::new_legal(board)
            .enumerate()
            .max_by_key(|(i, m)| {
                let promotes = m.get_promotion() == Some(Piece::Queen);
                (
                    value(board.piece_on(m.get_dest())) + if promotes { 8 } else { 0 },
                    std::cmp::Reverse(*i),
                )
            })
            .map(|(_, m)| CandidateMove::new(m.get_source(), m.get_dest(), m.get_promotion()))
    }
}

impl MoveOracle for FallbackOracle {
    fn search(&mut self, notation: &str, _depth: u8) -> Result<(), OracleError> {
        let position = Position::load(notation)?;
        let line = match Self::choose(&position) {
            Some(mv) => format!("bestmove {}", mv),
            None => "bestmove (none)".to_string(),
        };
        self.replies.do_send(OracleLine(line));
        Ok(())
    }
}
