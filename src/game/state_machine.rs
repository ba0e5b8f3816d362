//! Match State Machine.
//!
//! Owns the canonical [`Position`], the move history and the derived
//! [`Status`]. The position only ever changes through [`MatchStateMachine::apply`],
//! which validates against a scratch copy and commits atomically. Terminal
//! statuses absorb: once reached, every later move is rejected.

use std::fmt;

use chess::{Color, Square};
use log::{debug, info, warn};

use crate::game::engine::{CandidateMove, MoveDescriptor, MoveRecord, Position};
use crate::game::utils::color_to_string;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawReason {
    Agreement,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    InProgress,
    Check,
    Checkmate { winner: Color },
    Stalemate,
    Draw(DrawReason),
    Resigned { loser: Color },
    Timeout { loser: Color },
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Idle | Status::InProgress | Status::Check)
    }

    /// Winning colour, if the outcome has one.
    pub fn winner(&self) -> Option<Color> {
        match *self {
            Status::Checkmate { winner } => Some(winner),
            Status::Resigned { loser } | Status::Timeout { loser } => Some(!loser),
            _ => None,
        }
    }

    /// Short machine-readable tag used on the browser socket.
    pub fn tag(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::InProgress => "in_progress",
            Status::Check => "check",
            Status::Checkmate { .. } => "checkmate",
            Status::Stalemate => "stalemate",
            Status::Draw(_) => "draw",
            Status::Resigned { .. } => "resigned",
            Status::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "Waiting to start"),
            Status::InProgress => write!(f, "In progress"),
            Status::Check => write!(f, "Check"),
            Status::Checkmate { winner } => {
                write!(f, "Checkmate, {} wins", color_to_string(*winner))
            }
            Status::Stalemate => write!(f, "Stalemate"),
            Status::Draw(DrawReason::Agreement) => write!(f, "Draw by agreement"),
            Status::Draw(DrawReason::InsufficientMaterial) => {
                write!(f, "Draw by insufficient material")
            }
            Status::Draw(DrawReason::FiftyMoveRule) => write!(f, "Draw by fifty-move rule"),
            Status::Draw(DrawReason::ThreefoldRepetition) => {
                write!(f, "Draw by threefold repetition")
            }
            Status::Resigned { loser } => write!(f, "{} resigned", color_to_string(*loser)),
            Status::Timeout { loser } => write!(f, "{} ran out of time", color_to_string(*loser)),
        }
    }
}

/// Why a candidate move left the match untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveRejected {
    /// No starting position has been established yet.
    NotStarted,
    /// The match already reached a terminal status.
    GameOver,
    /// The rules engine refused the move.
    Illegal,
    /// The move belongs to the other side's turn.
    NotYourTurn,
    /// The pawn reaches the last rank and no piece was named. Not a fault:
    /// the caller asks the player and applies again with a piece.
    PromotionRequired,
}

impl fmt::Display for MoveRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MoveRejected::NotStarted => "match has not started",
            MoveRejected::GameOver => "game is already over",
            MoveRejected::Illegal => "illegal move",
            MoveRejected::NotYourTurn => "not your turn",
            MoveRejected::PromotionRequired => "choose a promotion piece",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
pub struct MatchStateMachine {
    position: Position,
    history: Vec<MoveRecord>,
    seen: Vec<u64>,
    status: Status,
}

impl Default for MatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchStateMachine {
    pub fn new() -> Self {
        Self {
            position: Position::starting(),
            history: Vec::new(),
            seen: Vec::new(),
            status: Status::Idle,
        }
    }

    /// Establishes the starting position. An unreadable notation falls back
    /// to the standard start instead of aborting the match.
    pub fn start(&mut self, notation: Option<&str>) {
        let position = match notation.filter(|n| !n.is_empty() && *n != "start") {
            Some(notation) => Position::load(notation).unwrap_or_else(|e| {
                warn!("{}; using the standard starting position", e);
                Position::starting()
            }),
            None => Position::starting(),
        };

        self.position = position;
        self.history.clear();
        self.seen = vec![position.repetition_key()];
        self.status = Self::derive_status(&position, &self.seen);
        info!("Match started from {} ({:?})", position.to_notation(), self.status);
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.history.last()
    }

    pub fn moves_from(&self, from: Square) -> Vec<MoveDescriptor> {
        if self.status.is_terminal() || self.status == Status::Idle {
            return Vec::new();
        }
        self.position.moves_from(from)
    }

    /// Validates and commits one move.
    ///
    /// On `Err` nothing observable has changed: position, history and status
    /// are exactly as before the call.
    pub fn apply(&mut self, candidate: CandidateMove) -> Result<MoveRecord, MoveRejected> {
        match self.status {
            Status::Idle => return Err(MoveRejected::NotStarted),
            s if s.is_terminal() => return Err(MoveRejected::GameOver),
            _ => {}
        }
        if candidate.promotion.is_none() && self.position.is_promotion(candidate.from, candidate.to)
        {
            return Err(MoveRejected::PromotionRequired);
        }

        let scratch = self.position;
        let (next, record) = scratch.apply(candidate).ok_or_else(|| {
            debug!("Rejected {} from {}", candidate, scratch.to_notation());
            MoveRejected::Illegal
        })?;

        self.position = next;
        self.seen.push(next.repetition_key());
        self.history.push(record.clone());
        self.status = Self::derive_status(&next, &self.seen);
        debug!("Applied {} ({}), status {:?}", candidate, record.san, self.status);
        Ok(record)
    }

    pub fn resign(&mut self, loser: Color) -> bool {
        self.finish(Status::Resigned { loser })
    }

    pub fn agree_draw(&mut self) -> bool {
        self.finish(Status::Draw(DrawReason::Agreement))
    }

    pub fn expire(&mut self, loser: Color) -> bool {
        self.finish(Status::Timeout { loser })
    }

    /// Enters a terminal status that does not come from the board. Returns
    /// false when the match was already over (or never started).
    fn finish(&mut self, status: Status) -> bool {
        if self.status.is_terminal() || self.status == Status::Idle {
            return false;
        }
        info!("Match finished: {}", status);
        self.status = status;
        true
    }

    fn derive_status(position: &Position, seen: &[u64]) -> Status {
        if position.is_game_over() {
            return Self::rules_outcome(position);
        }
        let key = position.repetition_key();
        if seen.iter().filter(|k| **k == key).count() >= 3 {
            return Status::Draw(DrawReason::ThreefoldRepetition);
        }
        if position.is_check() {
            Status::Check
        } else {
            Status::InProgress
        }
    }

    /// Which rule ended the game. Only meaningful once `is_game_over` holds.
    fn rules_outcome(position: &Position) -> Status {
        if position.is_checkmate() {
            Status::Checkmate {
                winner: !position.turn(),
            }
        } else if position.is_stalemate() {
            Status::Stalemate
        } else if position.is_insufficient_material() {
            Status::Draw(DrawReason::InsufficientMaterial)
        } else {
            Status::Draw(DrawReason::FiftyMoveRule)
        }
    }
}
