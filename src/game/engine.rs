//! Position Engine adapter.
//!
//! Wraps the `chess` crate's `Board` behind the narrow contract the match
//! core consumes: load/encode notation, legal destinations with move flags,
//! validated application and the terminal predicates. A [`Position`] is a
//! plain `Copy` value, so applying a move always yields a new snapshot and
//! never mutates the one the caller holds.

use std::fmt;
use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, File, MoveGen, Piece, Rank, Square, EMPTY};

use crate::error::EngineError;
use crate::game::utils::{
    has_insufficient_material, parse_promotion, parse_square, piece_char, promotion_suffix,
};

pub const STARTING_NOTATION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Full board state: placement, side to move, castling and en-passant rights
/// (inside `Board`) plus the move counters the `chess` crate does not track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Position {
    board: Board,
    halfmove_clock: u32,
    fullmove_number: u32,
}

/// One legal destination for a piece, with the flags a UI needs before
/// committing a gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveDescriptor {
    pub to: Square,
    pub promotion: bool,
    pub capture: bool,
}

/// A move as proposed by the player, the oracle or the peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Piece>,
}

/// One committed move. Never modified once appended to a match history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveRecord {
    pub from: Square,
    pub to: Square,
    pub piece: Piece,
    pub color: Color,
    pub promotion: Option<Piece>,
    pub captured: Option<Piece>,
    pub san: String,
    pub fen_after: String,
}

impl CandidateMove {
    pub fn new(from: Square, to: Square, promotion: Option<Piece>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }

    /// Parses long algebraic form: `e2e4`, `e7e8q`.
    pub fn from_uci(text: &str) -> Result<Self, EngineError> {
        let text = text.trim();
        if !text.is_ascii() || !(4..=5).contains(&text.len()) {
            return Err(EngineError::InvalidSquare {
                square: text.to_string(),
            });
        }
        let from = parse_square(&text[0..2])?;
        let to = parse_square(&text[2..4])?;
        let promotion = match text.get(4..5) {
            Some(p) => Some(parse_promotion(p)?),
            None => None,
        };
        Ok(Self::new(from, to, promotion))
    }

    /// Fills in a queen when the move promotes and no piece was named.
    ///
    /// Only for complete payloads (oracle replies, peer messages); an
    /// interactive gesture must resolve the piece itself.
    pub fn with_default_promotion(self, position: &Position) -> Self {
        if self.promotion.is_none() && position.is_promotion(self.from, self.to) {
            Self {
                promotion: Some(Piece::Queen),
                ..self
            }
        } else {
            self
        }
    }
}

impl fmt::Display for CandidateMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(piece) = self.promotion {
            write!(f, "{}", promotion_suffix(piece))?;
        }
        Ok(())
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::starting()
    }
}

impl Position {
    pub fn starting() -> Self {
        Self {
            board: Board::default(),
            halfmove_clock: 0,
            fullmove_number: 1,
        }
    }

    pub fn load(notation: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidNotation {
            notation: notation.to_string(),
        };
        let fields: Vec<&str> = notation.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(invalid());
        }
        let board = Board::from_str(&fields[..4].join(" ")).map_err(|_| invalid())?;
        let halfmove_clock = match fields.get(4) {
            Some(v) => v.parse().map_err(|_| invalid())?,
            None => 0,
        };
        let fullmove_number = match fields.get(5) {
            Some(v) => v.parse::<u32>().map_err(|_| invalid())?.max(1),
            None => 1,
        };
        Ok(Self {
            board,
            halfmove_clock,
            fullmove_number,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn turn(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn halfmove_clock(&self) -> u32 {
        self.halfmove_clock
    }

    pub fn fullmove_number(&self) -> u32 {
        self.fullmove_number
    }

    /// Key used for repetition detection.
    pub fn repetition_key(&self) -> u64 {
        self.board.get_hash()
    }

    pub fn to_notation(&self) -> String {
        let full = self.board.to_string();
        let fields: Vec<&str> = full.split_whitespace().take(3).collect();
        format!(
            "{} {} {} {}",
            fields.join(" "),
            self.en_passant_target(),
            self.halfmove_clock,
            self.fullmove_number
        )
    }

    /// FEN target square: the one the capturing pawn lands on, i.e. behind
    /// the pawn that just advanced two ranks. `Board` only reports the pawn.
    fn en_passant_target(&self) -> String {
        let target = self.board.en_passant().and_then(|pawn| match self.turn() {
            Color::White => pawn.up(),
            Color::Black => pawn.down(),
        });
        match target {
            Some(square) => square.to_string(),
            None => "-".to_string(),
        }
    }

    /// Row 0 is rank 8, column 0 is file a; uppercase is white, "" is empty.
    pub fn board_grid(&self) -> Vec<Vec<String>> {
        (0..8)
            .map(|row| {
                (0..8)
                    .map(|col| {
                        let square =
                            Square::make_square(Rank::from_index(7 - row), File::from_index(col));
                        match (self.board.piece_on(square), self.board.color_on(square)) {
                            (Some(piece), Some(color)) => piece_char(piece, color).to_string(),
                            _ => String::new(),
                        }
                    })
                    .collect()
            })
            .collect()
    }

    pub fn moves_from(&self, from: Square) -> Vec<MoveDescriptor> {
        let mut descriptors: Vec<MoveDescriptor> = Vec::new();
        for mv in MoveGen::new_legal(&self.board).filter(|m| m.get_source() == from) {
            if descriptors.iter().any(|d| d.to == mv.get_dest()) {
                continue;
            }
            descriptors.push(MoveDescriptor {
                to: mv.get_dest(),
                promotion: mv.get_promotion().is_some(),
                capture: self.captured_by(mv).is_some(),
            });
        }
        descriptors
    }

    pub fn is_promotion(&self, from: Square, to: Square) -> bool {
        MoveGen::new_legal(&self.board).any(|m| {
            m.get_source() == from && m.get_dest() == to && m.get_promotion().is_some()
        })
    }

    /// Validates `candidate` against the legal move list and returns the
    /// successor position with the record of the move; `None` if illegal.
    ///
    /// A promotion piece on a non-promoting move is ignored.
    pub fn apply(&self, candidate: CandidateMove) -> Option<(Position, MoveRecord)> {
        let promotion = if self.is_promotion(candidate.from, candidate.to) {
            Some(candidate.promotion?)
        } else {
            None
        };
        let mv = ChessMove::new(candidate.from, candidate.to, promotion);
        if !self.board.legal(mv) {
            return None;
        }

        let piece = self.board.piece_on(mv.get_source())?;
        let color = self.turn();
        let captured = self.captured_by(mv);
        let board = self.board.make_move_new(mv);

        let next = Position {
            board,
            halfmove_clock: if piece == Piece::Pawn || captured.is_some() {
                0
            } else {
                self.halfmove_clock + 1
            },
            fullmove_number: match color {
                Color::White => self.fullmove_number,
                Color::Black => self.fullmove_number + 1,
            },
        };

        let record = MoveRecord {
            from: mv.get_source(),
            to: mv.get_dest(),
            piece,
            color,
            promotion,
            captured,
            san: self.san(mv, &next.board),
            fen_after: next.to_notation(),
        };
        Some((next, record))
    }

    pub fn is_check(&self) -> bool {
        *self.board.checkers() != EMPTY
    }

    pub fn is_checkmate(&self) -> bool {
        self.board.status() == BoardStatus::Checkmate
    }

    pub fn is_stalemate(&self) -> bool {
        self.board.status() == BoardStatus::Stalemate
    }

    pub fn is_insufficient_material(&self) -> bool {
        has_insufficient_material(&self.board)
    }

    pub fn is_fifty_move_draw(&self) -> bool {
        self.halfmove_clock >= 100
    }

    /// True when the rules end the game here, repetition aside.
    pub fn is_game_over(&self) -> bool {
        self.board.status() != BoardStatus::Ongoing
            || self.is_insufficient_material()
            || self.is_fifty_move_draw()
    }

    fn captured_by(&self, mv: ChessMove) -> Option<Piece> {
        if let Some(piece) = self.board.piece_on(mv.get_dest()) {
            return Some(piece);
        }
        let is_pawn = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn);
        let changes_file = mv.get_source().get_file() != mv.get_dest().get_file();
        (is_pawn && changes_file).then_some(Piece::Pawn)
    }

    fn san(&self, mv: ChessMove, after: &Board) -> String {
        let from = mv.get_source();
        let to = mv.get_dest();
        let piece = self.board.piece_on(from).unwrap_or(Piece::Pawn);
        let file_char = |sq: Square| (b'a' + sq.get_file().to_index() as u8) as char;
        let rank_char = |sq: Square| (b'1' + sq.get_rank().to_index() as u8) as char;

        let mut san = String::new();
        let file_delta = from.get_file().to_index() as i32 - to.get_file().to_index() as i32;
        if piece == Piece::King && file_delta.abs() == 2 {
            san.push_str(if file_delta < 0 { "O-O" } else { "O-O-O" });
        } else {
            let capture = self.captured_by(mv).is_some();
            if piece == Piece::Pawn {
                if capture {
                    san.push(file_char(from));
                }
            } else {
                san.push(piece_char(piece, Color::White));
                let rivals: Vec<Square> = MoveGen::new_legal(&self.board)
                    .filter(|m| {
                        m.get_dest() == to
                            && m.get_source() != from
                            && self.board.piece_on(m.get_source()) == Some(piece)
                    })
                    .map(|m| m.get_source())
                    .collect();
                if !rivals.is_empty() {
                    if rivals.iter().all(|r| r.get_file() != from.get_file()) {
                        san.push(file_char(from));
                    } else if rivals.iter().all(|r| r.get_rank() != from.get_rank()) {
                        san.push(rank_char(from));
                    } else {
                        san.push(file_char(from));
                        san.push(rank_char(from));
                    }
                }
            }
            if capture {
                san.push('x');
            }
            san.push_str(&to.to_string());
            if let Some(promoted) = mv.get_promotion() {
                san.push('=');
                san.push(piece_char(promoted, Color::White));
            }
        }

        if after.status() == BoardStatus::Checkmate {
            san.push('#');
        } else if *after.checkers() != EMPTY {
            san.push('+');
        }
        san
    }
}
