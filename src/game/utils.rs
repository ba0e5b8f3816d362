use std::str::FromStr;

use chess::{Board, Color, File, Piece, Rank, Square, ALL_SQUARES};

use crate::error::EngineError;

/// Convert a chess color to a string
pub fn color_to_string(color: Color) -> String {
    match color {
        Color::White => "white".to_string(),
        Color::Black => "black".to_string(),
    }
}

/// Parse "white"/"black" (also "w"/"b"), case-insensitive.
pub fn parse_color(value: &str) -> Option<Color> {
    match value.trim().to_ascii_lowercase().as_str() {
        "white" | "w" => Some(Color::White),
        "black" | "b" => Some(Color::Black),
        _ => None,
    }
}

pub fn parse_square(value: &str) -> Result<Square, EngineError> {
    Square::from_str(&value.trim().to_ascii_lowercase()).map_err(|_| EngineError::InvalidSquare {
        square: value.to_string(),
    })
}

/// Wire coordinates: row 0 is rank 8, column 0 is file a.
pub fn square_to_row_col(square: Square) -> (i64, i64) {
    let row = 7 - square.get_rank().to_index() as i64;
    let col = square.get_file().to_index() as i64;
    (row, col)
}

pub fn square_from_row_col(row: i64, col: i64) -> Result<Square, EngineError> {
    if !(0..8).contains(&row) || !(0..8).contains(&col) {
        return Err(EngineError::CoordinateOutOfRange { row, col });
    }
    Ok(Square::make_square(
        Rank::from_index((7 - row) as usize),
        File::from_index(col as usize),
    ))
}

/// FEN letter for a piece: uppercase for white, lowercase for black.
pub fn piece_char(piece: Piece, color: Color) -> char {
    let c = match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    };
    match color {
        Color::White => c.to_ascii_uppercase(),
        Color::Black => c,
    }
}

/// Promotion suffix as used in UCI move strings and wire payloads.
pub fn parse_promotion(value: &str) -> Result<Piece, EngineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "q" | "queen" => Ok(Piece::Queen),
        "r" | "rook" => Ok(Piece::Rook),
        "b" | "bishop" => Ok(Piece::Bishop),
        "n" | "knight" => Ok(Piece::Knight),
        _ => Err(EngineError::InvalidPromotion {
            piece: value.to_string(),
        }),
    }
}

pub fn promotion_suffix(piece: Piece) -> char {
    piece_char(piece, Color::Black)
}

/// Check if the board has insufficient material for checkmate.
///
/// Covers K v K, a lone minor piece against a bare king, and any number of
/// bishops that all stand on squares of one colour.
pub fn has_insufficient_material(board: &Board) -> bool {
    let mut minors = Vec::new();

    for square in ALL_SQUARES {
        match board.piece_on(square) {
            None | Some(Piece::King) => {}
            Some(Piece::Pawn) | Some(Piece::Rook) | Some(Piece::Queen) => return false,
            Some(piece) => minors.push((piece, square)),
        }
    }

    match minors.as_slice() {
        [] | [_] => true,
        many => {
            let on_light = |sq: &Square| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2 == 1;
            let first = on_light(&many[0].1);
            many.iter()
                .all(|(piece, sq)| *piece == Piece::Bishop && on_light(sq) == first)
        }
    }
}
