use std::str::FromStr;

use shakmaty::{Role, Square, uci::UciMove};

pub fn parse_uci_move(move_str: &str) -> Option<UciMove> {
    UciMove::from_str(move_str.trim()).ok()
}

pub fn parse_square(square: &str) -> Option<Square> {
    Square::from_str(&square.trim().to_ascii_lowercase()).ok()
}

/// Accepts a piece letter (`q`, `N`) or a piece name (`queen`, `KNIGHT`).
pub fn parse_promotion(piece: &str) -> Option<Role> {
    let piece = piece.trim().to_ascii_lowercase();
    match piece.as_str() {
        "queen" => Some(Role::Queen),
        "rook" => Some(Role::Rook),
        "bishop" => Some(Role::Bishop),
        "knight" => Some(Role::Knight),
        _ => {
            let mut chars = piece.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Role::from_char(c).filter(|role| {
                    matches!(role, Role::Queen | Role::Rook | Role::Bishop | Role::Knight)
                }),
                _ => None,
            }
        }
    }
}
