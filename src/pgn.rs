use std::str::FromStr;

use log::debug;
use shakmaty::san::San;

use crate::{error::SessionError, position::GamePosition, util::parse_uci_move};

const EVENT: &str = "Rusty Chess Arena Game";
const SITE: &str = "rusty-chess-arena";
const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

pub struct PgnPlayers {
    white: String,
    black: String,
}

impl PgnPlayers {
    pub fn new(white: impl Into<String>, black: impl Into<String>) -> PgnPlayers {
        PgnPlayers {
            white: white.into(),
            black: black.into(),
        }
    }
}

/// Today's date the way PGN writes it.
pub fn today() -> String {
    chrono::Local::now().format("%Y.%m.%d").to_string()
}

/// Writes the game as PGN tags followed by one coordinate move per line.
pub fn export(position: &GamePosition, players: &PgnPlayers, date: &str) -> String {
    let result = position
        .outcome()
        .map(|result| result.token())
        .unwrap_or("*");

    let mut tags = vec![
        ("Event", EVENT.to_string()),
        ("Site", SITE.to_string()),
        ("Date", date.to_string()),
        ("Round", "-".to_string()),
        ("White", players.white.clone()),
        ("Black", players.black.clone()),
        ("Result", result.to_string()),
    ];
    if !position.starts_from_standard_position() {
        tags.push(("SetUp", "1".to_string()));
        tags.push(("FEN", position.start_fen().to_string()));
    }

    let mut pgn = String::new();
    for (name, value) in tags {
        pgn.push_str(&format!("[{name} \"{}\"]\n", value.replace('"', "'")));
    }
    pgn.push('\n');
    for played in position.moves() {
        pgn.push_str(&played);
        pgn.push('\n');
    }
    pgn.push('\n');
    pgn.push_str(result);
    pgn.push('\n');
    pgn
}

/// Rebuilds a game from PGN text, replaying every move on a fresh position.
///
/// Accepts the files `export` writes as well as common PGN: SAN moves, move
/// numbers, comments, NAGs and result tokens. Text without tags is read as a
/// bare move list.
pub fn import(text: &str) -> Result<GamePosition, SessionError> {
    if text.trim().is_empty() {
        return Err(corrupt("the file is empty"));
    }

    let mut start_fen = None;
    let mut movetext = String::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.starts_with('%') {
            continue;
        }
        if line.starts_with('[') {
            let (name, value) = parse_tag(line)
                .ok_or_else(|| corrupt(format!("malformed tag on line {}", number + 1)))?;
            if name == "FEN" {
                start_fen = Some(value);
            }
            continue;
        }
        movetext.push_str(line);
        movetext.push('\n');
    }

    let mut position = match start_fen {
        Some(fen) => GamePosition::from_fen(&fen)
            .map_err(|e| corrupt(format!("unusable FEN tag: {e}")))?,
        None => GamePosition::new(),
    };

    for (index, token) in tokens(&strip_comments(&movetext)?).enumerate() {
        let legal = parse_uci_move(token)
            .and_then(|uci| position.legal_uci(&uci))
            .or_else(|| {
                let san = San::from_str(token.trim_end_matches(['+', '#', '!', '?'])).ok()?;
                san.to_move(position.chess()).ok()
            })
            .ok_or_else(|| {
                corrupt(format!(
                    "move {} ({token}) is illegal or unreadable",
                    index + 1
                ))
            })?;
        position.play(legal);
    }
    debug!("imported {} moves", position.ply_count());
    Ok(position)
}

fn corrupt(reason: impl Into<String>) -> SessionError {
    SessionError::CorruptGameFile(reason.into())
}

/// `[Name "value"]` to its name and value.
fn parse_tag(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?.trim();
    let (name, value) = inner.split_once(char::is_whitespace)?;
    let value = value.trim().strip_prefix('"')?.strip_suffix('"')?;
    Some((name.to_string(), value.to_string()))
}

/// Drops `{...}` comments, `;` line comments and `(...)` variations.
fn strip_comments(movetext: &str) -> Result<String, SessionError> {
    let mut kept = String::with_capacity(movetext.len());
    let mut chars = movetext.chars();
    let mut depth = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !chars.by_ref().any(|c| c == '}') {
                    return Err(corrupt("unterminated comment"));
                }
                kept.push(' ');
            }
            ';' => {
                let _ = chars.by_ref().find(|&c| c == '\n');
                kept.push('\n');
            }
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| corrupt("unbalanced variation"))?;
                kept.push(' ');
            }
            _ if depth > 0 => {}
            _ => kept.push(c),
        }
    }
    if depth > 0 {
        return Err(corrupt("unterminated variation"));
    }
    Ok(kept)
}

/// Move tokens with numbers, NAGs and result markers removed.
fn tokens(movetext: &str) -> impl Iterator<Item = &str> {
    movetext
        .split_whitespace()
        .filter(|token| !token.starts_with('$') && !RESULT_TOKENS.contains(token))
        .map(|token| {
            // "12." and "12..." stand alone, "1.e4" carries its move
            let digits = token.trim_start_matches(|c: char| c.is_ascii_digit());
            match digits.strip_prefix('.') {
                Some(rest) if digits.len() < token.len() => rest.trim_start_matches('.'),
                _ => token,
            }
        })
        .filter(|token| !token.is_empty())
}
