use std::time::Duration;

use super::EngineOptions;

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UciMessage {
    IdName(String),
    UciOk,
    ReadyOk,
    BestMove { best_move: String, ponder: Option<String> },
    Info { depth: Option<u32>, score: Option<Score>, pv: Vec<String> },
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

pub fn parse_line(line: &str) -> Option<UciMessage> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (&keyword, rest) = parts.split_first()?;

    let message = match keyword {
        "id" if rest.len() >= 2 && rest[0] == "name" => UciMessage::IdName(rest[1..].join(" ")),
        "uciok" => UciMessage::UciOk,
        "readyok" => UciMessage::ReadyOk,
        "bestmove" if !rest.is_empty() => UciMessage::BestMove {
            best_move: rest[0].to_string(),
            ponder: match rest {
                [_, "ponder", ponder, ..] => Some(ponder.to_string()),
                _ => None,
            },
        },
        "info" => parse_info(rest),
        _ => UciMessage::Other(line.trim().to_string()),
    };
    Some(message)
}

fn parse_info(fields: &[&str]) -> UciMessage {
    let mut depth = None;
    let mut score = None;
    let mut pv = Vec::new();

    let mut i = 0;
    while i < fields.len() {
        match fields[i] {
            "depth" => {
                depth = fields.get(i + 1).and_then(|d| d.parse().ok());
                i += 2;
            }
            "score" => {
                let value = fields.get(i + 2).and_then(|v| v.parse().ok());
                score = match (fields.get(i + 1), value) {
                    (Some(&"cp"), Some(cp)) => Some(Score::Centipawns(cp)),
                    (Some(&"mate"), Some(mate)) => Some(Score::Mate(mate)),
                    _ => score,
                };
                i += 3;
            }
            // pv runs to the end of the line
            "pv" => {
                pv = fields[i + 1..].iter().map(|m| m.to_string()).collect();
                break;
            }
            _ => i += 1,
        }
    }
    UciMessage::Info { depth, score, pv }
}

pub fn setoption_commands(options: &EngineOptions) -> Vec<String> {
    vec![
        format!("setoption name Skill Level value {}", options.skill_level),
        format!("setoption name Hash value {}", options.hash_mb),
        format!("setoption name Threads value {}", options.threads),
    ]
}

pub fn position_command(start_fen: &str, moves: &[String]) -> String {
    let mut command = if start_fen == STARTPOS_FEN {
        "position startpos".to_string()
    } else {
        format!("position fen {start_fen}")
    };
    if !moves.is_empty() {
        command.push_str(" moves ");
        command.push_str(&moves.join(" "));
    }
    command
}

pub fn go_command(think_time: Duration) -> String {
    format!("go movetime {}", think_time.as_millis().max(1))
}
