use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Parser, ValueEnum};

use crate::engine::{EngineCommand, EngineOptions, EngineSpec};

pub const MIN_SKILL_LEVEL: u8 = 1;
pub const MAX_SKILL_LEVEL: u8 = 20;
pub const MIN_THINK_TIME: f64 = 0.1;
pub const MAX_THINK_TIME: f64 = 60.0;

/// Engine settings of one session. Values are always within range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    skill_level: u8,
    think_time: f64,
    hash_mb: u32,
    threads: u32,
}

impl EngineConfig {
    /// Clamps skill into 1..=20 and think time into 0.1..=60 seconds.
    pub fn new(skill_level: i64, think_time: f64) -> EngineConfig {
        EngineConfig {
            skill_level: clamp_skill(skill_level),
            think_time: clamp_think_time(think_time),
            ..EngineConfig::default()
        }
    }

    pub fn with_skill_level(self, skill_level: i64) -> EngineConfig {
        EngineConfig {
            skill_level: clamp_skill(skill_level),
            ..self
        }
    }

    pub fn with_think_time(self, think_time: f64) -> EngineConfig {
        EngineConfig {
            think_time: clamp_think_time(think_time),
            ..self
        }
    }

    pub fn with_resources(self, hash_mb: u32, threads: u32) -> EngineConfig {
        EngineConfig {
            hash_mb: hash_mb.max(1),
            threads: threads.max(1),
            ..self
        }
    }

    pub fn skill_level(&self) -> u8 {
        self.skill_level
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_secs_f64(self.think_time)
    }

    pub fn think_time_secs(&self) -> f64 {
        self.think_time
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            skill_level: self.skill_level,
            hash_mb: self.hash_mb,
            threads: self.threads,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            skill_level: 15,
            think_time: 2.0,
            hash_mb: 64,
            threads: 1,
        }
    }
}

fn clamp_skill(skill_level: i64) -> u8 {
    skill_level.clamp(MIN_SKILL_LEVEL as i64, MAX_SKILL_LEVEL as i64) as u8
}

fn clamp_think_time(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.clamp(MIN_THINK_TIME, MAX_THINK_TIME)
    } else {
        MIN_THINK_TIME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UndoPolicy {
    /// Undo removes exactly one move.
    SinglePly,
    /// In PlayerVsEngine, undo also removes the engine's reply so the human
    /// is to move again.
    ReturnToHuman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleSettings {
    pub pace: Duration,
    pub max_retries: u32,
    pub max_plies: u32,
}

impl Default for BattleSettings {
    fn default() -> Self {
        BattleSettings {
            pace: Duration::from_millis(500),
            max_retries: 3,
            max_plies: 200,
        }
    }
}

/// Settings shared by every session of a registry.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub engine: EngineSpec,
    pub engine_defaults: EngineConfig,
    pub handshake_timeout: Duration,
    pub grace: Duration,
    pub battle: BattleSettings,
    pub undo: UndoPolicy,
    pub auto_reply: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            engine: EngineSpec::Random,
            engine_defaults: EngineConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            grace: Duration::from_secs(1),
            battle: BattleSettings::default(),
            undo: UndoPolicy::ReturnToHuman,
            auto_reply: true,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rusty-chess-arena")]
#[command(about = "Chess sessions against humans and UCI engines, over HTTP")]
pub struct Args {
    /// Address the HTTP server listens on
    #[arg(long, env = "CHESS_LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// UCI engine executable; the built-in random mover is used when absent
    #[arg(long, env = "CHESS_ENGINE_PATH")]
    pub engine: Option<PathBuf>,

    /// Extra argument passed to the engine (repeatable)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Default skill level (1-20)
    #[arg(long, env = "CHESS_SKILL_LEVEL", default_value_t = 15)]
    pub skill_level: i64,

    /// Default think time per engine move, in seconds (0.1-60)
    #[arg(long, env = "CHESS_THINK_TIME", default_value_t = 2.0)]
    pub think_time: f64,

    /// Engine hash size in MB
    #[arg(long, default_value_t = 64)]
    pub hash_mb: u32,

    /// Engine search threads
    #[arg(long, default_value_t = 1)]
    pub threads: u32,

    #[arg(long, default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,

    /// Extra time granted on top of the think time before giving up on the engine
    #[arg(long, default_value_t = 1_000)]
    pub grace_ms: u64,

    /// Delay between moves of an engine battle
    #[arg(long, default_value_t = 500)]
    pub battle_pace_ms: u64,

    /// Consecutive failed engine moves a battle tolerates
    #[arg(long, default_value_t = 3)]
    pub battle_max_retries: u32,

    /// Battles stop after this many moves
    #[arg(long, default_value_t = 200)]
    pub battle_max_plies: u32,

    #[arg(long, value_enum, default_value_t = UndoPolicy::ReturnToHuman)]
    pub undo: UndoPolicy,

    /// Do not answer human moves automatically in player-vs-engine games
    #[arg(long)]
    pub no_auto_reply: bool,

    /// Sessions untouched for this long are closed
    #[arg(long, env = "CHESS_IDLE_TIMEOUT", default_value_t = 1_800)]
    pub idle_timeout_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub reap_interval_secs: u64,
}

impl Args {
    pub fn session_settings(&self) -> SessionSettings {
        let engine = match &self.engine {
            Some(path) => EngineSpec::Uci(EngineCommand {
                path: path.clone(),
                args: self.engine_args.clone(),
            }),
            None => EngineSpec::Random,
        };
        SessionSettings {
            engine,
            engine_defaults: EngineConfig::new(self.skill_level, self.think_time)
                .with_resources(self.hash_mb, self.threads),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            grace: Duration::from_millis(self.grace_ms),
            battle: BattleSettings {
                pace: Duration::from_millis(self.battle_pace_ms),
                max_retries: self.battle_max_retries,
                max_plies: self.battle_max_plies,
            },
            undo: self.undo,
            auto_reply: !self.no_auto_reply,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}
