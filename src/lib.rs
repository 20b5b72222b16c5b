pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod pgn;
pub mod position;
pub mod registry;
pub mod session;
pub mod util;

pub use config::{EngineConfig, SessionSettings};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::GameSession;
