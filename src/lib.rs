pub mod config;
pub mod dates;
pub mod error;
pub mod game_index;
pub mod logging;
pub mod pipeline;
pub mod player_merge;
pub mod repair;
pub mod resolver;
pub mod table;
pub mod team_alias;
pub mod team_history;

pub use error::{ReconcileError, Result};
