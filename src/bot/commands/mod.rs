pub mod setup;

pub use setup::setup;

use crate::bot::Data;

type Error = Box<dyn std::error::Error + Send + Sync>;

/// Get all registered commands
pub fn all_commands() -> Vec<poise::Command<Data, Error>> {
    vec![setup()]
}
