pub mod bot;
pub mod chat;
pub mod config;
pub mod context;
pub mod credentials;
pub mod db;
pub mod error;
pub mod spotify;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::{AppError, AppResult};
