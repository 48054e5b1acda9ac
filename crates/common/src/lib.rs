//! CoTravel Common Library
//!
//! Shared types, amount arithmetic, crypto, and persistence for the
//! CoTravel escrow service.

pub mod amount;
pub mod crypto;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use amount::{format_xlm, parse_xlm, STROOPS_PER_XLM};
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// CoTravel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".cotravel")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
