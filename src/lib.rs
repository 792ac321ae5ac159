pub mod client;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod governor;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod repl;
pub mod session;
pub mod store;
pub mod worker;

pub use error::{ChatError, Result};
