pub mod account;
pub mod config;

pub use account::{AccountCredential, AccountState, TokenState};
pub use config::AppConfig;
