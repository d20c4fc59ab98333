pub mod accounts;
pub mod import;
pub mod issued_tokens;

pub use accounts::AccountStore;
pub use issued_tokens::{IssuedToken, IssuedTokenStore};
