pub mod cookies;
pub mod guest;
pub mod login;
pub mod session;
pub mod totp;
pub mod transport;

pub use cookies::CookieJar;
pub use guest::GuestAuth;
pub use session::ActiveSession;
pub use transport::Transport;
