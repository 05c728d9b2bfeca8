mod error;
mod keychain;
mod session;

pub use error::SecurityError;
pub use keychain::KeychainSessionStore;
pub use session::{BrowserSession, SessionService, SessionStore};
