//! Notification streams for a webmail session: login state, login page type,
//! inbox unread count and entity batch updates.

mod batcher;
mod error;
mod multiplexer;
mod page;
mod unread;

pub use batcher::{EventBatcher, DEFAULT_QUIET_INTERVAL};
pub use error::NotifyError;
pub use multiplexer::{MultiplexerSettings, NotificationHandle, NotificationMultiplexer};
pub use page::{detect_page_type, PageProbe, PageState, SharedPageState, LOGIN_FORMS};
pub use unread::{InterceptedResponse, ResponseMatchers};
