mod error;
mod event;
mod patch;
mod service;
mod threading;

pub use error::EmailError;
pub use event::{RawEvent, RecordChange};
pub use patch::{EntityResolver, PatchBuilder, StoreResolver};
pub use service::EmailService;
pub use threading::{conversation, conversation_roots, folder_views};
