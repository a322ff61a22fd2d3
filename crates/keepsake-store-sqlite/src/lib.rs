//! SQLite backend for the Keepsake store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Also hosts [`FsAttachmentStore`], the
//! on-disk attachment area.

mod encode;
mod schema;
mod store;

pub mod attachments;
pub mod error;

pub use attachments::FsAttachmentStore;
pub use error::{Error, Result};
pub use store::SqliteStore;
