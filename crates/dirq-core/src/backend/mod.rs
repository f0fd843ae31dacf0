//! Filesystem backends.

mod content_type;
mod local;
pub mod mounts;
pub mod thumbnail;
mod thumbnail_worker;

pub use content_type::{guess as guess_content_type, DIRECTORY_MIME};
pub use local::LocalBackend;
pub use thumbnail_worker::ThumbnailWorker;
pub(crate) use local::stat_entry;
