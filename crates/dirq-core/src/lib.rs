//! # dirq-core
//!
//! Bounded, reentrant scheduler for per-directory file attribute fetches.
//!
//! ## Architecture
//!
//! Clients open directories and files by location and register interest:
//! - *Monitors* keep a set of attributes fresh until removed
//! - *Ready-callbacks* fire once, when the attributes are first known
//!
//! Each directory runs a dispatch loop that starts at most one fetch per
//! attribute kind, drawing files from three priority tiers. A global
//! admission limit caps concurrent jobs; directories that hit it are parked
//! and woken in FIFO order as slots free up.
//!
//! ## Collaborators
//!
//! All I/O goes through an [`FsBackend`]. Results come back as messages on
//! the scheduler's channel and are applied on the owning thread by
//! [`Scheduler::dispatch_pending`] or [`Scheduler::run_until`].

mod admission;
pub mod backend;
mod directory;
mod dispatch;
pub mod error;
pub mod events;
mod fetch;
pub mod file;
pub mod ids;
pub mod io;
pub mod provider;
pub mod queue;
pub mod request;
mod requests;
pub mod scheduler;
pub mod settings;
mod state;
pub mod subscription;
pub mod testing;
pub mod text;
pub mod watch;

pub use backend::LocalBackend;
pub use error::{BackendError, IoFailure, Result, SchedulerError};
pub use events::DirectoryEvent;
pub use fetch::{parse_desktop_entry, FetchKind};
pub use file::{AttrState, Cached, DeepCountStatus, DeepCounts, File, LinkInfo};
pub use ids::{ClientId, DirectoryId, FileId};
pub use io::{CompletionSink, EntryInfo, FileType, FsBackend, Outcome, Ticket};
pub use provider::{InfoProvider, ProviderRegistry};
pub use queue::Tier;
pub use request::{FileAttributes, RequestKind};
pub use scheduler::Scheduler;
pub use settings::SchedulerConfig;
pub use subscription::ReadyHandler;
