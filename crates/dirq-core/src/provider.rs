//! Extension info providers.
//!
//! Providers attach extra key/value attributes to files. Each is asked in
//! turn; a provider may answer on the spot or hand back a handle and answer
//! later through its [`ProviderResponder`].

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::io::{CompletionSink, Message};
use crate::ids::DirectoryId;

/// Index of a provider in its [`ProviderRegistry`].
pub type ProviderId = usize;

/// Token identifying one pending provider update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderHandle(pub u64);

/// Immediate answer to an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResult {
    Complete(Vec<(String, String)>),
    Failed,
    /// The provider will answer later through its responder.
    InProgress(ProviderHandle),
}

/// What a provider gets to see of a file.
#[derive(Debug, Clone, Copy)]
pub struct ProviderFile<'a> {
    pub location: &'a Path,
    pub name: &'a str,
    pub mime_type: Option<&'a str>,
}

/// Channel back to the scheduler for a deferred answer.
#[derive(Debug, Clone)]
pub struct ProviderResponder {
    pub(crate) dir: DirectoryId,
    pub(crate) provider: ProviderId,
    pub(crate) sink: CompletionSink,
}

impl ProviderResponder {
    /// Finish the update identified by `handle`. `None` means it failed.
    pub fn respond(&self, handle: ProviderHandle, attributes: Option<Vec<(String, String)>>) {
        self.sink.send(Message::Provider {
            dir: self.dir,
            provider: self.provider,
            handle,
            attributes,
        });
    }
}

/// A source of extension attributes.
///
/// `update_file_info` runs on the scheduler thread and must not call back
/// into the scheduler; deferred answers go through the responder.
pub trait InfoProvider {
    fn name(&self) -> &str;

    fn update_file_info(&self, file: &ProviderFile<'_>, responder: ProviderResponder) -> ProviderResult;

    fn cancel_update(&self, handle: ProviderHandle);
}

/// All loaded providers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Rc<dyn InfoProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Rc<dyn InfoProvider>) -> ProviderId {
        self.providers.push(provider);
        self.providers.len() - 1
    }

    pub fn get(&self, id: ProviderId) -> Option<&Rc<dyn InfoProvider>> {
        self.providers.get(id)
    }

    /// Ids of every loaded provider, in registration order.
    pub fn all(&self) -> Vec<ProviderId> {
        (0..self.providers.len()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name().to_string()))
            .finish()
    }
}
