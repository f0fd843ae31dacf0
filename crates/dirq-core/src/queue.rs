//! Per-directory work queues.
//!
//! Files waiting for attribute work sit in exactly one of three tiers. A file
//! enters at the high tier and is demoted one tier at a time once nothing at
//! its current tier still needs doing for it.

use std::collections::{HashSet, VecDeque};

use crate::ids::FileId;

/// FIFO of files with O(1) membership checks.
#[derive(Debug, Default)]
pub struct FileQueue {
    order: VecDeque<FileId>,
    members: HashSet<FileId>,
}

impl FileQueue {
    /// Append `file` unless it is already queued.
    pub fn enqueue(&mut self, file: FileId) {
        if self.members.insert(file) {
            self.order.push_back(file);
        }
    }

    pub fn remove(&mut self, file: FileId) -> bool {
        if self.members.remove(&file) {
            self.order.retain(|f| *f != file);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn head(&self) -> Option<FileId> {
        self.order.front().copied()
    }

    #[inline]
    pub fn contains(&self, file: FileId) -> bool {
        self.members.contains(&file)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = FileId> + '_ {
        self.order.iter().copied()
    }
}

/// Queue tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// File info and link info.
    High,
    /// Counts, MIME list, preview text, thumbnail, mount, filesystem info.
    Low,
    /// Extension providers.
    Extension,
}

/// The three tiers of one directory.
#[derive(Debug, Default)]
pub struct WorkQueues {
    high: FileQueue,
    low: FileQueue,
    extension: FileQueue,
}

impl WorkQueues {
    /// Queue `file` at the high tier.
    ///
    /// A file already waiting at a lower tier is pulled back up so that its
    /// high-priority attributes are reconsidered first.
    pub fn enqueue(&mut self, file: FileId) {
        if self.high.contains(file) {
            return;
        }
        self.low.remove(file);
        self.extension.remove(file);
        self.high.enqueue(file);
    }

    /// Remove `file` from every tier.
    pub fn remove(&mut self, file: FileId) {
        self.high.remove(file);
        self.low.remove(file);
        self.extension.remove(file);
    }

    pub fn head(&self, tier: Tier) -> Option<FileId> {
        self.queue(tier).head()
    }

    /// Move `file` from `tier` to the next tier down, or drop it after the
    /// extension tier.
    pub fn demote(&mut self, file: FileId, tier: Tier) {
        match tier {
            Tier::High => {
                self.low.enqueue(file);
                self.high.remove(file);
            }
            Tier::Low => {
                self.extension.enqueue(file);
                self.low.remove(file);
            }
            Tier::Extension => {
                self.extension.remove(file);
            }
        }
    }

    pub fn tier_of(&self, file: FileId) -> Option<Tier> {
        if self.high.contains(file) {
            Some(Tier::High)
        } else if self.low.contains(file) {
            Some(Tier::Low)
        } else if self.extension.contains(file) {
            Some(Tier::Extension)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty() && self.extension.is_empty()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.low.len() + self.extension.len()
    }

    fn queue(&self, tier: Tier) -> &FileQueue {
        match tier {
            Tier::High => &self.high,
            Tier::Low => &self.low,
            Tier::Extension => &self.extension,
        }
    }
}
