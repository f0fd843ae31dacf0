//! Global admission control for attribute jobs.
//!
//! One counter caps the number of in-flight filesystem operations across
//! every open directory. A directory that is refused a slot is parked on the
//! wait list and re-dispatched, oldest first, once slots free up.

use std::collections::{HashSet, VecDeque};

use dirq_config::log_sched_trace;

use crate::ids::DirectoryId;

#[derive(Debug)]
pub struct Admission {
    in_flight: usize,
    max_jobs: usize,
    waiting: VecDeque<DirectoryId>,
    waiting_set: HashSet<DirectoryId>,
    waking: bool,
}

impl Admission {
    pub fn new(max_jobs: usize) -> Self {
        assert!(max_jobs > 0, "admission ceiling must be positive");
        Self {
            in_flight: 0,
            max_jobs,
            waiting: VecDeque::new(),
            waiting_set: HashSet::new(),
            waking: false,
        }
    }

    /// Claim a slot for `dir`, or park it on the wait list.
    pub fn try_start(&mut self, dir: DirectoryId, job: &'static str) -> bool {
        self.check();

        if self.in_flight >= self.max_jobs {
            if self.waiting_set.insert(dir) {
                self.waiting.push_back(dir);
            }
            log_sched_trace!("Admission deferred", dir = dir.0, job = job);
            return false;
        }

        self.in_flight += 1;
        log_sched_trace!(
            "Admission granted",
            dir = dir.0,
            job = job,
            in_flight = self.in_flight
        );
        true
    }

    /// Release a slot previously granted by [`try_start`](Self::try_start).
    pub fn end(&mut self, dir: DirectoryId, job: &'static str) {
        assert!(self.in_flight > 0, "ending {} with no job in flight", job);
        self.in_flight -= 1;
        log_sched_trace!(
            "Admission released",
            dir = dir.0,
            job = job,
            in_flight = self.in_flight
        );
    }

    /// Drop `dir` from the wait list, e.g. when it is being torn down.
    pub fn forget(&mut self, dir: DirectoryId) {
        if self.waiting_set.remove(&dir) {
            self.waiting.retain(|d| *d != dir);
        }
    }

    /// Enter the wake loop. Returns false if a wake loop is already running
    /// further up the stack.
    pub(crate) fn begin_wake(&mut self) -> bool {
        self.check();
        if self.waking {
            return false;
        }
        self.waking = true;
        true
    }

    /// Next parked directory to re-dispatch, while slots remain.
    pub(crate) fn next_to_wake(&mut self) -> Option<DirectoryId> {
        if self.in_flight >= self.max_jobs {
            return None;
        }
        let dir = self.waiting.pop_front()?;
        self.waiting_set.remove(&dir);
        Some(dir)
    }

    pub(crate) fn finish_wake(&mut self) {
        self.waking = false;
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    pub fn is_waiting(&self, dir: DirectoryId) -> bool {
        self.waiting_set.contains(&dir)
    }

    pub fn waiting(&self) -> impl Iterator<Item = DirectoryId> + '_ {
        self.waiting.iter().copied()
    }

    #[inline]
    fn check(&self) {
        assert!(
            self.in_flight <= self.max_jobs,
            "admission counter {} above ceiling {}",
            self.in_flight,
            self.max_jobs
        );
    }
}
