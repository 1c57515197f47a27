// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Session table for generation requests.
//!
//! A session is `Queued` from submission until the lane picks it up, then
//! `Running` until it finishes. A queued entry owns its responder, so a
//! cancel resolves it immediately and the lane skips the orphaned command.
//! The lane and `cancel` both go through the same lock, so a cancel always
//! observes a definite state.

use super::lane::Responder;
use crate::generation::{CancelFlag, GenerationOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Identifies one generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The session was still queued; it has been resolved with zero tokens.
    Dequeued,
    /// The session is running; it stops at the next step boundary.
    Signalled,
    /// No such session, or it already finished.
    Unknown,
}

enum Entry {
    Queued(Responder),
    Running(CancelFlag),
}

#[derive(Default)]
pub(crate) struct SessionTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl SessionTable {
    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new queued session that answers on `responder`.
    pub(crate) fn register(&self, responder: Responder) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries().insert(id, Entry::Queued(responder));
        id
    }

    pub(crate) fn cancel(&self, id: SessionId) -> CancelOutcome {
        let mut entries = self.entries();
        if let Some(Entry::Running(flag)) = entries.get(&id) {
            flag.cancel();
            return CancelOutcome::Signalled;
        }
        match entries.remove(&id) {
            Some(Entry::Queued(responder)) => {
                drop(entries);
                responder.finish(Ok(GenerationOutcome::cancelled_before_start()));
                CancelOutcome::Dequeued
            }
            _ => CancelOutcome::Unknown,
        }
    }

    /// Moves a session to `Running`, handing its responder to the lane.
    ///
    /// Returns `None` if the session is no longer queued (it was cancelled
    /// and already answered).
    pub(crate) fn start(&self, id: SessionId) -> Option<(CancelFlag, Responder)> {
        let mut entries = self.entries();
        match entries.remove(&id) {
            Some(Entry::Queued(responder)) => {
                let flag = CancelFlag::new();
                entries.insert(id, Entry::Running(flag.clone()));
                Some((flag, responder))
            }
            Some(running) => {
                entries.insert(id, running);
                None
            }
            None => None,
        }
    }

    pub(crate) fn finish(&self, id: SessionId) {
        self.entries().remove(&id);
    }

    /// `(queued, running)` session counts.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let entries = self.entries();
        let running = entries
            .values()
            .filter(|e| matches!(e, Entry::Running(_)))
            .count();
        (entries.len() - running, running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StopReason;
    use tokio::sync::oneshot;

    fn blocking() -> (Responder, oneshot::Receiver<Result<GenerationOutcome, crate::RuntimeError>>) {
        let (tx, rx) = oneshot::channel();
        (Responder::Blocking(tx), rx)
    }

    #[test]
    fn test_ids_are_increasing() {
        let t = SessionTable::default();
        let a = t.register(blocking().0);
        let b = t.register(blocking().0);
        assert!(b > a);
        assert_eq!(t.counts(), (2, 0));
    }

    #[test]
    fn test_cancel_queued_resolves_immediately() {
        let t = SessionTable::default();
        let (responder, mut rx) = blocking();
        let id = t.register(responder);
        assert_eq!(t.cancel(id), CancelOutcome::Dequeued);
        assert_eq!(t.counts(), (0, 0));

        let out = rx.try_recv().unwrap().unwrap();
        assert_eq!(out.stop_reason, StopReason::Cancelled);
        assert_eq!(out.tokens_generated, 0);

        assert!(t.start(id).is_none());
        assert_eq!(t.cancel(id), CancelOutcome::Unknown);
    }

    #[test]
    fn test_cancel_running_sets_flag() {
        let t = SessionTable::default();
        let (responder, mut rx) = blocking();
        let id = t.register(responder);
        let (flag, _responder) = t.start(id).unwrap();
        assert_eq!(t.counts(), (0, 1));
        assert_eq!(t.cancel(id), CancelOutcome::Signalled);
        assert!(flag.is_cancelled());
        assert!(rx.try_recv().is_err());
        assert!(t.start(id).is_none());
        t.finish(id);
        assert_eq!(t.counts(), (0, 0));
        assert_eq!(t.cancel(id), CancelOutcome::Unknown);
    }
}
