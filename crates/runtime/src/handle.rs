// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime handle lifecycle.
//!
//! ```text
//! Uninitialized ──initialize()──► Ready ──dispose()──► Disposed
//!                                   │ ▲
//!                                   └─┘ initialize() returns the same handle
//! ```
//!
//! `Disposed` is terminal. The manager owns the backend; a
//! [`RuntimeHandle`] is only a token proving which initialization it came
//! from, so a handle kept past `dispose()` can never reach the backend.

use crate::backend::{BackendFactory, ExecutionBackend};
use crate::RuntimeError;

/// Identity of one initialized backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct HandleId(uuid::Uuid);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Opaque token for the live backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    id: HandleId,
}

impl RuntimeHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Uninitialized,
    Ready,
    Disposed,
}

enum State {
    Uninitialized,
    Ready {
        id: HandleId,
        backend: Box<dyn ExecutionBackend>,
    },
    Disposed,
}

/// Owns the single backend instance of a runtime.
pub struct RuntimeHandleManager {
    state: State,
    factory: BackendFactory,
}

impl RuntimeHandleManager {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            state: State::Uninitialized,
            factory,
        }
    }

    pub fn state(&self) -> HandleState {
        match self.state {
            State::Uninitialized => HandleState::Uninitialized,
            State::Ready { .. } => HandleState::Ready,
            State::Disposed => HandleState::Disposed,
        }
    }

    /// Creates the backend on first call; later calls return the same handle.
    pub fn initialize(&mut self) -> Result<RuntimeHandle, RuntimeError> {
        match &self.state {
            State::Ready { id, .. } => {
                tracing::debug!(handle = %id, "runtime already initialized");
                return Ok(RuntimeHandle { id: *id });
            }
            State::Disposed => return Err(RuntimeError::RuntimeDisposed),
            State::Uninitialized => {}
        }

        let backend = (self.factory)()?;
        let id = HandleId(uuid::Uuid::new_v4());
        tracing::info!(handle = %id, backend = backend.name(), "runtime initialized");
        self.state = State::Ready { id, backend };
        Ok(RuntimeHandle { id })
    }

    /// The current handle, if the runtime is ready.
    pub fn handle(&self) -> Result<RuntimeHandle, RuntimeError> {
        match &self.state {
            State::Ready { id, .. } => Ok(RuntimeHandle { id: *id }),
            State::Uninitialized => Err(RuntimeError::NotInitialized),
            State::Disposed => Err(RuntimeError::RuntimeDisposed),
        }
    }

    /// Resolves a handle to the backend it was issued for.
    pub fn backend(&self, handle: &RuntimeHandle) -> Result<&dyn ExecutionBackend, RuntimeError> {
        match &self.state {
            State::Ready { id, backend } if *id == handle.id => Ok(backend.as_ref()),
            State::Ready { .. } | State::Disposed => Err(RuntimeError::RuntimeDisposed),
            State::Uninitialized => Err(RuntimeError::NotInitialized),
        }
    }

    /// Releases the backend. Returns `false` if already disposed.
    ///
    /// Disposing an uninitialized manager is allowed and also terminal.
    pub fn dispose(&mut self) -> bool {
        match std::mem::replace(&mut self.state, State::Disposed) {
            State::Disposed => false,
            State::Ready { id, backend } => {
                tracing::info!(handle = %id, backend = backend.name(), "runtime disposed");
                drop(backend);
                true
            }
            State::Uninitialized => {
                tracing::info!("runtime disposed before initialization");
                true
            }
        }
    }
}

impl std::fmt::Debug for RuntimeHandleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandleManager")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReferenceBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_manager() -> (RuntimeHandleManager, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&created);
        let manager = RuntimeHandleManager::new(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ReferenceBackend::new()) as Box<dyn ExecutionBackend>)
        }));
        (manager, created)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (mut m, created) = counting_manager();
        assert_eq!(m.state(), HandleState::Uninitialized);
        let a = m.initialize().unwrap();
        let b = m.initialize().unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(m.state(), HandleState::Ready);
        assert!(m.backend(&a).is_ok());
    }

    #[test]
    fn test_dispose_is_terminal() {
        let (mut m, _) = counting_manager();
        let h = m.initialize().unwrap();
        assert!(m.dispose());
        assert!(!m.dispose());
        assert_eq!(m.state(), HandleState::Disposed);

        assert!(matches!(m.backend(&h), Err(RuntimeError::RuntimeDisposed)));
        assert!(matches!(m.initialize(), Err(RuntimeError::RuntimeDisposed)));
        assert!(matches!(m.handle(), Err(RuntimeError::RuntimeDisposed)));
    }

    #[test]
    fn test_uninitialized_errors() {
        let (m, created) = counting_manager();
        assert!(matches!(m.handle(), Err(RuntimeError::NotInitialized)));
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let (mut a, _) = counting_manager();
        let (mut b, _) = counting_manager();
        let _ = a.initialize().unwrap();
        let hb = b.initialize().unwrap();
        assert!(matches!(a.backend(&hb), Err(RuntimeError::RuntimeDisposed)));
    }

    #[test]
    fn test_factory_failure_stays_uninitialized() {
        let mut m = RuntimeHandleManager::new(Box::new(|| -> Result<Box<dyn ExecutionBackend>, RuntimeError> {
            Err(RuntimeError::ExecutionError("no device".into()))
        }));
        assert!(m.initialize().is_err());
        assert_eq!(m.state(), HandleState::Uninitialized);
    }
}
