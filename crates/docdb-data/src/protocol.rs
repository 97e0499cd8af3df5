//! Write phases and the lock that serializes them.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tracing::warn;

use crate::error::{DataError, DataResult, ListenerErrors};
use crate::options::{Hook, HookResult};

/// Where the engine currently is in a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WritePhase {
    /// No write holds the lock.
    #[default]
    Idle,
    /// Listeners and anticipate hooks are running; nothing has changed yet.
    Anticipating,
    /// The store batch is being built and applied.
    Committing,
}

#[derive(Default)]
struct GateState {
    phase: WritePhase,
    owner: Option<ThreadId>,
}

/// Serializes writers and tracks the active phase.
///
/// The inner mutexes guard no data that a panic could leave half-updated,
/// so poisoning is ignored.
#[derive(Default)]
pub(crate) struct WriteGate {
    lock: Mutex<()>,
    state: Mutex<GateState>,
}

impl WriteGate {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> WritePhase {
        self.state().phase
    }

    /// Take the write lock and enter [`WritePhase::Anticipating`].
    ///
    /// A thread that already holds the lock would deadlock here, so it gets
    /// [`DataError::ReentrantWrite`] instead.
    pub(crate) fn enter(&self) -> DataResult<WriteGuard<'_>> {
        let me = thread::current().id();
        if self.state().owner == Some(me) {
            return Err(DataError::ReentrantWrite);
        }
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.state();
            state.phase = WritePhase::Anticipating;
            state.owner = Some(me);
        }
        Ok(WriteGuard { gate: self, _lock: lock })
    }
}

/// Held for the anticipate and commit phases of one write.
pub(crate) struct WriteGuard<'a> {
    gate: &'a WriteGate,
    _lock: MutexGuard<'a, ()>,
}

impl WriteGuard<'_> {
    pub(crate) fn commit_phase(&self) {
        self.gate.state().phase = WritePhase::Committing;
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state();
        state.phase = WritePhase::Idle;
        state.owner = None;
    }
}

/// Run anticipation callbacks in order, stopping at the first veto.
pub(crate) fn anticipate<'a>(
    checks: impl IntoIterator<Item = Hook<'a>>,
) -> DataResult<()> {
    for check in checks {
        check().map_err(DataError::AnticipationAborted)?;
    }
    Ok(())
}

/// Collects post-commit callback failures without stopping delivery.
#[derive(Default)]
pub(crate) struct Notifier {
    errors: Vec<anyhow::Error>,
}

impl Notifier {
    pub(crate) fn record(&mut self, result: HookResult) {
        if let Err(error) = result {
            warn!(error = %format!("{error:#}"), "post-commit callback failed");
            self.errors.push(error);
        }
    }

    pub(crate) fn finish(self) -> DataResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::ListenerFailure(ListenerErrors::new(self.errors)))
        }
    }
}
