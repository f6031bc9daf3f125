use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use log::debug;
use protocol::Operation;
use tokio::task::AbortHandle;

use crate::completion::{Callback, Completions};
use crate::decoder::TypedResult;
use crate::Error;

pub type CallId = u64;

pub(crate) struct PendingCall {
    pub id: CallId,
    pub operation: Operation,
    pub callback: Callback,
    /// Encoded request, kept for resending after a reconnect.
    pub frame: Bytes,
    pub submitted_at: Instant,
    pub deadline: Instant,
    pub timer: Option<AbortHandle>,
}

impl PendingCall {
    pub fn resolve(self, completions: &Completions, result: Result<TypedResult, Error>) {
        let PendingCall {
            id,
            operation,
            callback,
            submitted_at,
            timer,
            ..
        } = self;

        if let Some(timer) = timer {
            timer.abort();
        }

        match &result {
            Ok(_) => debug!("Call {} ({}) completed in {:?}", id, operation, submitted_at.elapsed()),
            Err(e) => debug!("Call {} ({}) failed after {:?}: {}", id, operation, submitted_at.elapsed(), e),
        }

        completions.deliver(callback, result);
    }

    /// Drops the call without running its callback.
    pub fn discard(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

struct Table {
    calls: HashMap<CallId, PendingCall>,
    closed: bool,
}

/// In-flight calls keyed by correlation id. Resolving a call means taking it
/// out of the table first, so exactly one party ever owns its callback.
pub(crate) struct Registry {
    table: Mutex<Table>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                calls: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a call; hands it back if the registry is already closed.
    pub fn insert(&self, call: PendingCall) -> Result<(), PendingCall> {
        let mut table = self.lock();
        if table.closed {
            return Err(call);
        }
        table.calls.insert(call.id, call);
        Ok(())
    }

    /// Ties a deadline timer to a call. The timer is stopped right away if
    /// the call already settled.
    pub fn attach_timer(&self, id: CallId, timer: AbortHandle) {
        match self.lock().calls.get_mut(&id) {
            Some(call) => call.timer = Some(timer),
            None => timer.abort(),
        }
    }

    pub fn take(&self, id: CallId) -> Option<PendingCall> {
        self.lock().calls.remove(&id)
    }

    pub fn frame(&self, id: CallId) -> Option<Bytes> {
        self.lock().calls.get(&id).map(|call| call.frame.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    /// Drops every id whose call is no longer pending.
    pub fn retain_pending(&self, ids: &mut BTreeSet<CallId>) {
        let table = self.lock();
        ids.retain(|id| table.calls.contains_key(id));
    }

    /// Frames of the given calls that are still pending, in id order.
    pub fn frames(&self, ids: &BTreeSet<CallId>) -> Vec<(CallId, Bytes)> {
        let table = self.lock();
        ids.iter()
            .filter_map(|id| table.calls.get(id).map(|call| (*id, call.frame.clone())))
            .collect()
    }

    /// Takes the given calls, skipping those already resolved.
    pub fn take_all(&self, ids: impl IntoIterator<Item = CallId>) -> Vec<PendingCall> {
        let mut table = self.lock();
        ids.into_iter()
            .filter_map(|id| table.calls.remove(&id))
            .collect()
    }

    /// Refuses further inserts and returns everything still pending.
    pub fn close(&self) -> Vec<PendingCall> {
        let mut table = self.lock();
        table.closed = true;
        table.calls.drain().map(|(_, call)| call).collect()
    }
}
