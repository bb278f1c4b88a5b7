use parking_lot::{Mutex, MutexGuard};

use crate::manager::ManagerState;

/// Scoped drain context owning the manager lock.
///
/// The drain releases the lock around every external call (remote fetches,
/// loader dispatch, observer notification) and re-acquires it afterwards;
/// code resuming after a release must revalidate what it looked up before.
/// Both operations are idempotent so nested call chains can release and
/// re-acquire freely.
pub(crate) struct Transaction<'a> {
    mutex: &'a Mutex<ManagerState>,
    guard: Option<MutexGuard<'a, ManagerState>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        mutex: &'a Mutex<ManagerState>,
        guard: MutexGuard<'a, ManagerState>,
    ) -> Self {
        Self {
            mutex,
            guard: Some(guard),
        }
    }

    /// The locked manager state. Panics if called while released.
    pub(crate) fn state(&mut self) -> &mut ManagerState {
        self.guard.as_mut().expect("transaction lock held")
    }

    /// Releases the manager lock. No-op when already released.
    pub(crate) fn release_lock(&mut self) {
        self.guard = None;
    }

    /// Re-acquires the manager lock. No-op when already held.
    pub(crate) fn acquire_lock(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.mutex.lock());
        }
    }
}
