//! Session observers
//!
//! Observers are plain callbacks invoked by the session actor, synchronously,
//! after every state change. `SessionView` adapts them to a `watch` channel
//! for async consumers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_protocol::StreamState;
use tokio::sync::watch;

use crate::error::ManagerError;

pub type Observer = Arc<dyn Fn(Arc<StreamState>) + Send + Sync>;

#[derive(Default)]
struct ObserverList {
    next_id: u64,
    entries: Vec<(u64, Observer)>,
}

/// Callbacks registered for one session (cheap to Clone).
#[derive(Clone, Default)]
pub struct ObserverSet {
    inner: Arc<Mutex<ObserverList>>,
}

impl ObserverSet {
    fn lock(&self) -> MutexGuard<'_, ObserverList> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, observer: Observer) -> Subscription {
        self.add_primed(observer, |_| {})
    }

    /// Register an observer and run `prime` on it before any notification
    /// can reach it.
    pub fn add_primed(&self, observer: Observer, prime: impl FnOnce(&Observer)) -> Subscription {
        let mut list = self.lock();
        prime(&observer);
        let id = list.next_id;
        list.next_id += 1;
        list.entries.push((id, observer));
        Subscription {
            id,
            observers: Some(self.clone()),
        }
    }

    fn remove(&self, id: u64) {
        self.lock().entries.retain(|(entry_id, _)| *entry_id != id);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every observer with `state`. Callbacks run outside the lock.
    pub fn notify(&self, state: &Arc<StreamState>) {
        let observers: Vec<Observer> = self
            .lock()
            .entries
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(state.clone());
        }
    }
}

/// Keeps an observer registered until dropped or `unsubscribe`d.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    observers: Option<ObserverSet>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(observers) = self.observers.take() {
            observers.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Async view of one session's state.
pub struct SessionView {
    rx: watch::Receiver<Arc<StreamState>>,
    _subscription: Subscription,
}

impl SessionView {
    /// Subscribe to `observers`, seeding the view with `current()`.
    ///
    /// The seed is read while registration is in progress, so no update
    /// between the read and the first notification is lost.
    pub(crate) fn attach(
        observers: &ObserverSet,
        current: impl FnOnce() -> Arc<StreamState>,
    ) -> Self {
        let (tx, mut rx) = watch::channel(Arc::new(StreamState::default()));
        let observer: Observer = Arc::new(move |state| {
            tx.send_replace(state);
        });
        let subscription = observers.add_primed(observer, |observer| observer(current()));
        rx.borrow_and_update();
        Self {
            rx,
            _subscription: subscription,
        }
    }

    pub fn current(&self) -> Arc<StreamState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state.
    pub async fn changed(&mut self) -> Result<Arc<StreamState>, ManagerError> {
        self.rx
            .changed()
            .await
            .map_err(|_| ManagerError::ActorGone("view".to_string()))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the state satisfies `predicate`, checking the current
    /// state first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&StreamState) -> bool,
    ) -> Result<Arc<StreamState>, ManagerError> {
        let state = self
            .rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| ManagerError::ActorGone("view".to_string()))?;
        Ok(state.clone())
    }
}
