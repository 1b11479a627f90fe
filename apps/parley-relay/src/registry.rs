use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::gauge;
use parking_lot::Mutex;
use parley_proto::UserId;
use tracing::debug;

use crate::session::SessionHandle;

/// The set of users currently mapped to a live session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet(BTreeSet<UserId>);

impl PresenceSet {
    pub fn contains(&self, user: &UserId) -> bool {
        self.0.contains(user)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.0.iter()
    }

    /// Sorted list as sent on the wire.
    pub fn to_vec(&self) -> Vec<UserId> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<UserId> for PresenceSet {
    fn from_iter<I: IntoIterator<Item = UserId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Receives the full presence snapshot after every registry mutation.
///
/// Called while the registry's mutation gate is held, so implementations must
/// not call back into the registry's mutating methods.
pub trait PresenceListener: Send + Sync {
    fn presence_changed(&self, presence: &PresenceSet);
}

/// Process-wide mapping from user identity to the session currently serving it.
///
/// Reads go straight to the map. Every mutation, together with the presence
/// snapshot and listener notification it triggers, runs inside one critical
/// section so notifications are observed in mutation order.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    sessions: DashMap<UserId, SessionHandle>,
    gate: Mutex<()>,
    listener: Arc<dyn PresenceListener>,
}

impl SessionRegistry {
    pub fn new(listener: Arc<dyn PresenceListener>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                gate: Mutex::new(()),
                listener,
            }),
        }
    }

    /// Maps `user` to `session`, replacing any previous mapping.
    pub fn register(&self, user: UserId, session: SessionHandle) {
        self.mutate(|sessions| {
            if let Some(previous) = sessions.insert(user.clone(), session) {
                debug!(user = %user, previous = %previous, session = %session, "session superseded");
            }
        });
    }

    /// Removes the mapping for `user`. Absent users are a no-op.
    pub fn unregister(&self, user: &UserId) {
        self.mutate(|sessions| {
            if sessions.remove(user).is_none() {
                debug!(user = %user, "unregister for absent user");
            }
        });
    }

    /// Removes the mapping for `user` only if it still points at `session`.
    ///
    /// Returns whether a mapping was removed. A disconnect from a connection
    /// that has since been superseded leaves the newer mapping in place.
    pub fn unregister_session(&self, user: &UserId, session: SessionHandle) -> bool {
        self.mutate(|sessions| {
            let removed = sessions
                .remove_if(user, |_, current| *current == session)
                .is_some();
            if !removed {
                debug!(user = %user, session = %session, "stale disconnect ignored");
            }
            removed
        })
    }

    /// Re-broadcasts the current presence without changing it.
    pub fn announce(&self) {
        self.mutate(|_| ());
    }

    pub fn lookup(&self, user: &UserId) -> Option<SessionHandle> {
        self.inner.sessions.get(user).map(|entry| *entry.value())
    }

    pub fn presence(&self) -> PresenceSet {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Drops every mapping; used when the relay stops.
    pub fn clear(&self) {
        self.mutate(|sessions| sessions.clear());
    }

    fn mutate<R>(&self, apply: impl FnOnce(&DashMap<UserId, SessionHandle>) -> R) -> R {
        let _gate = self.inner.gate.lock();
        let result = apply(&self.inner.sessions);
        let snapshot = self.presence();
        gauge!("parley_online_users", snapshot.len() as f64);
        self.inner.listener.presence_changed(&snapshot);
        result
    }
}
