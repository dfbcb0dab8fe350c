use crate::error::RegistryError;
use crate::outbound::Outbound;
use relaychat::protocol::Event;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locally connected, logged-in clients: username → outbound queue.
///
/// One mutex guards the whole map. Broadcasts hold it for a single pass of
/// non-blocking enqueues, so the hold time never depends on a slow client.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Outbound<Event>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Outbound<Event>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `name` for `handle`. Fails without touching the map if the name is in use.
    pub fn register(&self, name: &str, handle: Outbound<Event>) -> Result<(), RegistryError> {
        let mut sessions = self.lock();
        if sessions.contains_key(name) {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        sessions.insert(name.to_string(), handle);
        Ok(())
    }

    /// Release `name` if it is still held by `handle`. Idempotent; a name
    /// already dropped by a failed broadcast and claimed again by a new
    /// session is left alone.
    pub fn unregister(&self, name: &str, handle: &Outbound<Event>) -> bool {
        let mut sessions = self.lock();
        match sessions.get(name) {
            Some(current) if current.same_channel(handle) => {
                sessions.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Deliver `event` to every session except `exclude`. Sessions whose queue
    /// rejects the event are removed and closed once the pass is complete.
    /// Returns the number of sessions the event was queued for.
    pub fn broadcast(&self, event: &Event, exclude: Option<&str>) -> usize {
        let mut sessions = self.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (name, handle) in sessions.iter() {
            if exclude == Some(name.as_str()) {
                continue;
            }
            match handle.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(username = %name, err = %e, "dropping unreachable session");
                    dead.push(name.clone());
                }
            }
        }

        for name in dead {
            if let Some(handle) = sessions.remove(&name) {
                handle.close();
            }
        }
        delivered
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered usernames, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
