//! In-flight request bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::identity::RequestIdentity;
use crate::transport::TransportHandle;

const TARGET: &str = "lattice_request::registry";

/// Proof of one registration under an identity.
///
/// Completion only clears an entry while it still carries the same ticket, so
/// a cancelled call cannot remove the bookkeeping of the call that replaced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct Entry {
    ticket: Ticket,
    handle: TransportHandle,
}

/// Tracks in-flight calls by [`RequestIdentity`].
///
/// A new call is refused while its identity is pending. The only exception
/// is a replay after a token refresh, which is registered next to any live
/// call with the same identity so that both stay cancellable.
///
/// Cancellation only signals the transport abort; the caller is rejected when
/// the aborted call reports back.
#[derive(Default)]
pub struct RequestRegistry {
    entries: Mutex<HashMap<RequestIdentity, Vec<Entry>>>,
    next_ticket: AtomicU64,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call under `identity`.
    ///
    /// Returns `None` when the identity is already pending, unless `replay` is
    /// set.
    pub fn begin(
        &self,
        identity: &RequestIdentity,
        handle: TransportHandle,
        replay: bool,
    ) -> Option<Ticket> {
        let mut entries = self.entries.lock();
        let slot = entries.entry(identity.clone()).or_default();
        if !slot.is_empty() && !replay {
            return None;
        }

        let ticket = Ticket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        slot.push(Entry { ticket, handle });
        Some(ticket)
    }

    /// Clear the registration carrying `ticket`, if it is still there.
    pub fn finish(&self, identity: &RequestIdentity, ticket: Ticket) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(identity) {
            slot.retain(|entry| entry.ticket != ticket);
            if slot.is_empty() {
                entries.remove(identity);
            }
        }
    }

    /// Abort and forget every call registered under `identity`.
    ///
    /// Returns `true` if there was one.
    pub fn cancel(&self, identity: &RequestIdentity) -> bool {
        let slot = self.entries.lock().remove(identity);
        match slot {
            Some(slot) => {
                abort_all(identity, &slot);
                true
            }
            None => false,
        }
    }

    /// Abort and forget every call. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(RequestIdentity, Vec<Entry>)> = self.entries.lock().drain().collect();
        drained
            .iter()
            .map(|(identity, slot)| abort_all(identity, slot))
            .sum()
    }

    /// Abort and forget every call whose identity contains `fragment`.
    pub fn cancel_by_url_fragment(&self, fragment: &str) -> usize {
        let matched: Vec<(RequestIdentity, Vec<Entry>)> = {
            let mut entries = self.entries.lock();
            let keys: Vec<RequestIdentity> = entries
                .keys()
                .filter(|identity| identity.contains(fragment))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|slot| (key, slot)))
                .collect()
        };

        matched
            .iter()
            .map(|(identity, slot)| abort_all(identity, slot))
            .sum()
    }

    /// Check if a call is registered under `identity`.
    pub fn is_pending(&self, identity: &RequestIdentity) -> bool {
        self.entries.lock().contains_key(identity)
    }

    /// Number of registered calls.
    pub fn in_flight_count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

fn abort_all(identity: &RequestIdentity, slot: &[Entry]) -> usize {
    for entry in slot {
        entry.handle.abort();
    }
    tracing::debug!(target: TARGET, "Cancelled {} ({} call(s))", identity, slot.len());
    slot.len()
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}
