//! The `token → server` map (spec §4.7): tracks every live session so a
//! duplicate token can evict the stale one and so `close()` can tear down
//! every session under a single lock before closing the listening socket.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch, Mutex};

/// What the registry keeps per session: enough to cancel it and to route
/// downlink packets arriving on the shared tunnel to the right session.
struct Entry {
    id: u64,
    shutdown: watch::Sender<bool>,
    downlink: mpsc::Sender<Vec<u8>>,
    address: Ipv4Addr,
}

#[derive(Default)]
pub struct Registry {
    by_token: Mutex<HashMap<Vec<u8>, Entry>>,
    by_address: Mutex<HashMap<Ipv4Addr, Vec<u8>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted session, returning its session id.
    /// If `token` was already present (spec §4.7: "duplicate tokens evict
    /// the old entry"), the previous session's shutdown signal is fired
    /// first. The returned id must be passed back to [`Self::deregister`]
    /// so a session evicted this way can't delete its evictor's entry once
    /// its own task finally notices the shutdown signal (spec scenario
    /// S6: "only the second session stays active").
    pub async fn register(&self, token: Vec<u8>, address: Ipv4Addr, shutdown: watch::Sender<bool>, downlink: mpsc::Sender<Vec<u8>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut by_token = self.by_token.lock().await;
        if let Some(previous) = by_token.insert(token.clone(), Entry { id, shutdown, downlink, address }) {
            let _ = previous.shutdown.send(true);
            self.by_address.lock().await.remove(&previous.address);
        }
        self.by_address.lock().await.insert(address, token);
        id
    }

    /// Removes the entry for `token`, but only if it's still the one
    /// registered under `id` — a compare-and-remove that protects a
    /// session which evicted this one (see [`Self::register`]) from having
    /// its live entry deleted by the evicted session's delayed teardown.
    pub async fn deregister(&self, token: &[u8], id: u64) {
        let mut by_token = self.by_token.lock().await;
        if let std::collections::hash_map::Entry::Occupied(occupied) = by_token.entry(token.to_vec()) {
            if occupied.get().id != id {
                return;
            }
            let removed = occupied.remove();
            self.by_address.lock().await.remove(&removed.address);
        }
    }

    /// Routes a downlink packet (read off the shared tunnel) to the
    /// session whose assigned address matches the packet's destination.
    pub async fn route(&self, destination: Ipv4Addr, payload: Vec<u8>) {
        let token = { self.by_address.lock().await.get(&destination).cloned() };
        if let Some(token) = token {
            let sender = self.by_token.lock().await.get(&token).map(|entry| entry.downlink.clone());
            if let Some(sender) = sender {
                let _ = sender.send(payload).await;
            }
        }
    }

    /// Closes every live session under a single lock, then clears the
    /// address map (spec §4.7's `close()`).
    pub async fn close_all(&self) {
        let mut by_token = self.by_token.lock().await;
        for (_, entry) in by_token.drain() {
            let _ = entry.shutdown.send(true);
        }
        self.by_address.lock().await.clear();
    }
}
