//! Live-end maps with reconnect hand-off.
//!
//! At most one end per id is live. When a second connection claims a live
//! id, the older end is closed and the newcomer waits on a rendezvous keyed
//! `{role}-{id}-{old addr}` until the older end's offline path has run to
//! completion. Offline removes an entry only when the stored end is the one
//! going away, so a stale offline never evicts a fresh reconnect.
//!
//! A predecessor whose offline does not finish within the rendezvous bound
//! is handed back to the caller as an orphan: its later offline is stale and
//! will skip cleanup, so the caller clears its rows instead.

use network::End;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct LiveEnds {
    role: &'static str,
    rendezvous_timeout: Duration,
    ends: Mutex<HashMap<u64, End>>,
    rendezvous: Mutex<HashMap<String, watch::Sender<bool>>>,
}

/// Outcome of [`LiveEnds::admit`]
#[derive(Debug)]
pub(crate) struct Admission {
    /// Live ends after the insert
    pub(crate) count: usize,
    /// Displaced end whose offline never completed
    pub(crate) orphan: Option<End>,
}

impl LiveEnds {
    pub(crate) fn new(role: &'static str) -> Self {
        Self::with_rendezvous_timeout(role, RENDEZVOUS_TIMEOUT)
    }

    pub(crate) fn with_rendezvous_timeout(role: &'static str, rendezvous_timeout: Duration) -> Self {
        Self {
            role,
            rendezvous_timeout,
            ends: Mutex::new(HashMap::new()),
            rendezvous: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, id: u64, addr: &str) -> String {
        format!("{}-{}-{}", self.role, id, addr)
    }

    /// Make `end` the live end of its id, displacing any predecessor
    pub(crate) async fn admit(&self, end: &End) -> Admission {
        let id = end.client_id();
        loop {
            let (previous, mut released) = {
                let mut ends = self.ends.lock();
                match ends.get(&id) {
                    Some(old) if !old.same(end) => {
                        let old = old.clone();
                        let key = self.key(id, old.remote_addr());
                        let released = self
                            .rendezvous
                            .lock()
                            .entry(key)
                            .or_insert_with(|| watch::channel(false).0)
                            .subscribe();
                        (old, released)
                    }
                    _ => {
                        ends.insert(id, end.clone());
                        return Admission {
                            count: ends.len(),
                            orphan: None,
                        };
                    }
                }
            };

            info!(
                role = self.role,
                id,
                old_addr = %previous.remote_addr(),
                new_addr = %end.remote_addr(),
                "displacing live end"
            );
            previous.close();

            let handed_off = matches!(
                tokio::time::timeout(self.rendezvous_timeout, released.wait_for(|r| *r)).await,
                Ok(Ok(_))
            );
            if !handed_off {
                warn!(
                    role = self.role,
                    id,
                    old_addr = %previous.remote_addr(),
                    "predecessor offline timed out, replacing"
                );
                self.rendezvous
                    .lock()
                    .remove(&self.key(id, previous.remote_addr()));
                let mut ends = self.ends.lock();
                // Only the predecessor we waited on is replaced; a racing admit keeps its slot
                match ends.get(&id) {
                    Some(stored) if stored.same(&previous) => {
                        ends.insert(id, end.clone());
                        return Admission {
                            count: ends.len(),
                            orphan: Some(previous),
                        };
                    }
                    _ => continue,
                }
            }
        }
    }

    /// Remove `end` if it is the stored end for its id
    pub(crate) fn retire(&self, end: &End) -> bool {
        let mut ends = self.ends.lock();
        match ends.get(&end.client_id()) {
            Some(stored) if stored.remote_addr() == end.remote_addr() => {
                ends.remove(&end.client_id());
                true
            }
            _ => false,
        }
    }

    /// Wake a successor waiting on `end`'s hand-off
    pub(crate) fn release(&self, end: &End) {
        let key = self.key(end.client_id(), end.remote_addr());
        if let Some(tx) = self.rendezvous.lock().remove(&key) {
            tx.send_replace(true);
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<End> {
        self.ends.lock().get(&id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<End> {
        let mut ends: Vec<End> = self.ends.lock().values().cloned().collect();
        ends.sort_by_key(|end| end.client_id());
        ends
    }

    pub(crate) fn len(&self) -> usize {
        self.ends.lock().len()
    }

    /// Close every live end
    pub(crate) fn close_all(&self) {
        for end in self.list() {
            end.close();
        }
    }

    #[cfg(test)]
    fn pending_rendezvous(&self) -> usize {
        self.rendezvous.lock().len()
    }
}
