//! Per-thread cache of remote file-system clients with timestamp-tombstone
//! invalidation, mirroring the coherence protocol a multi-worker sync
//! engine needs: each worker thread keeps its own client instances, but a
//! config change on any thread must force every thread to rebuild theirs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::CoreError;
use crate::remote::RemoteFileSystemClient;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub server_url: String,
    pub remote_user: String,
    pub device_id: String,
}

thread_local! {
    static CLIENTS: RefCell<HashMap<CacheKey, (Arc<dyn RemoteFileSystemClient>, i64)>> =
        RefCell::new(HashMap::new());
}

/// Global invalidation timestamps, one per key, shared across threads.
/// Absent from the map means "never invalidated" (tombstone `0`).
pub struct ClientCache {
    tombstones: Mutex<HashMap<CacheKey, i64>>,
}

impl ClientCache {
    pub fn new() -> Self {
        ClientCache {
            tombstones: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached client for `key` on the calling thread if it is
    /// still fresh, otherwise calls `builder` to construct a new one and
    /// stamps it with the current time.
    pub fn get_or_create<F>(
        &self,
        key: &CacheKey,
        builder: F,
    ) -> Result<Arc<dyn RemoteFileSystemClient>, CoreError>
    where
        F: FnOnce() -> Result<Arc<dyn RemoteFileSystemClient>, CoreError>,
    {
        let tombstone = {
            let mut guard = self.tombstones.lock().unwrap();
            *guard.entry(key.clone()).or_insert(0)
        };

        let cached = CLIENTS.with(|cell| cell.borrow().get(key).cloned());
        if let Some((client, stamped_at)) = cached {
            if stamped_at >= tombstone {
                return Ok(client);
            }
        }

        let client = builder()?;
        let now = now_epoch_seconds();
        CLIENTS.with(|cell| {
            cell.borrow_mut().insert(key.clone(), (client.clone(), now));
        });
        Ok(client)
    }

    /// Forces every thread's next `get_or_create` for the matching keys to
    /// rebuild. `server_url = None` invalidates every known key.
    pub fn invalidate(&self, server_url: Option<&str>) {
        let now = now_epoch_seconds();
        let mut guard = self.tombstones.lock().unwrap();
        for (key, stamp) in guard.iter_mut() {
            match server_url {
                None => *stamp = now,
                Some(url) if key.server_url == url => *stamp = now,
                Some(_) => {}
            }
        }
    }
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MockRemoteClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> CacheKey {
        CacheKey {
            server_url: "https://example.com/".to_string(),
            remote_user: "alice".to_string(),
            device_id: "device-1".to_string(),
        }
    }

    #[test]
    fn second_call_reuses_cached_client() {
        let cache = ClientCache::new();
        let builds = AtomicUsize::new(0);
        let key = key();

        for _ in 0..3 {
            cache
                .get_or_create(&key, || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
                })
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let cache = ClientCache::new();
        let builds = AtomicUsize::new(0);
        let key = key();

        cache
            .get_or_create(&key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
            })
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        // Tombstone timestamps have one-second resolution; without a sleep
        // an immediate invalidate could tie with the stamp just written.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.invalidate(Some(&key.server_url));

        cache
            .get_or_create(&key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
            })
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_by_other_server_does_not_affect_key() {
        let cache = ClientCache::new();
        let builds = AtomicUsize::new(0);
        let key = key();

        cache
            .get_or_create(&key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
            })
            .unwrap();
        cache.invalidate(Some("https://other.example.com/"));

        cache
            .get_or_create(&key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
            })
            .unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cache_is_per_thread() {
        let cache = Arc::new(ClientCache::new());
        let key = key();
        let builds = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_create(&key, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockRemoteClient::new(&key.server_url)))
            })
            .unwrap();

        let cache2 = cache.clone();
        let builds2 = builds.clone();
        let key2 = key.clone();
        std::thread::spawn(move || {
            cache2
                .get_or_create(&key2, || {
                    builds2.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(MockRemoteClient::new(&key2.server_url)))
                })
                .unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }
}
