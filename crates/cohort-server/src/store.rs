//! Async front for the synchronous store.
//!
//! A fixed set of SQLite connections is opened at startup. Each call runs on
//! the blocking thread pool against the first idle connection and is bounded
//! by a timeout; a call that exceeds it is reported as unavailable (the
//! blocking work itself runs to completion in the background).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cohort_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    inner: Arc<Pool>,
}

struct Pool {
    conns: Vec<Mutex<Database>>,
    next: AtomicUsize,
    timeout: Duration,
}

impl Store {
    pub fn open(path: &Path, size: usize, timeout: Duration) -> Result<Self, StoreError> {
        let size = size.max(1);
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            conns.push(Mutex::new(Database::open_with_timeout(path, timeout)?));
        }

        tracing::info!(path = %path.display(), connections = size, "store opened");

        Ok(Self {
            inner: Arc::new(Pool {
                conns,
                next: AtomicUsize::new(0),
                timeout,
            }),
        })
    }

    /// Run `f` against a pooled connection.
    pub async fn call<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&mut Database) -> cohort_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.inner.clone();
        let timeout = pool.timeout;
        let task = tokio::task::spawn_blocking(move || {
            let mut db = pool.checkout();
            f(&mut *db)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map_err(ServerError::from),
            Ok(Err(join_err)) => Err(ServerError::Unavailable(format!(
                "store worker failed: {join_err}"
            ))),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "store call timed out");
                Err(ServerError::Unavailable("store call timed out".into()))
            }
        }
    }
}

impl Pool {
    /// First idle connection, starting from a rotating offset; blocks on
    /// that starting connection when all are busy.
    fn checkout(&self) -> MutexGuard<'_, Database> {
        let n = self.conns.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;

        for i in 0..n {
            if let Ok(guard) = self.conns[(start + i) % n].try_lock() {
                return guard;
            }
        }

        // A panic mid-call leaves SQLite consistent (open transactions roll
        // back on drop), so a poisoned connection is still usable.
        self.conns[start]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_shared::ErrorCode;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_calls_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("pool.db"), 3, Duration::from_secs(5)).unwrap();
        let id = Uuid::new_v4();

        store
            .call(move |db| db.upsert_user(id, "Ada", None))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.call(move |db| db.get_user(id)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().name, "Ada");
        }
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Store::open(&dir.path().join("slow.db"), 1, Duration::from_millis(50)).unwrap();

        let err = store
            .call(|_db| {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn test_domain_errors_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("err.db"), 1, Duration::from_secs(5)).unwrap();

        let err = store
            .call(|db| db.get_room(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
