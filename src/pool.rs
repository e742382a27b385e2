//! Client pools
//!
//! A [`Client`] serves one caller at a time, so concurrent callers each need
//! their own clone. [`ClientPool`] hands out pre-made clones and takes them
//! back when the guard drops; [`ThreadMappedPool`] keeps one clone per
//! thread.

use crate::client::Client;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct PoolInner {
    idle: Mutex<Vec<Client>>,
    available: Condvar,
}

impl PoolInner {
    fn put_back(&self, client: Client) {
        self.idle.lock().push(client);
        self.available.notify_one();
    }
}

/// A fixed set of clients shared between callers
#[derive(Clone)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                available: Condvar::new(),
            }),
        }
    }

    /// Pool holding `n` clones of `client`
    pub fn with_clients(client: &Client, n: usize) -> Self {
        let pool = Self::new();
        pool.fill(client, n);
        pool
    }

    /// Add `n` clones of `client`
    pub fn fill(&self, client: &Client, n: usize) {
        let mut idle = self.inner.idle.lock();
        idle.extend((0..n).map(|_| client.clone()));
        debug!(added = n, idle = idle.len(), "pool filled");
        drop(idle);
        self.inner.available.notify_all();
    }

    /// Clients not currently reserved
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Take a client, waiting up to `timeout` (forever with `None`)
    pub fn reserve(&self, timeout: Option<Duration>) -> Result<PooledClient> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut idle = self.inner.idle.lock();

        loop {
            if let Some(client) = idle.pop() {
                trace!(idle = idle.len(), "client reserved");
                return Ok(PooledClient {
                    client: Some(client),
                    pool: Arc::clone(&self.inner),
                });
            }

            match deadline {
                Some(deadline) => {
                    if self.inner.available.wait_until(&mut idle, deadline).timed_out()
                        && idle.is_empty()
                    {
                        return Err(Error::PoolTimeout(timeout.unwrap_or_default()));
                    }
                }
                None => self.inner.available.wait(&mut idle),
            }
        }
    }

    /// Take a client only if one is idle right now
    pub fn try_reserve(&self) -> Option<PooledClient> {
        let client = self.inner.idle.lock().pop()?;
        Some(PooledClient {
            client: Some(client),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Run `f` with a reserved client on tokio's blocking pool.
    ///
    /// The client and everything `f` captures move onto the blocking thread
    /// and the client goes back to the pool when `f` returns.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = pool.reserve(None)?;
            f(&mut client)
        })
        .await
        .map_err(|e| Error::Internal(format!("pooled task failed: {e}")))?
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A reserved client; returned to its pool on drop
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client is present until drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("client is present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.put_back(client);
        }
    }
}

/// One client per thread, cloned from a master on first use
pub struct ThreadMappedPool {
    master: Mutex<Client>,
    clients: Mutex<HashMap<ThreadId, Client>>,
}

impl ThreadMappedPool {
    pub fn new(master: Client) -> Self {
        Self {
            master: Mutex::new(master),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The calling thread's client
    pub fn reserve(&self) -> ThreadClient<'_> {
        let id = thread::current().id();
        let existing = self.clients.lock().remove(&id);
        let client = match existing {
            Some(client) => client,
            None => {
                trace!(thread = ?id, "cloning client for thread");
                self.master.lock().clone()
            }
        };

        ThreadClient {
            pool: self,
            id,
            client: Some(client),
        }
    }

    /// Drop the calling thread's client; the next reserve clones a new one
    pub fn relinquish(&self) -> Option<Client> {
        self.clients.lock().remove(&thread::current().id())
    }

    /// Threads currently holding a client
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

/// A thread's client; parked back in its pool on drop
pub struct ThreadClient<'a> {
    pool: &'a ThreadMappedPool,
    id: ThreadId,
    client: Option<Client>,
}

impl Deref for ThreadClient<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client is present until drop")
    }
}

impl DerefMut for ThreadClient<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("client is present until drop")
    }
}

impl Drop for ThreadClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.clients.lock().insert(self.id, client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;

    #[test]
    fn test_reserve_and_return() {
        let client = Client::in_memory().unwrap();
        let pool = ClientPool::with_clients(&client, 2);
        assert_eq!(pool.idle(), 2);

        {
            let mut a = pool.reserve(None).unwrap();
            let _b = pool.try_reserve().unwrap();
            assert_eq!(pool.idle(), 0);
            assert!(pool.try_reserve().is_none());
            a.set("k", 1).unwrap();
        }
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_reserve_timeout() {
        let pool = ClientPool::new();
        let err = pool.reserve(Some(Duration::from_millis(20))).err().unwrap();
        assert!(matches!(err, Error::PoolTimeout(_)));
    }

    #[test]
    fn test_reserve_waits_for_return() {
        let client = Client::in_memory().unwrap();
        let pool = ClientPool::with_clients(&client, 1);
        let held = pool.reserve(None).unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.reserve(Some(Duration::from_secs(5))).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[tokio::test]
    async fn test_run_on_blocking_pool() {
        let client = Client::in_memory().unwrap();
        let pool = ClientPool::with_clients(&client, 2);

        pool.run(|c| c.set("k", "v")).await.unwrap();
        let value = pool.run(|c| c.get("k")).await.unwrap();
        assert_eq!(value, Some(Value::from("v")));
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_thread_mapped() {
        let pool = ThreadMappedPool::new(Client::in_memory().unwrap());
        pool.reserve().set("k", 1).unwrap();
        assert_eq!(pool.len(), 1);
        // Same thread, same client slot
        pool.reserve().get("k").unwrap();
        assert_eq!(pool.len(), 1);

        thread::scope(|s| {
            s.spawn(|| {
                let value = pool.reserve().get("k").unwrap();
                assert_eq!(value, Some(Value::Int(1)));
            });
        });
        assert_eq!(pool.len(), 2);

        assert!(pool.relinquish().is_some());
        assert_eq!(pool.len(), 1);
    }
}
