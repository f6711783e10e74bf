//! The connection pool behind [Client](crate::Client).
//!
//! Admission is bounded by a semaphore sized to the larger of the
//! configured pool size and the server's `suggested_pool_concurrency`
//! (learned from the first connection). Idle connections are kept in a
//! slot table; a connection whose read loop dies removes itself from
//! the table through a weak back-reference, so the pool and its
//! connections never form a reference cycle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};

use edgedb_errors::Error;
use edgedb_protocol::codec::CodecRegistry;

use crate::builder::Config;
use crate::raw::{connect_stream, Connection, Stream};

pub(crate) type ConnectFuture = Pin<Box<dyn Future<Output = Result<Stream, Error>> + Send>>;

/// Produces an established (already TLS-wrapped) stream for a new
/// connection. Swappable so tests can serve connections in-memory.
pub(crate) type Connector = Arc<dyn Fn() -> ConnectFuture + Send + Sync>;

pub(crate) struct Pool {
    pub(crate) config: Config,
    registry: CodecRegistry,
    connector: Connector,
    semaphore: Arc<Semaphore>,
    effective_size: AtomicUsize,
    state: Mutex<PoolState>,
    init: OnceCell<()>,
}

struct PoolState {
    idle: HashMap<u64, Connection>,
    next_slot: u64,
}

/// A connection borrowed from the pool together with its admission
/// permit. Dropping it returns the connection (when it is still
/// usable) and always releases the permit.
pub(crate) struct PoolConnection {
    conn: Option<Connection>,
    slot: u64,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl Pool {
    pub fn new(config: &Config, registry: CodecRegistry) -> Arc<Pool> {
        let tls_config = config.clone();
        let connector: Connector = Arc::new(move || -> ConnectFuture {
            Box::pin(connect_stream_owned(tls_config.clone()))
        });
        Pool::with_connector(config, registry, connector)
    }

    pub fn with_connector(
        config: &Config,
        registry: CodecRegistry,
        connector: Connector,
    ) -> Arc<Pool> {
        Arc::new(Pool {
            config: config.clone(),
            registry,
            connector,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            effective_size: AtomicUsize::new(config.max_connections),
            state: Mutex::new(PoolState {
                idle: HashMap::new(),
                next_slot: 0,
            }),
            init: OnceCell::new(),
        })
    }

    /// Opens the first connection and sizes the pool to the server's
    /// suggestion when it is larger than the configured bound.
    pub async fn ensure_initialized(self: &Arc<Self>) -> Result<(), Error> {
        let pool = self.clone();
        self.init
            .get_or_try_init(move || async move {
                let (slot, conn) = pool.open_connection().await?;
                if let Some(suggested) = conn.suggested_pool_concurrency() {
                    let current = pool.effective_size.load(Ordering::Relaxed);
                    if suggested > current {
                        pool.semaphore.add_permits(suggested - current);
                        pool.effective_size.store(suggested, Ordering::Relaxed);
                    }
                }
                pool.state.lock().expect("pool state").idle.insert(slot, conn);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<PoolConnection, Error> {
        self.ensure_initialized().await?;
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        let idle = {
            let mut state = self.state.lock().expect("pool state");
            let slot = state.idle.keys().next().copied();
            slot.map(|slot| (slot, state.idle.remove(&slot).expect("slot present")))
        };
        let (slot, conn) = match idle {
            Some(pair) => pair,
            None => self.open_connection().await?,
        };
        Ok(PoolConnection {
            conn: Some(conn),
            slot,
            pool: self.clone(),
            _permit: permit,
        })
    }

    async fn open_connection(self: &Arc<Self>) -> Result<(u64, Connection), Error> {
        let slot = {
            let mut state = self.state.lock().expect("pool state");
            let slot = state.next_slot;
            state.next_slot += 1;
            slot
        };
        let stream = (self.connector)().await?;
        let weak: Weak<Pool> = Arc::downgrade(self);
        let hook = Box::new(move || {
            if let Some(pool) = weak.upgrade() {
                pool.remove_slot(slot);
            }
        });
        let conn =
            Connection::handshake(stream, &self.config, &self.registry, Some(hook)).await?;
        Ok((slot, conn))
    }

    fn release(&self, slot: u64, conn: Connection) {
        if conn.is_consistent() {
            self.state.lock().expect("pool state").idle.insert(slot, conn);
        }
        // an inconsistent connection is simply dropped, which also
        // aborts its read loop
    }

    fn remove_slot(&self, slot: u64) {
        self.state.lock().expect("pool state").idle.remove(&slot);
    }

    #[cfg(test)]
    pub(crate) fn effective_size(&self) -> usize {
        self.effective_size.load(Ordering::Relaxed)
    }
}

async fn connect_stream_owned(config: Config) -> Result<Stream, Error> {
    connect_stream(&config).await
}

impl PoolConnection {
    pub fn inner(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection is not dropped")
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.slot, conn);
        }
    }
}
