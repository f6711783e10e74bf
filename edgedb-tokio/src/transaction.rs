//! The transaction controller: wraps a closure in a transaction block
//! and retries it when the server reports a retryable conflict.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use edgedb_errors::{Error, ErrorKind, NoDataError, SHOULD_RETRY};
use edgedb_protocol::common::{Capabilities, Cardinality, IoFormat};
use edgedb_protocol::value::Value;
use edgedb_protocol::QueryResult;

use crate::client::Client;
use crate::pool::PoolConnection;
use crate::raw::Arguments;

/// A transaction handle passed to the closure given to
/// [Client::transaction].
///
/// The handle pins one connection for the whole transaction. Nested
/// transactions are not offered; the handle deliberately has no
/// `transaction` method.
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

struct TransactionInner {
    conn: Mutex<PoolConnection>,
}

impl Clone for Transaction {
    fn clone(&self) -> Transaction {
        Transaction {
            inner: self.inner.clone(),
        }
    }
}

impl Transaction {
    async fn run<R: QueryResult>(
        &mut self,
        query: &str,
        arguments: &Arguments,
        cardinality: Cardinality,
    ) -> Result<Vec<R>, Error> {
        self.inner
            .conn
            .lock()
            .await
            .inner()
            .query(
                query,
                arguments,
                IoFormat::Binary,
                cardinality,
                Capabilities::ALL,
            )
            .await
    }

    pub async fn query<R: QueryResult>(
        &mut self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<Vec<R>, Error> {
        self.run(query, arguments, Cardinality::Many).await
    }

    pub async fn query_single<R: QueryResult>(
        &mut self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<Option<R>, Error> {
        Ok(self
            .run(query, arguments, Cardinality::AtMostOne)
            .await?
            .into_iter()
            .next())
    }

    pub async fn query_required_single<R: QueryResult>(
        &mut self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<R, Error> {
        self.run(query, arguments, Cardinality::One)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| NoDataError::with_message("query returned no data"))
    }

    pub async fn execute(&mut self, query: &str, arguments: &Arguments) -> Result<(), Error> {
        self.run::<Value>(query, arguments, Cardinality::Many)
            .await
            .map(|_| ())
    }
}

impl Client {
    /// Runs the closure inside a transaction block.
    ///
    /// The closure may be called more than once: any error tagged as
    /// retryable (serialization conflicts, transient connection
    /// failures) rolls the transaction back and starts over, up to the
    /// configured number of attempts with backoff in between. The
    /// closure must therefore be side-effect free outside the
    /// database.
    pub async fn transaction<T, B, F>(&self, mut body: B) -> Result<T, Error>
    where
        B: FnMut(Transaction) -> F,
        F: Future<Output = Result<T, Error>>,
    {
        let start = self.pool().config.transaction.start_command();
        let retry = self.pool().config.retry.clone();
        let mut attempt = 0u32;
        loop {
            match self.transaction_attempt(&start, &mut body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if e.has_tag(SHOULD_RETRY) && attempt + 1 < retry.attempts.max(1) {
                        let pause = (retry.backoff)(attempt);
                        log::info!(
                            "retrying transaction in {pause:?} (attempt {}): {e:#}",
                            attempt + 1,
                        );
                        tokio::time::sleep(pause).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn transaction_attempt<T, B, F>(&self, start: &str, body: &mut B) -> Result<T, Error>
    where
        B: FnMut(Transaction) -> F,
        F: Future<Output = Result<T, Error>>,
    {
        let mut conn = self.pool().acquire().await?;
        conn.inner().statement(start).await?;
        let tx = Transaction {
            inner: Arc::new(TransactionInner {
                conn: Mutex::new(conn),
            }),
        };
        let result = body(tx.clone()).await;
        let inner = tx.inner;
        match result {
            Ok(value) => {
                inner.conn.lock().await.inner().statement("commit").await?;
                Ok(value)
            }
            Err(e) => {
                let mut guard = inner.conn.lock().await;
                if guard.inner().is_consistent() {
                    if let Err(rollback) = guard.inner().statement("rollback").await {
                        // surfaced error stays the original one
                        log::warn!("rollback failed: {rollback:#}");
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;

    use edgedb_errors::{ErrorKind, TransactionSerializationError, UserError};
    use edgedb_protocol::codec::{CodecRegistry, STD_INT64};

    use crate::builder::Builder;
    use crate::client::Client;
    use crate::mock::{MockServer, QueryScript};
    use crate::options::RetryOptions;
    use crate::pool::{ConnectFuture, Connector, Pool};
    use crate::raw::Stream;

    fn flaky_connector(failures_left: Arc<AtomicUsize>) -> Connector {
        Arc::new(move || -> ConnectFuture {
            let failures_left = failures_left.clone();
            Box::pin(async move {
                let (client_io, server_io) = tokio::io::duplex(1 << 16);
                tokio::spawn(async move {
                    let mut mock = MockServer::new(server_io);
                    mock.handshake("secret").await;
                    mock.serve(move |query| {
                        if query.contains("update") {
                            if failures_left
                                .fetch_update(SeqCst, SeqCst, |n| n.checked_sub(1))
                                .is_ok()
                            {
                                QueryScript::error(0x10010001, "serialization conflict")
                            } else {
                                QueryScript::rows(
                                    STD_INT64,
                                    vec![Bytes::from_static(b"\0\0\0\0\0\0\0\x07")],
                                )
                            }
                        } else {
                            // start transaction / commit / rollback
                            QueryScript::statement_ok()
                        }
                    })
                    .await;
                });
                Ok(Box::new(client_io) as Stream)
            })
        })
    }

    fn test_client(failures: usize, attempts: u32) -> Client {
        let config = Builder::new()
            .password("secret")
            .retry_options(RetryOptions::new(attempts, |_| Duration::ZERO))
            .build()
            .unwrap();
        let pool = Pool::with_connector(
            &config,
            CodecRegistry::new(),
            flaky_connector(Arc::new(AtomicUsize::new(failures))),
        );
        Client::with_pool(pool)
    }

    #[tokio::test]
    async fn retries_serialization_conflicts() {
        let client = test_client(2, 3);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_body = calls.clone();
        let value = client
            .transaction(move |mut tx| {
                let calls = calls_in_body.clone();
                async move {
                    calls.fetch_add(1, SeqCst);
                    tx.query_required_single::<i64>(
                        "select (update Counter set { value := .value + 1 }).value limit 1",
                        &Default::default(),
                    )
                    .await
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let client = test_client(10, 2);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_body = calls.clone();
        let err = client
            .transaction(move |mut tx| {
                let calls = calls_in_body.clone();
                async move {
                    calls.fetch_add(1, SeqCst);
                    tx.query_required_single::<i64>("update Counter", &Default::default())
                        .await
                }
            })
            .await
            .unwrap_err();
        assert!(err.is::<TransactionSerializationError>());
        assert_eq!(calls.load(SeqCst), 2);
    }

    #[tokio::test]
    async fn user_errors_are_not_retried() {
        let client = test_client(0, 3);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_body = calls.clone();
        let err = client
            .transaction(move |mut tx| {
                let calls = calls_in_body.clone();
                async move {
                    calls.fetch_add(1, SeqCst);
                    // run one statement so the rollback path is real
                    tx.execute("select 1", &Default::default()).await?;
                    Err::<(), _>(UserError::with_message("no thanks"))
                }
            })
            .await
            .unwrap_err();
        assert!(err.is::<UserError>());
        assert_eq!(calls.load(SeqCst), 1);
    }
}
