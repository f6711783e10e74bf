use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use edgedb_errors::{
    DatabaseNotEmptyError, DescriptorMismatch, Error, ErrorKind, NoDataError, SHOULD_RECONNECT,
};
use edgedb_protocol::codec::CodecRegistry;
use edgedb_protocol::common::{Capabilities, Cardinality, IoFormat};
use edgedb_protocol::model::Json;
use edgedb_protocol::value::Value;
use edgedb_protocol::QueryResult;

use crate::builder::Config;
use crate::pool::{Pool, PoolConnection};
use crate::raw::Arguments;

/// Counts everything a fresh database would not have: user-defined
/// modules and anything in `default`.
const EMPTY_DATABASE_CHECK: &str = "\
    select count((select schema::Module filter not .builtin)) \
    + count((select schema::Object filter .name like 'default::%'))";

/// A pooled client: the main entry point of this crate.
///
/// Cloning is cheap and every clone shares the same pool. All methods
/// are cancel-safe in the sense that dropping a returned future
/// releases the pool slot; a connection abandoned mid-pipeline is
/// closed rather than reused.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    /// Creates a new client with a dedicated pool and codec registry.
    ///
    /// No connection is made until the first operation (or an explicit
    /// [ensure_connected](Client::ensure_connected)).
    pub fn new(config: &Config) -> Client {
        Client {
            pool: Pool::new(config, CodecRegistry::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_pool(pool: Arc<Pool>) -> Client {
        Client { pool }
    }

    /// Opens the first connection eagerly, learning the server's
    /// suggested pool size in the process.
    pub async fn ensure_connected(&self) -> Result<(), Error> {
        self.pool.ensure_initialized().await
    }

    async fn acquire(&self) -> Result<PoolConnection, Error> {
        self.pool.acquire().await
    }

    async fn query_with<R: QueryResult>(
        &self,
        query: &str,
        arguments: &Arguments,
        io_format: IoFormat,
        cardinality: Cardinality,
    ) -> Result<Vec<R>, Error> {
        let mut reconnected = false;
        loop {
            let result = match self.acquire().await {
                Ok(mut conn) => {
                    conn.inner()
                        .query(query, arguments, io_format, cardinality, Capabilities::ALL)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.has_tag(SHOULD_RECONNECT) && !reconnected => {
                    log::info!("retrying on transient connection error: {e:#}");
                    reconnected = true;
                }
                other => return other,
            }
        }
    }

    /// Runs a query and returns all result rows.
    pub async fn query<R: QueryResult>(
        &self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<Vec<R>, Error> {
        self.query_with(query, arguments, IoFormat::Binary, Cardinality::Many)
            .await
    }

    /// Runs a query expected to return at most one row.
    pub async fn query_single<R: QueryResult>(
        &self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<Option<R>, Error> {
        Ok(self
            .query_with(query, arguments, IoFormat::Binary, Cardinality::AtMostOne)
            .await?
            .into_iter()
            .next())
    }

    /// Runs a query expected to return exactly one row.
    pub async fn query_required_single<R: QueryResult>(
        &self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<R, Error> {
        self.query_with(query, arguments, IoFormat::Binary, Cardinality::One)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| NoDataError::with_message("query returned no data"))
    }

    /// Runs a query for its side effects only.
    pub async fn execute(&self, query: &str, arguments: &Arguments) -> Result<(), Error> {
        self.query_with::<Value>(query, arguments, IoFormat::Binary, Cardinality::Many)
            .await
            .map(|_| ())
    }

    /// Runs a query and returns the result set as one JSON array.
    pub async fn query_json(&self, query: &str, arguments: &Arguments) -> Result<Json, Error> {
        let rows = self
            .query_with::<Value>(query, arguments, IoFormat::Json, Cardinality::Many)
            .await?;
        match rows.into_iter().next() {
            Some(row) => json_value(row),
            None => Ok(Json::new_unchecked("[]".into())),
        }
    }

    /// Runs a query returning at most one row, as JSON.
    pub async fn query_single_json(
        &self,
        query: &str,
        arguments: &Arguments,
    ) -> Result<Option<Json>, Error> {
        self.query_with::<Value>(query, arguments, IoFormat::Json, Cardinality::AtMostOne)
            .await?
            .into_iter()
            .next()
            .map(json_value)
            .transpose()
    }

    /// Streams a dump of the whole database into `output`.
    pub async fn dump<W>(&self, output: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let mut conn = self.acquire().await?;
        conn.inner().dump(output).await
    }

    /// Restores a database dump into an empty database.
    pub async fn restore<R>(&self, input: &mut R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut conn = self.acquire().await?;
        let occupied: Vec<i64> = conn
            .inner()
            .query(
                EMPTY_DATABASE_CHECK,
                &Arguments::new(),
                IoFormat::Binary,
                Cardinality::One,
                Capabilities::ALL,
            )
            .await?;
        if occupied.into_iter().next().unwrap_or(0) != 0 {
            return Err(DatabaseNotEmptyError::with_message(
                "the database must be empty before a restore",
            ));
        }
        conn.inner().restore(input).await
    }

    pub(crate) fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}

fn json_value(value: Value) -> Result<Json, Error> {
    match value {
        Value::Str(text) => Ok(Json::new_unchecked(text)),
        Value::Json(json) => Ok(json),
        other => Err(DescriptorMismatch::with_message(format!(
            "expected a json result, got {}",
            other.kind()
        ))),
    }
}
