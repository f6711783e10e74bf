//! EdgeDB client for tokio.
//!
//! The main way to use this crate is the [Client]: a connection pool
//! that lazily opens authenticated TLS connections to the server and
//! multiplexes queries over them.
//!
//! ```rust,no_run
//! # async fn main_() -> Result<(), edgedb_tokio::Error> {
//! let config = edgedb_tokio::Builder::new()
//!     .host("localhost")
//!     .password("secret")
//!     .build()?;
//! let client = edgedb_tokio::Client::new(&config);
//! let greeting: String = client
//!     .query_required_single("select 'hello'", &Default::default())
//!     .await?;
//! # drop(greeting); Ok(())
//! # }
//! ```
//!
//! Transactions retry automatically on serialization conflicts:
//!
//! ```rust,no_run
//! # async fn main_(client: edgedb_tokio::Client) -> anyhow::Result<()> {
//! let value = client
//!     .transaction(|mut tx| async move {
//!         tx.query_required_single::<i64>(
//!             "select (update Counter set { value := .value + 1 }).value limit 1",
//!             &Default::default(),
//!         )
//!         .await
//!     })
//!     .await?;
//! # drop(value); Ok(())
//! # }
//! ```

mod builder;
mod client;
mod options;
mod pool;
mod scram;
mod tls;
mod transaction;

pub mod raw;

#[cfg(test)]
pub(crate) mod mock;

pub use builder::{Builder, Config, TlsSecurity};
pub use client::Client;
pub use options::{IsolationLevel, RetryOptions, TransactionOptions};
pub use raw::Arguments;
pub use transaction::Transaction;

pub use edgedb_errors::{Error, ErrorKind};
pub use edgedb_protocol::model;
pub use edgedb_protocol::value::Value;
