use std::fmt;
use std::time::Duration;

use edgedb_errors::{Error, ErrorKind, InvalidArgumentError};

use crate::options::{RetryOptions, TransactionOptions};

pub const DEFAULT_PORT: u16 = 5656;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How the server's TLS certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsSecurity {
    /// The certificate is not validated at all.
    Insecure,
    /// The certificate chain is validated, but not the host name.
    NoHostVerification,
    /// Full validation against the system store plus any configured
    /// certificate authority.
    Strict,
}

/// All parameters needed to connect to a server.
///
/// Resolving these from project files, credential files or the
/// environment is the responsibility of the application; this type is
/// the already-resolved result, constructed once per pool via
/// [Builder].
#[derive(Clone)]
pub struct Config {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) database: String,
    pub(crate) tls_security: TlsSecurity,
    pub(crate) pem_certificates: Option<String>,
    pub(crate) max_connections: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) retry: RetryOptions,
    pub(crate) transaction: TransactionOptions,
}

pub struct Builder {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    tls_security: TlsSecurity,
    pem_certificates: Option<String>,
    max_connections: usize,
    connect_timeout: Duration,
    retry: RetryOptions,
    transaction: TransactionOptions,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            user: "edgedb".into(),
            password: String::new(),
            database: "edgedb".into(),
            tls_security: TlsSecurity::Strict,
            pem_certificates: None,
            max_connections: DEFAULT_POOL_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            retry: RetryOptions::default(),
            transaction: TransactionOptions::default(),
        }
    }
    pub fn host(mut self, host: impl Into<String>) -> Builder {
        self.host = host.into();
        self
    }
    pub fn port(mut self, port: u16) -> Builder {
        self.port = port;
        self
    }
    pub fn user(mut self, user: impl Into<String>) -> Builder {
        self.user = user.into();
        self
    }
    pub fn password(mut self, password: impl Into<String>) -> Builder {
        self.password = password.into();
        self
    }
    pub fn database(mut self, database: impl Into<String>) -> Builder {
        self.database = database.into();
        self
    }
    pub fn tls_security(mut self, tls_security: TlsSecurity) -> Builder {
        self.tls_security = tls_security;
        self
    }
    /// Adds a PEM bundle with certificate authorities to trust in
    /// addition to the system store.
    pub fn pem_certificates(mut self, pem: impl Into<String>) -> Builder {
        self.pem_certificates = Some(pem.into());
        self
    }
    /// Upper bound on pooled connections. The server's
    /// `suggested_pool_concurrency` can raise the effective bound, but
    /// never lower it below this value.
    pub fn max_connections(mut self, value: usize) -> Builder {
        self.max_connections = value;
        self
    }
    pub fn connect_timeout(mut self, timeout: Duration) -> Builder {
        self.connect_timeout = timeout;
        self
    }
    pub fn retry_options(mut self, retry: RetryOptions) -> Builder {
        self.retry = retry;
        self
    }
    pub fn transaction_options(mut self, transaction: TransactionOptions) -> Builder {
        self.transaction = transaction;
        self
    }
    pub fn build(self) -> Result<Config, Error> {
        if self.host.is_empty() {
            return Err(InvalidArgumentError::with_message("host must not be empty"));
        }
        if self.port == 0 {
            return Err(InvalidArgumentError::with_message("port must not be zero"));
        }
        if self.max_connections == 0 {
            return Err(InvalidArgumentError::with_message(
                "max_connections must be at least 1",
            ));
        }
        Ok(Config {
            host: self.host,
            port: self.port,
            user: self.user,
            password: self.password,
            database: self.database,
            tls_security: self.tls_security,
            pem_certificates: self.pem_certificates,
            max_connections: self.max_connections,
            connect_timeout: self.connect_timeout,
            retry: self.retry,
            transaction: self.transaction,
        })
    }
}

impl Config {
    pub fn host(&self) -> &str {
        &self.host
    }
    pub fn port(&self) -> u16 {
        self.port
    }
    pub fn user(&self) -> &str {
        &self.user
    }
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("tls_security", &self.tls_security)
            .field("max_connections", &self.max_connections)
            // password deliberately omitted
            .finish_non_exhaustive()
    }
}
