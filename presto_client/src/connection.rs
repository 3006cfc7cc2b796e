//! The long-lived connection: base URL, header state, auth material and the
//! HTTP client handle. Statements borrow all of it through an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::headers::HeaderState;
use crate::progress::ProgressObserver;
use crate::registry;
use crate::statement::Statement;
use crate::transport::{SpnegoTokenSource, Transport};

pub(crate) struct ConnectionInner {
    pub(crate) base_url: Url,
    pub(crate) transport: Transport,
    pub(crate) progress: Mutex<ProgressStash>,
}

/// Progress registration carried between queries; mutated by the magic
/// `X-Presto-Progress-Callback*` parameters.
#[derive(Default)]
pub(crate) struct ProgressStash {
    pub(crate) observer: Option<Arc<dyn ProgressObserver>>,
    pub(crate) period: Option<Duration>,
}

pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.inner.base_url)
            .finish()
    }
}

impl Connection {
    /// Parse a DSN and connect. No request is issued; the coordinator is
    /// first contacted when a statement executes.
    pub fn open(dsn: &str) -> Result<Connection> {
        Connection::connect(&Config::parse(dsn)?)
    }

    pub fn connect(config: &Config) -> Result<Connection> {
        Connection::connect_with(config, None)
    }

    /// Connect with an embedder-provided SPNEGO token source. Required when
    /// the DSN enables Kerberos.
    pub fn connect_with(
        config: &Config,
        spnego: Option<Arc<dyn SpnegoTokenSource>>,
    ) -> Result<Connection> {
        if config.kerberos.is_some() && spnego.is_none() {
            return Err(Error::Config(
                "kerberos is enabled but no SPNEGO token source was provided".to_owned(),
            ));
        }

        let http = build_http_client(config)?;

        let mut headers = HeaderState::new(config.user.clone(), config.source.clone());
        headers.catalog = config.catalog.clone();
        headers.schema = config.schema.clone();
        for (k, v) in &config.session_properties {
            headers.add_session(format!("{k}={v}"));
        }
        for (k, v) in &config.extra_credentials {
            headers.add_extra_credential(format!("{k}={v}"));
        }

        // Basic auth is only ever sent over TLS.
        let basic_auth = match (&config.password, config.secure) {
            (Some(password), true) => Some((config.user.clone(), Some(password.clone()))),
            _ => None,
        };

        Ok(Connection {
            inner: Arc::new(ConnectionInner {
                base_url: config.base_url()?,
                transport: Transport::new(http, basic_auth, spnego, headers),
                progress: Mutex::new(ProgressStash::default()),
            }),
        })
    }

    /// Package SQL with this connection. Purely local.
    pub fn prepare(&self, sql: impl Into<String>) -> Statement {
        Statement::new(self.inner.clone(), sql.into())
    }

    /// Transactions are not part of the statement protocol.
    pub fn begin(&self) -> Result<()> {
        Err(Error::NotSupported("transactions"))
    }

    /// Closing is a no-op; the coordinator holds no per-connection state
    /// beyond what the headers re-send.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    if let Some(key) = &config.custom_client {
        return registry::lookup(key)
            .ok_or_else(|| Error::Config(format!("custom client {key:?} is not registered")));
    }

    let pem = match (&config.ssl_cert, &config.ssl_cert_path) {
        (Some(inline), _) => Some(inline.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("reading root CA {path:?}: {e}")))?,
        ),
        (None, None) => None,
    };
    match pem {
        Some(pem) => {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| Error::Config(format!("invalid root CA certificate: {e}")))?;
            Ok(reqwest::Client::builder()
                .add_root_certificate(cert)
                .build()?)
        }
        None => Ok(reqwest::Client::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_refused() {
        let conn = Connection::open("http://scott@localhost:8080").unwrap();
        assert!(matches!(
            conn.begin().unwrap_err(),
            Error::NotSupported("transactions")
        ));
    }

    #[test]
    fn kerberos_needs_a_token_source() {
        let config =
            Config::parse("https://scott@localhost:8443?KerberosEnabled=true").unwrap();
        assert!(matches!(
            Connection::connect(&config).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn unregistered_custom_client_is_an_error() {
        let config =
            Config::parse("http://scott@localhost:8080?custom_client=nope").unwrap();
        assert!(matches!(
            Connection::connect(&config).unwrap_err(),
            Error::Config(_)
        ));
    }
}
