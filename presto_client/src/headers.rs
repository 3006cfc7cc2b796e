//! The `X-Presto-*` header family and the per-connection header state.
//!
//! Session properties and prepared statements are ordered multisets: the
//! server appends with `Set-Session` / `Added-Prepare` and deletes by key or
//! name prefix with `Clear-Session` / `Deallocated-Prepare`. They are kept as
//! lists of raw `k=v` entries, one request header value per entry.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

pub(crate) static PRESTO_USER: HeaderName = HeaderName::from_static("x-presto-user");
pub(crate) static PRESTO_SOURCE: HeaderName = HeaderName::from_static("x-presto-source");
pub(crate) static PRESTO_CATALOG: HeaderName = HeaderName::from_static("x-presto-catalog");
pub(crate) static PRESTO_SCHEMA: HeaderName = HeaderName::from_static("x-presto-schema");
pub(crate) static PRESTO_SESSION: HeaderName = HeaderName::from_static("x-presto-session");
pub(crate) static PRESTO_EXTRA_CREDENTIAL: HeaderName =
    HeaderName::from_static("x-presto-extra-credential");
pub(crate) static PRESTO_PREPARED_STATEMENT: HeaderName =
    HeaderName::from_static("x-presto-prepared-statement");
pub(crate) static PRESTO_CLIENT_CAPABILITIES: HeaderName =
    HeaderName::from_static("x-presto-client-capabilities");

static PRESTO_SET_CATALOG: HeaderName = HeaderName::from_static("x-presto-set-catalog");
static PRESTO_SET_SCHEMA: HeaderName = HeaderName::from_static("x-presto-set-schema");
static PRESTO_SET_SESSION: HeaderName = HeaderName::from_static("x-presto-set-session");
static PRESTO_CLEAR_SESSION: HeaderName = HeaderName::from_static("x-presto-clear-session");
static PRESTO_ADDED_PREPARE: HeaderName = HeaderName::from_static("x-presto-added-prepare");
static PRESTO_DEALLOCATED_PREPARE: HeaderName =
    HeaderName::from_static("x-presto-deallocated-prepare");
static PRESTO_SET_PATH: HeaderName = HeaderName::from_static("x-presto-set-path");
static PRESTO_SET_ROLE: HeaderName = HeaderName::from_static("x-presto-set-role");

/// Mutable header state of one connection.
///
/// Mutated only by the transport, under the response-processing path, so a
/// request issued for page N+1 observes every directive from page N.
#[derive(Debug, Clone)]
pub(crate) struct HeaderState {
    pub(crate) user: String,
    pub(crate) source: String,
    pub(crate) catalog: Option<String>,
    pub(crate) schema: Option<String>,
    session: Vec<String>,
    extra_credentials: Vec<String>,
    prepared_statements: Vec<String>,
}

impl HeaderState {
    pub(crate) fn new(user: String, source: String) -> Self {
        HeaderState {
            user,
            source,
            catalog: None,
            schema: None,
            session: Vec::new(),
            extra_credentials: Vec::new(),
            prepared_statements: Vec::new(),
        }
    }

    pub(crate) fn add_session(&mut self, entry: String) {
        self.session.push(entry);
    }

    pub(crate) fn add_extra_credential(&mut self, entry: String) {
        self.extra_credentials.push(entry);
    }

    /// Render the state into request headers. Multiset entries become one
    /// header value each, preserving insertion order.
    pub(crate) fn build(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(PRESTO_USER.clone(), value_of(&self.user)?);
        headers.insert(PRESTO_SOURCE.clone(), value_of(&self.source)?);
        if let Some(catalog) = &self.catalog {
            headers.insert(PRESTO_CATALOG.clone(), value_of(catalog)?);
        }
        if let Some(schema) = &self.schema {
            headers.insert(PRESTO_SCHEMA.clone(), value_of(schema)?);
        }
        for entry in &self.session {
            headers.append(PRESTO_SESSION.clone(), value_of(entry)?);
        }
        for entry in &self.extra_credentials {
            headers.append(PRESTO_EXTRA_CREDENTIAL.clone(), value_of(entry)?);
        }
        for entry in &self.prepared_statements {
            headers.append(PRESTO_PREPARED_STATEMENT.clone(), value_of(entry)?);
        }
        Ok(headers)
    }

    /// Apply the session-mutation directives of a 200 response.
    ///
    /// Committed before the body is handed up, and before any error the body
    /// may carry, so later requests see the new state even if the caller
    /// aborts mid-iteration.
    pub(crate) fn apply(&mut self, response: &HeaderMap) -> Result<()> {
        // We neither track a session path nor roles; losing them silently
        // would corrupt the session, so refuse.
        if non_empty(response.get(&PRESTO_SET_PATH)) {
            return Err(Error::UnsupportedHeader("X-Presto-Set-Path"));
        }
        if non_empty(response.get(&PRESTO_SET_ROLE)) {
            return Err(Error::UnsupportedHeader("X-Presto-Set-Role"));
        }

        if let Some(catalog) = str_of(response.get(&PRESTO_SET_CATALOG)) {
            self.catalog = Some(catalog.to_owned());
        }
        if let Some(schema) = str_of(response.get(&PRESTO_SET_SCHEMA)) {
            self.schema = Some(schema.to_owned());
        }
        for added in response.get_all(&PRESTO_ADDED_PREPARE) {
            if let Ok(entry) = added.to_str() {
                self.prepared_statements.push(entry.to_owned());
            }
        }
        for name in response.get_all(&PRESTO_DEALLOCATED_PREPARE) {
            if let Ok(name) = name.to_str() {
                let prefix = format!("{name}=");
                self.prepared_statements.retain(|e| !e.starts_with(&prefix));
            }
        }
        for entry in response.get_all(&PRESTO_SET_SESSION) {
            if let Ok(entry) = entry.to_str() {
                self.session.push(entry.to_owned());
            }
        }
        for key in response.get_all(&PRESTO_CLEAR_SESSION) {
            if let Ok(key) = key.to_str() {
                self.session.retain(|e| e.split('=').next() != Some(key));
            }
        }
        Ok(())
    }
}

fn value_of(s: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(s).map_err(|_| Error::Config(format!("invalid header value: {s:?}")))
}

fn str_of(value: Option<&HeaderValue>) -> Option<&str> {
    value.and_then(|v| v.to_str().ok()).filter(|v| !v.is_empty())
}

fn non_empty(value: Option<&HeaderValue>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}
