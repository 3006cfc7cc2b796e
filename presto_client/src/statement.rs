//! Per-query statement engine.
//!
//! A query has two phases. *Submit* rewrites parameters into an
//! `EXECUTE … USING …` form and POSTs it. *Drain* runs a two-task pipeline:
//! the fetcher GETs each `nextUri`, the parser decodes the envelope and
//! forwards the next URI *before* the envelope itself, so at steady state
//! the fetcher is already requesting page N+1 while the caller reads page N.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::connection::ConnectionInner;
use crate::error::{Error, Result};
use crate::headers::{PRESTO_CLIENT_CAPABILITIES, PRESTO_PREPARED_STATEMENT, PRESTO_USER};
use crate::params::{self, Param};
use crate::progress::ProgressTracker;
use crate::transport::{CANCEL_TIMEOUT, DEFAULT_QUERY_TIMEOUT};
use crate::typesig::Column;
use crate::value::Value;
use crate::wire::QueryResponse;

/// Name under which the original SQL is prepared when parameters are bound.
const PREPARED_STATEMENT_NAME: &str = "_presto_go";

/// Sent so the server does not truncate temporal precision.
const CLIENT_CAPABILITIES: &str = "PARAMETRIC_DATETIME";

const HEADER_PARAM_PREFIX: &str = "X-Presto-";
const PROGRESS_CALLBACK_PARAM: &str = "X-Presto-Progress-Callback";
const PROGRESS_PERIOD_PARAM: &str = "X-Presto-Progress-Callback-Period";
const USER_HEADER_PARAM: &str = "X-Presto-User";

/// One query parameter: a positional literal, or one of the magic
/// `X-Presto-*` names the engine consumes instead of forwarding.
pub struct QueryParam {
    name: String,
    value: Param,
}

impl QueryParam {
    /// A positional parameter, folded into `EXECUTE … USING …`.
    pub fn value(value: impl Into<Param>) -> Self {
        QueryParam {
            name: String::new(),
            value: value.into(),
        }
    }

    /// A named parameter. Names starting with `X-Presto-` become header
    /// overrides or progress registration; anything else is a literal.
    pub fn named(name: impl Into<String>, value: impl Into<Param>) -> Self {
        QueryParam {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A prepared statement: SQL packaged with its connection. At most one query
/// runs on a handle at a time.
pub struct Statement {
    conn: Arc<ConnectionInner>,
    sql: String,
    in_flight: Arc<AtomicBool>,
}

impl Statement {
    pub(crate) fn new(conn: Arc<ConnectionInner>, sql: String) -> Self {
        Statement {
            conn,
            sql,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Submit the statement and stream its pages.
    pub async fn query(&self, params: Vec<QueryParam>) -> Result<Rows> {
        let guard = InFlightGuard::acquire(&self.in_flight)?;

        let submit = self.build_submission(params)?;
        let cancel = CancellationToken::new();
        let url = self
            .conn
            .base_url
            .join("/v1/statement")
            .map_err(|e| Error::Config(format!("statement url: {e}")))?;

        tracing::debug!(sql = %submit.sql, "submitting statement");
        let response = self
            .conn
            .transport
            .round_trip(
                Method::POST,
                url,
                submit.headers,
                Some(submit.sql),
                DEFAULT_QUERY_TIMEOUT,
                &cancel,
            )
            .await?;
        let first: QueryResponse = response.json().await.map_err(Error::from)?;
        first.check_error()?;
        tracing::debug!(query_id = %first.id, "statement accepted");

        let progress = {
            let stash = self.conn.progress.lock();
            match (stash.observer.clone(), stash.period) {
                (Some(observer), Some(period)) => {
                    Some(ProgressTracker::new(observer, period, first.id.clone()))
                }
                _ => None,
            }
        };

        let pipeline = Pipeline::spawn(
            self.conn.clone(),
            submit.user.clone(),
            first.next_uri.clone().unwrap_or_default(),
            cancel.clone(),
        );

        let mut rows = Rows {
            conn: self.conn.clone(),
            cancel,
            query_id: first.id.clone(),
            user: submit.user,
            columns: None,
            batch: Vec::new(),
            row_index: 0,
            rows_affected: 0,
            update_type: None,
            resp_rx: pipeline.responses,
            err_rx: pipeline.errors,
            sticky: None,
            finished: false,
            progress,
            _guard: guard,
        };
        // The submit response is itself the first page; its nextUri primed
        // the pipeline above.
        rows.process_envelope(first)?;
        Ok(rows)
    }

    /// Submit and drain, returning the final update count.
    pub async fn execute(&self, params: Vec<QueryParam>) -> Result<ExecOutcome> {
        let mut rows = self.query(params).await?;
        while rows.next().await?.is_some() {}
        let outcome = ExecOutcome {
            rows_affected: rows.rows_affected(),
        };
        rows.close().await?;
        Ok(outcome)
    }

    fn build_submission(&self, params: Vec<QueryParam>) -> Result<Submission> {
        let mut literals = Vec::new();
        let mut overrides: Vec<(String, String)> = Vec::new();
        let mut user_override = None;
        let mut observer = None;
        let mut period = None;

        for param in params {
            if param.name == PROGRESS_CALLBACK_PARAM {
                let Param::Observer(value) = param.value else {
                    return Err(Error::InvalidProgressHeaders);
                };
                observer = Some(value);
            } else if param.name == PROGRESS_PERIOD_PARAM {
                let Param::Duration(value) = param.value else {
                    return Err(Error::InvalidProgressHeaders);
                };
                period = Some(value);
            } else if param.name.starts_with(HEADER_PARAM_PREFIX) {
                let Param::String(value) = param.value else {
                    return Err(Error::Config(format!(
                        "header override {} requires a string value",
                        param.name
                    )));
                };
                if param.name == USER_HEADER_PARAM {
                    user_override = Some(value.clone());
                }
                overrides.push((param.name, value));
            } else {
                literals.push(params::serialize(&param.value)?);
            }
        }

        // The stash is shared by every statement on this connection, so the
        // combined observer/period pair is validated before anything is
        // committed; a rejected submission must not leave half of it behind.
        {
            let mut stash = self.conn.progress.lock();
            let has_observer = observer.is_some() || stash.observer.is_some();
            let has_period = period.is_some() || stash.period.is_some();
            if has_observer != has_period {
                return Err(Error::InvalidProgressHeaders);
            }
            if let Some(observer) = observer {
                stash.observer = Some(observer);
            }
            if let Some(period) = period {
                stash.period = Some(period);
            }
        }

        let (sql, prepared_entry) = if literals.is_empty() {
            (self.sql.clone(), None)
        } else {
            (
                format!(
                    "EXECUTE {PREPARED_STATEMENT_NAME} USING {}",
                    literals.join(", ")
                ),
                Some(format!(
                    "{PREPARED_STATEMENT_NAME}={}",
                    urlencoding::encode(&self.sql)
                )),
            )
        };

        let state = self.conn.transport.headers.lock();
        let user = user_override.unwrap_or_else(|| state.user.clone());
        let mut headers = state.build()?;
        drop(state);

        headers.insert(
            PRESTO_CLIENT_CAPABILITIES.clone(),
            HeaderValue::from_static(CLIENT_CAPABILITIES),
        );
        if let Some(entry) = prepared_entry {
            let present = headers
                .get_all(&PRESTO_PREPARED_STATEMENT)
                .iter()
                .any(|v| v.to_str().map_or(false, |v| v == entry));
            if !present {
                headers.append(
                    PRESTO_PREPARED_STATEMENT.clone(),
                    HeaderValue::from_str(&entry)
                        .map_err(|_| Error::Config("invalid prepared statement entry".into()))?,
                );
            }
        }
        for (name, value) in &overrides {
            let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
                .map_err(|_| Error::Config(format!("invalid header override name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::Config(format!("invalid header override value for {name}")))?;
            headers.insert(name, value);
        }

        Ok(Submission { sql, headers, user })
    }
}

struct Submission {
    sql: String,
    headers: HeaderMap,
    user: String,
}

/// Result of a drained statement.
#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    rows_affected: i64,
}

impl ExecOutcome {
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    /// Presto has no insert-id concept.
    pub fn last_insert_id(&self) -> Result<i64> {
        Err(Error::NotSupported("last_insert_id"))
    }
}

struct Pipeline {
    responses: mpsc::Receiver<QueryResponse>,
    errors: mpsc::Receiver<Error>,
}

impl Pipeline {
    /// Spawn the fetcher and parser and prime them with the first `nextUri`
    /// (empty means the query was already terminal).
    fn spawn(
        conn: Arc<ConnectionInner>,
        user: String,
        first_next_uri: String,
        cancel: CancellationToken,
    ) -> Pipeline {
        let (next_uri_tx, next_uri_rx) = mpsc::channel::<String>(1);
        let (http_tx, http_rx) = mpsc::channel::<reqwest::Response>(1);
        let (resp_tx, resp_rx) = mpsc::channel::<QueryResponse>(1);
        // One slot per task; each writes at most one error before exiting,
        // so writers never block on a closed-down cursor.
        let (err_tx, err_rx) = mpsc::channel::<Error>(2);

        // Sending on a channel with a live receiver cannot fail here; the
        // receiver half lives in the task we are about to spawn.
        let _ = next_uri_tx.try_send(first_next_uri);

        tokio::spawn(fetch_pages(
            conn,
            user,
            next_uri_rx,
            http_tx,
            err_tx.clone(),
            cancel.clone(),
        ));
        tokio::spawn(parse_pages(http_rx, next_uri_tx, resp_tx, err_tx, cancel));

        Pipeline {
            responses: resp_rx,
            errors: err_rx,
        }
    }
}

/// Fetcher task: GET each URI with only the user header (the transport adds
/// auth), one page ahead of the cursor.
async fn fetch_pages(
    conn: Arc<ConnectionInner>,
    user: String,
    mut next_uri_rx: mpsc::Receiver<String>,
    http_tx: mpsc::Sender<reqwest::Response>,
    err_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&user) {
        Ok(value) => {
            headers.insert(PRESTO_USER.clone(), value);
        }
        Err(_) => {
            let _ = err_tx
                .send(Error::Config(format!("invalid user header value {user:?}")))
                .await;
            return;
        }
    }

    loop {
        let uri = tokio::select! {
            _ = cancel.cancelled() => return,
            uri = next_uri_rx.recv() => match uri {
                Some(uri) => uri,
                None => return,
            },
        };
        if uri.is_empty() {
            // Terminal page already seen; closing http_tx winds the parser down.
            return;
        }
        let url = match Url::parse(&uri) {
            Ok(url) => url,
            Err(e) => {
                let _ = err_tx.send(Error::decode(format!("bad nextUri {uri:?}: {e}"))).await;
                return;
            }
        };
        tracing::trace!(%url, "fetching next page");
        let response = match conn
            .transport
            .round_trip(
                Method::GET,
                url,
                headers.clone(),
                None,
                DEFAULT_QUERY_TIMEOUT,
                &cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let _ = err_tx.send(e).await;
                return;
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = http_tx.send(response) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Parser task: decode each envelope, forwarding its `nextUri` to the
/// fetcher before the envelope goes to the cursor.
async fn parse_pages(
    mut http_rx: mpsc::Receiver<reqwest::Response>,
    next_uri_tx: mpsc::Sender<String>,
    resp_tx: mpsc::Sender<QueryResponse>,
    err_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            response = http_rx.recv() => match response {
                Some(response) => response,
                None => return,
            },
        };
        let envelope: QueryResponse = match response.json().await {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = err_tx.send(Error::from(e)).await;
                return;
            }
        };
        if let Err(e) = envelope.check_error() {
            let _ = err_tx.send(e).await;
            return;
        }
        let next = envelope.next_uri.clone().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = next_uri_tx.send(next) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = resp_tx.send(envelope) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Streaming cursor over a query's pages.
pub struct Rows {
    conn: Arc<ConnectionInner>,
    cancel: CancellationToken,
    query_id: String,
    user: String,
    columns: Option<Arc<Vec<Column>>>,
    batch: Vec<Vec<serde_json::Value>>,
    row_index: usize,
    rows_affected: i64,
    update_type: Option<String>,
    resp_rx: mpsc::Receiver<QueryResponse>,
    err_rx: mpsc::Receiver<Error>,
    sticky: Option<Error>,
    finished: bool,
    progress: Option<ProgressTracker>,
    _guard: InFlightGuard,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("query_id", &self.query_id)
            .field("row_index", &self.row_index)
            .field("rows_affected", &self.rows_affected)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Rows {
    /// The server-assigned query id, available from the first response on.
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Column metadata; `None` until the first page that carries columns has
    /// been received.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref().map(Vec::as_slice)
    }

    /// Latest update count the server reported.
    pub fn rows_affected(&self) -> i64 {
        self.rows_affected
    }

    /// DDL/DML tag (e.g. `SET SESSION`), when the server sent one.
    pub fn update_type(&self) -> Option<&str> {
        self.update_type.as_deref()
    }

    /// A token that aborts the in-flight query when cancelled. The
    /// server-side DELETE still requires [`Rows::close`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next decoded row, or `None` at end of stream. Errors latch: every
    /// subsequent call returns the same error.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(err) = &self.sticky {
                return Err(err.clone());
            }
            if self.row_index < self.batch.len() {
                let columns = match &self.columns {
                    Some(columns) => columns.clone(),
                    None => {
                        return Err(self.latch(Error::decode(
                            "row data received before column metadata",
                        )));
                    }
                };
                let raw = &self.batch[self.row_index];
                let mut values = Vec::with_capacity(raw.len());
                for (column, cell) in columns.iter().zip(raw) {
                    match column.decode_value(cell) {
                        Ok(value) => values.push(value),
                        Err(e) => return Err(self.latch(e)),
                    }
                }
                self.row_index += 1;
                return Ok(Some(Row { columns, values }));
            }
            if self.finished {
                return Ok(None);
            }
            self.advance().await?;
        }
    }

    /// Pull the next envelope from the pipeline.
    async fn advance(&mut self) -> Result<()> {
        let envelope = tokio::select! {
            // Cancellation and pipeline errors take precedence over an
            // already-buffered envelope.
            biased;
            _ = self.cancel.cancelled() => return Err(self.latch(Error::QueryCancelled)),
            Some(err) = self.err_rx.recv() => return Err(self.latch(err)),
            envelope = self.resp_rx.recv() => envelope,
        };
        match envelope {
            None => {
                // Pipeline wound down; a late error may still be queued.
                if let Ok(err) = self.err_rx.try_recv() {
                    return Err(self.latch(err));
                }
                self.finished = true;
                Ok(())
            }
            Some(envelope) if envelope.id.is_empty() => {
                self.finished = true;
                Ok(())
            }
            Some(envelope) => self.process_envelope(envelope),
        }
    }

    pub(crate) fn process_envelope(&mut self, envelope: QueryResponse) -> Result<()> {
        if self.columns.is_none() {
            // Progress-only pages may carry an empty columns array; defer
            // initialization until columns actually appear.
            if let Some(raw) = &envelope.columns {
                if !raw.is_empty() {
                    let mut columns = Vec::with_capacity(raw.len());
                    for column in raw {
                        columns.push(match Column::decode(column) {
                            Ok(column) => column,
                            Err(e) => return Err(self.latch(e)),
                        });
                    }
                    self.columns = Some(Arc::new(columns));
                }
            }
        }
        if let Some(count) = envelope.update_count {
            self.rows_affected = count;
        }
        if envelope.update_type.is_some() {
            self.update_type = envelope.update_type.clone();
        }
        if let Some(tracker) = &mut self.progress {
            tracker.observe(&envelope.stats);
        }
        if envelope.next_uri.is_none() && envelope.data.is_none() {
            self.finished = true;
        }
        self.batch = envelope.data.unwrap_or_default();
        self.row_index = 0;
        Ok(())
    }

    fn latch(&mut self, err: Error) -> Error {
        self.sticky = Some(err.clone());
        err
    }

    /// Cancel the query on the server (unless it already finished) and tear
    /// the pipeline down. A 204 from the DELETE is success.
    pub async fn close(self) -> Result<()> {
        let result = if self.finished {
            Ok(())
        } else {
            self.cancel_on_server().await
        };
        self.cancel.cancel();
        result
    }

    async fn cancel_on_server(&self) -> Result<()> {
        let url = self
            .conn
            .base_url
            .join(&format!(
                "/v1/query/{}",
                urlencoding::encode(&self.query_id)
            ))
            .map_err(|e| Error::Config(format!("cancel url: {e}")))?;
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user) {
            headers.insert(PRESTO_USER.clone(), value);
        }
        tracing::debug!(query_id = %self.query_id, "cancelling query");

        // Best effort with its own budget, independent of the query's token.
        // The outer timeout caps the whole retry loop, not one attempt; a
        // coordinator stuck on 503 must not hold close() hostage.
        let cancel = CancellationToken::new();
        let delete = self.conn.transport.round_trip(
            Method::DELETE,
            url,
            headers,
            None,
            CANCEL_TIMEOUT,
            &cancel,
        );
        match tokio::time::timeout(CANCEL_TIMEOUT, delete).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) if err.is_status(204) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                tracing::warn!(query_id = %self.query_id, "query cancellation timed out");
                Ok(())
            }
        }
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        // Winds the pipeline tasks down; the server-side DELETE only happens
        // through close().
        self.cancel.cancel();
    }
}

/// One decoded row.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<Vec<Column>>,
    values: Vec<Value>,
}

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<InFlightGuard> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::NotSupported(
                "a query is already in flight on this statement",
            ));
        }
        Ok(InFlightGuard { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
