//! Client for the Presto (and Trino) HTTP statement protocol.
//!
//! A statement is POSTed to `/v1/statement`; the coordinator answers with a
//! paged envelope whose `nextUri` the client chases until the query is
//! terminal. Pages stream through a small two-task pipeline so the next HTTP
//! fetch overlaps with the caller decoding the current page, and session
//! directives carried in response headers rewrite the connection state for
//! every request that follows.
//!
//! ```no_run
//! # async fn run() -> presto_client::Result<()> {
//! let conn = presto_client::Connection::open("http://scott@coordinator:8080?catalog=hive")?;
//! let stmt = conn.prepare("SELECT id, name FROM users WHERE name = ?");
//! let mut rows = stmt
//!     .query(vec![presto_client::QueryParam::value("O'Hara")])
//!     .await?;
//! while let Some(row) = rows.next().await? {
//!     println!("{:?}", row.values());
//! }
//! rows.close().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod config;
mod connection;
mod error;
mod headers;
mod params;
mod progress;
mod registry;
mod statement;
mod transport;
mod typesig;
mod value;
mod wire;

pub use config::{Config, KerberosConfig};
pub use connection::Connection;
pub use error::{Error, Result};
pub use params::{Numeric, Param};
pub use progress::{ProgressInfo, ProgressObserver};
pub use registry::{deregister_custom_client, register_custom_client};
pub use statement::{ExecOutcome, QueryParam, Row, Rows, Statement};
pub use transport::SpnegoTokenSource;
pub use typesig::{Column, NamedTypeSignature, RowFieldName, ScanKind, TypeArgument, TypeSignature};
pub use value::Value;
pub use wire::QueryStats;
