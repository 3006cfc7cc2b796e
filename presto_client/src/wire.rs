//! Serde model of the `/v1/statement` response envelope.
//!
//! Two wire dialects (Presto and Trino) are deserialized by the same structs;
//! unknown envelope fields (`warnings`, `infoUri`, …) are tolerated so a
//! newer coordinator does not break decode.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::typesig::RawColumn;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct QueryResponse {
    pub id: String,
    pub next_uri: Option<String>,
    pub columns: Option<Vec<RawColumn>>,
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    pub stats: QueryStats,
    pub error: Option<QueryErrorInfo>,
    pub update_type: Option<String>,
    pub update_count: Option<i64>,
}

/// Progress counters the coordinator reports on every page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryStats {
    pub state: String,
    pub scheduled: bool,
    pub nodes: i64,
    pub total_splits: i64,
    pub queued_splits: i64,
    pub running_splits: i64,
    pub completed_splits: i64,
    pub cpu_time_millis: i64,
    pub wall_time_millis: i64,
    pub queued_time_millis: i64,
    pub elapsed_time_millis: i64,
    pub processed_rows: i64,
    pub processed_bytes: i64,
    pub peak_memory_bytes: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct QueryErrorInfo {
    pub message: String,
    pub error_code: i64,
    pub error_name: String,
    pub error_type: String,
}

/// Error name the coordinator uses when the user killed the query.
const USER_CANCELLED: &str = "USER_CANCELLED";

impl QueryResponse {
    /// Translate a server-reported error envelope, if any.
    pub(crate) fn check_error(&self) -> Result<()> {
        let Some(err) = &self.error else {
            return Ok(());
        };
        if err.error_name == USER_CANCELLED {
            return Err(Error::QueryCancelled);
        }
        if !err.error_name.is_empty() {
            return Err(Error::QueryFailed {
                status: 200,
                reason: format!("{} ({}): {}", err.error_name, err.error_code, err.message),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_minimal_envelope() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{"id": "20240102_001", "stats": {"state": "FINISHED"}}"#,
        )
        .unwrap();
        assert_eq!(resp.id, "20240102_001");
        assert_eq!(resp.stats.state, "FINISHED");
        assert!(resp.next_uri.is_none());
        assert!(resp.check_error().is_ok());
    }

    #[test]
    fn tolerates_unknown_fields() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{
                "id": "q",
                "infoUri": "http://x/ui",
                "warnings": [{"warningCode": {"code": 1}}],
                "stats": {"state": "RUNNING", "rootStage": {"stageId": "0"}}
            }"#,
        )
        .unwrap();
        assert_eq!(resp.stats.state, "RUNNING");
    }

    #[test]
    fn user_cancelled_maps_to_cancelled() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{"id": "q", "error": {"message": "killed", "errorCode": 4, "errorName": "USER_CANCELLED", "errorType": "USER_ERROR"}}"#,
        )
        .unwrap();
        assert!(matches!(
            resp.check_error().unwrap_err(),
            Error::QueryCancelled
        ));
    }

    #[test]
    fn server_error_wraps_name_code_message() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{"id": "q", "error": {"message": "line 1:8: mismatched input", "errorCode": 1, "errorName": "SYNTAX_ERROR", "errorType": "USER_ERROR"}}"#,
        )
        .unwrap();
        match resp.check_error().unwrap_err() {
            Error::QueryFailed { status, reason } => {
                assert_eq!(status, 200);
                assert_eq!(reason, "SYNTAX_ERROR (1): line 1:8: mismatched input");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
