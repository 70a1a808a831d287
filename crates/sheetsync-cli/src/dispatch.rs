//! Line-delimited JSON operation dispatcher.
//!
//! Each request is one JSON object tagged by `op`; each response is one JSON
//! object. Failures are reported as `{"error": "..."}` and never end the
//! session. A request may carry an `id`, which is echoed in its response so
//! callers can match responses that complete out of order.

use serde::{Deserialize, Serialize};
use sheetsync_core::snapshot::{Condition, Record};
use sheetsync_core::{Lookup, Result, TableSync};
use tracing::debug;

/// A cell value as sent by callers. Numbers and booleans are written as
/// their JSON text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

/// Supported requests.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Configure {
        #[serde(default)]
        key_spec: Option<String>,
        #[serde(default)]
        header_row: Option<i64>,
    },
    Query {
        #[serde(default)]
        conditions: Vec<Condition>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Get {
        key: Scalar,
    },
    Update {
        key: Scalar,
        column: String,
        value: Scalar,
    },
    Flush {
        key: Scalar,
        column: String,
        value: Scalar,
    },
    AppendValue {
        key: Scalar,
        column: String,
        value: Scalar,
        #[serde(default)]
        separator: Option<String>,
    },
}

impl Request {
    /// Whether the request may wait on the store and can run alongside
    /// others. The rest mutate local state and run in arrival order.
    pub fn is_concurrent(&self) -> bool {
        matches!(
            self,
            Request::Query { .. } | Request::Get { .. } | Request::Flush { .. }
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Request::Configure { .. } => "configure",
            Request::Query { .. } => "query",
            Request::Get { .. } => "get",
            Request::Update { .. } => "update",
            Request::Flush { .. } => "flush",
            Request::AppendValue { .. } => "append_value",
        }
    }
}

/// Responses, serialized without a tag.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Response {
    Keys { keys: Vec<String> },
    Row(Record),
    Ok { ok: bool },
    Error { error: String },
}

impl Response {
    fn ok() -> Self {
        Response::Ok { ok: true }
    }

    fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }
}

/// A request line: optional correlation id plus the operation.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub request: Request,
}

/// A response line.
#[derive(Debug, Serialize, PartialEq)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(flatten)]
    pub response: Response,
}

/// Parse one request line, or produce the error reply for it.
pub fn parse(line: &str) -> std::result::Result<Envelope, Reply> {
    serde_json::from_str(line).map_err(|e| Reply {
        id: None,
        response: Response::error(format!("Invalid request: {e}")),
    })
}

/// Execute a parsed request.
pub async fn execute(sync: &TableSync, envelope: Envelope) -> Reply {
    let Envelope { id, request } = envelope;
    let op = request.name();
    debug!(op, "Dispatching request");

    let response = match handle(sync, request).await {
        Ok(response) => response,
        Err(e) => {
            debug!(op, error = %e, "Request failed");
            Response::error(e.to_string())
        }
    };
    Reply { id, response }
}

async fn handle(sync: &TableSync, request: Request) -> Result<Response> {
    let response = match request {
        Request::Configure {
            key_spec,
            header_row,
        } => {
            // Negative rows clamp to 0 so validation reports them
            let header_row = header_row.map(|row| u32::try_from(row.max(0)).unwrap_or(u32::MAX));
            sync.configure(key_spec, header_row)?;
            Response::ok()
        }
        Request::Query { conditions, limit } => Response::Keys {
            keys: sync.query(&conditions, limit).await?,
        },
        Request::Get { key } => match sync.get(&key.into_text()).await? {
            Lookup::Found(record) => Response::Row(record),
            Lookup::NotFound => Response::error("Key not found"),
        },
        Request::Update { key, column, value } => {
            sync.update(&key.into_text(), &column, &value.into_text())?;
            Response::ok()
        }
        Request::Flush { key, column, value } => {
            sync.flush(&key.into_text(), &column, &value.into_text())
                .await?;
            Response::ok()
        }
        Request::AppendValue {
            key,
            column,
            value,
            separator,
        } => {
            sync.append_value(
                &key.into_text(),
                &column,
                &value.into_text(),
                separator.as_deref(),
            )
            .await?;
            Response::ok()
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetsync_core::config::{StoreBackend, StoreConfig};
    use sheetsync_core::store::MemoryTableStore;
    use sheetsync_core::Config;
    use std::sync::Arc;

    async fn setup() -> (Arc<MemoryTableStore>, Arc<TableSync>) {
        let store = Arc::new(MemoryTableStore::new(
            "Sheet1",
            vec![
                vec!["id", "name", "status", "lock"],
                vec!["item001", "", "未処理", ""],
                vec!["item002", "", "処理済", ""],
            ],
        ));
        let mut config = Config::new(StoreConfig::new(StoreBackend::Memory, "doc", "Sheet1"));
        config.sync.read_interval_ms = 0;
        let sync = TableSync::start(config, store.clone()).await.unwrap();
        (store, sync)
    }

    async fn dispatch(sync: &TableSync, line: &str) -> Reply {
        match parse(line) {
            Ok(envelope) => execute(sync, envelope).await,
            Err(reply) => reply,
        }
    }

    async fn call(sync: &TableSync, line: &str) -> Response {
        dispatch(sync, line).await.response
    }

    fn to_json(response: &Response) -> serde_json::Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_query() {
        let (_store, sync) = setup().await;
        let response = call(
            &sync,
            r#"{"op":"query","conditions":[["status","==","未処理"]]}"#,
        )
        .await;
        assert_eq!(to_json(&response), serde_json::json!({"keys": ["item001"]}));

        let response = call(&sync, r#"{"op":"query","limit":1}"#).await;
        assert_eq!(to_json(&response), serde_json::json!({"keys": ["item001"]}));
    }

    #[tokio::test]
    async fn test_get_found_and_missing() {
        let (_store, sync) = setup().await;

        let response = call(&sync, r#"{"op":"get","key":"item002"}"#).await;
        assert_eq!(
            to_json(&response),
            serde_json::json!({"id": "item002", "name": "", "status": "処理済", "lock": ""})
        );

        let response = call(&sync, r#"{"op":"get","key":"item003"}"#).await;
        assert_eq!(response, Response::error("Key not found"));
    }

    #[tokio::test]
    async fn test_update_enqueues() {
        let (store, sync) = setup().await;
        let response = call(
            &sync,
            r#"{"op":"update","key":"item001","column":"status","value":"処理済"}"#,
        )
        .await;

        assert_eq!(response, Response::ok());
        assert_eq!(sync.writer().pending_len(), 1);
        assert_eq!(store.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_flush_accepts_numeric_value() {
        let (store, sync) = setup().await;
        let response = call(
            &sync,
            r#"{"op":"flush","key":"item002","column":"lock","value":42}"#,
        )
        .await;

        assert_eq!(response, Response::ok());
        assert_eq!(store.cell(3, 3).as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_append_value() {
        let (_store, sync) = setup().await;
        let response = call(
            &sync,
            r#"{"op":"append_value","key":"item001","column":"status","value":"note","separator":"; "}"#,
        )
        .await;

        assert_eq!(response, Response::ok());
        let pending = sync.writer().pending();
        assert_eq!(pending[0].value, "未処理; note");
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_header_row() {
        let (_store, sync) = setup().await;

        let response = call(&sync, r#"{"op":"configure","header_row":-2}"#).await;
        match response {
            Response::Error { error } => assert!(error.contains("header_row")),
            other => panic!("expected error, got {other:?}"),
        }

        let response = call(&sync, r#"{"op":"configure","key_spec":"C"}"#).await;
        assert_eq!(response, Response::ok());
        assert_eq!(sync.cache().layout().key_spec.as_deref(), Some("C"));
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (_store, sync) = setup().await;

        match call(&sync, "not json").await {
            Response::Error { error } => assert!(error.starts_with("Invalid request")),
            other => panic!("expected error, got {other:?}"),
        }
        match call(&sync, r#"{"op":"delete","key":"item001"}"#).await {
            Response::Error { error } => assert!(error.starts_with("Invalid request")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_id_is_echoed() {
        let (_store, sync) = setup().await;

        let reply = dispatch(&sync, r#"{"id":7,"op":"get","key":"item003"}"#).await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"id": 7, "error": "Key not found"})
        );

        let reply = dispatch(&sync, r#"{"id":"a","op":"query","limit":1}"#).await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"id": "a", "keys": ["item001"]})
        );

        let reply = dispatch(&sync, r#"{"op":"get","key":"item001"}"#).await;
        assert!(serde_json::to_value(&reply).unwrap().get("id").is_none());
    }

    #[test]
    fn test_concurrent_requests() {
        let parsed = |line: &str| parse(line).unwrap().request;
        assert!(parsed(r#"{"op":"get","key":"k"}"#).is_concurrent());
        assert!(parsed(r#"{"op":"query"}"#).is_concurrent());
        assert!(parsed(r#"{"op":"flush","key":"k","column":"c","value":"v"}"#).is_concurrent());
        assert!(!parsed(r#"{"op":"update","key":"k","column":"c","value":"v"}"#).is_concurrent());
        assert!(!parsed(r#"{"op":"configure","key_spec":"A"}"#).is_concurrent());
    }
}
