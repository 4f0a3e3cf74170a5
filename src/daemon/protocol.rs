//! Daemon protocol - newline-delimited JSON requests and responses.
//!
//! ```text
//! -> {"id":"1","method":"daemon.ping"}
//! <- {"id":"1","result":{"pong":true,"timestamp":1700000000000}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::config::PartialOptions;

/// RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Domain errors
    pub const NO_CACHED_SCAN: i64 = -32001;
    pub const INVALID_ROOT: i64 = -32002;
    pub const HISTORY_NOT_FOUND: i64 = -32003;
}

/// Id used when a line is too broken to carry one.
pub const UNKNOWN_ID: &str = "unknown";

/// Request from a client to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Structured error carried by a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(reason: impl std::fmt::Display) -> Self {
        Self::new(codes::PARSE_ERROR, format!("parse error: {}", reason))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("method not found: {}", method))
    }

    pub fn invalid_params(method: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            codes::INVALID_PARAMS,
            format!("invalid params for {}: {}", method, reason),
        )
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Response from the daemon. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok<T: Serialize>(id: impl Into<String>, data: T) -> Self {
        Response {
            id: id.into(),
            result: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: RpcError) -> Self {
        Response {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ─── Typed params ──────────────────────────────────────────────────

/// `project.scan` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanParams {
    pub root: PathBuf,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub preset: Option<String>,
    /// Return the relative path of every file in the summary.
    #[serde(default)]
    pub include_files: bool,
    #[serde(flatten)]
    pub options: PartialOptions,
}

/// `bundle.generate` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleParams {
    pub root: PathBuf,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub out_file: Option<PathBuf>,
    #[serde(default)]
    pub include_content: bool,
    #[serde(flatten)]
    pub options: PartialOptions,
}

/// Params naming only a project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootParams {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryListParams {
    pub limit: Option<usize>,
    pub project: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryGetParams {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheClearParams {
    #[serde(alias = "root")]
    pub project: Option<PathBuf>,
}

/// A request decoded into its method and typed params.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    DaemonStatus,
    DaemonPing,
    DaemonShutdown,
    ProjectScan(ScanParams),
    BundleGenerate(BundleParams),
    TokensEstimate(RootParams),
    HistoryList(HistoryListParams),
    HistoryGet(HistoryGetParams),
    HistoryStats,
    SchemaCli,
    SchemaLlm,
    CacheClear(CacheClearParams),
    CacheStats,
}

/// Every method the daemon answers.
pub const METHODS: &[&str] = &[
    "daemon.status",
    "daemon.ping",
    "daemon.shutdown",
    "project.scan",
    "bundle.generate",
    "tokens.estimate",
    "history.list",
    "history.get",
    "history.stats",
    "schema.cli",
    "schema.llm",
    "cache.clear",
    "cache.stats",
];

impl MethodCall {
    /// Decode a method name and its params.
    ///
    /// Unknown names yield "method not found"; params that do not fit the
    /// method's shape yield "invalid params". Absent params decode as `{}`.
    pub fn decode(method: &str, params: Option<Value>) -> Result<Self, RpcError> {
        let call = match method {
            "daemon.status" => MethodCall::DaemonStatus,
            "daemon.ping" => MethodCall::DaemonPing,
            "daemon.shutdown" => MethodCall::DaemonShutdown,
            "project.scan" => MethodCall::ProjectScan(decode_params(method, params)?),
            "bundle.generate" => MethodCall::BundleGenerate(decode_params(method, params)?),
            "tokens.estimate" => MethodCall::TokensEstimate(decode_params(method, params)?),
            "history.list" => MethodCall::HistoryList(decode_params(method, params)?),
            "history.get" => MethodCall::HistoryGet(decode_params(method, params)?),
            "history.stats" => MethodCall::HistoryStats,
            "schema.cli" => MethodCall::SchemaCli,
            "schema.llm" => MethodCall::SchemaLlm,
            "cache.clear" => MethodCall::CacheClear(decode_params(method, params)?),
            "cache.stats" => MethodCall::CacheStats,
            other => return Err(RpcError::method_not_found(other)),
        };
        Ok(call)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::DaemonStatus => "daemon.status",
            MethodCall::DaemonPing => "daemon.ping",
            MethodCall::DaemonShutdown => "daemon.shutdown",
            MethodCall::ProjectScan(_) => "project.scan",
            MethodCall::BundleGenerate(_) => "bundle.generate",
            MethodCall::TokensEstimate(_) => "tokens.estimate",
            MethodCall::HistoryList(_) => "history.list",
            MethodCall::HistoryGet(_) => "history.get",
            MethodCall::HistoryStats => "history.stats",
            MethodCall::SchemaCli => "schema.cli",
            MethodCall::SchemaLlm => "schema.llm",
            MethodCall::CacheClear(_) => "cache.clear",
            MethodCall::CacheStats => "cache.stats",
        }
    }
}

fn decode_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, RpcError> {
    let value = match params {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(v @ Value::Object(_)) => v,
        Some(_) => return Err(RpcError::invalid_params(method, "params must be an object")),
    };
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(method, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_serialization_omits_absent_fields() {
        let ok = Response::ok("1", json!({"pong": true}));
        let text = serde_json::to_string(&ok).unwrap();
        assert_eq!(text, r#"{"id":"1","result":{"pong":true}}"#);

        let err = Response::error("2", RpcError::method_not_found("nope"));
        let value = serde_json::to_value(&err).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], codes::METHOD_NOT_FOUND);
        assert!(value["error"].get("data").is_none());
    }

    #[test]
    fn test_request_params_are_optional() {
        let req: Request = serde_json::from_str(r#"{"id":"1","method":"daemon.ping"}"#).unwrap();
        assert_eq!(req.params, None);
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"id":"1","method":"daemon.ping"}"#
        );
    }

    #[test]
    fn test_decode_known_methods() {
        assert_eq!(MethodCall::decode("daemon.ping", None), Ok(MethodCall::DaemonPing));

        let call = MethodCall::decode(
            "project.scan",
            Some(json!({"root": "/tmp/p", "force": true, "extensions": ["rs"], "maxFileSize": 10})),
        )
        .unwrap();
        match call {
            MethodCall::ProjectScan(p) => {
                assert_eq!(p.root, PathBuf::from("/tmp/p"));
                assert!(p.force);
                assert!(!p.include_files);
                assert_eq!(p.options.extensions, Some(vec!["rs".to_string()]));
                assert_eq!(p.options.max_file_size, Some(10));
            }
            other => panic!("unexpected {:?}", other),
        }

        let clear = MethodCall::decode("cache.clear", Some(json!({"root": "/x"}))).unwrap();
        assert_eq!(
            clear,
            MethodCall::CacheClear(CacheClearParams { project: Some(PathBuf::from("/x")) })
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = MethodCall::decode("files.delete", None).unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);

        let err = MethodCall::decode("tokens.estimate", None).unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
        assert!(err.message.contains("root"));

        let err = MethodCall::decode("history.get", Some(json!([1, 2]))).unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);

        let err = MethodCall::decode("bundle.generate", Some(json!({"root": "/p", "format": "html"})))
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[test]
    fn test_method_table_round_trips_names() {
        for name in METHODS {
            let params = match *name {
                "project.scan" | "bundle.generate" | "tokens.estimate" => Some(json!({"root": "/p"})),
                "history.get" => Some(json!({"id": "x"})),
                _ => None,
            };
            let call = MethodCall::decode(name, params).unwrap();
            assert_eq!(call.name(), *name);
        }
    }
}
