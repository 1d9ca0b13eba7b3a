//! Wire envelopes exchanged with the relay.
//!
//! ```text
//! relay → agent   {"correlationId": <string|number>, "data": <any>}
//! agent → relay   {"correlationId": <echoed>,        "data": <any>}
//! agent → relay   {"async": true,                    "data": <any>}
//! agent → relay   {"ping": "pong"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};

/// Opaque token pairing a request with its response. Echoed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Text(String),
    Number(Number),
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Inbound request from the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub data: Value,
}

impl Request {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Every message the agent sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Response {
        #[serde(rename = "correlationId")]
        correlation_id: CorrelationId,
        data: Value,
    },
    Async {
        #[serde(rename = "async")]
        is_async: bool,
        data: Value,
    },
    Keepalive {
        ping: &'static str,
    },
}

impl Outbound {
    pub fn response(correlation_id: CorrelationId, data: Value) -> Self {
        Self::Response {
            correlation_id,
            data,
        }
    }

    pub fn push(data: Value) -> Self {
        Self::Async {
            is_async: true,
            data,
        }
    }

    pub fn keepalive() -> Self {
        Self::Keepalive { ping: "pong" }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Response { .. } => "response",
            Self::Async { .. } => "async",
            Self::Keepalive { .. } => "keepalive",
        }
    }
}

/// Payload sent in place of a handler result when the handler fails.
pub fn handler_error_payload() -> Value {
    json!({"status": "error", "error": "Unknown error"})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_and_numeric_ids() {
        let req = Request::decode(r#"{"correlationId":"7","data":{"cmd":"play"}}"#).unwrap();
        assert_eq!(req.correlation_id, CorrelationId::Text("7".into()));
        assert_eq!(req.data, json!({"cmd": "play"}));

        let req = Request::decode(r#"{"correlationId":42,"data":null}"#).unwrap();
        assert_eq!(req.correlation_id.to_string(), "42");
    }

    #[test]
    fn missing_data_is_null() {
        let req = Request::decode(r#"{"correlationId":"a"}"#).unwrap();
        assert_eq!(req.data, Value::Null);
    }

    #[test]
    fn rejects_missing_or_odd_correlation_id() {
        assert!(Request::decode(r#"{"data":{}}"#).is_err());
        assert!(Request::decode(r#"{"correlationId":{"x":1},"data":{}}"#).is_err());
        assert!(Request::decode("not json").is_err());
    }

    #[test]
    fn numeric_id_is_echoed_as_number() {
        let req = Request::decode(r#"{"correlationId":12,"data":1}"#).unwrap();
        let out = Outbound::response(req.correlation_id, json!({"ok": true}));
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({"correlationId": 12, "data": {"ok": true}})
        );
    }

    #[test]
    fn outbound_shapes() {
        assert_eq!(
            serde_json::to_value(Outbound::keepalive()).unwrap(),
            json!({"ping": "pong"})
        );
        assert_eq!(
            serde_json::to_value(Outbound::push(json!({"state": "idle"}))).unwrap(),
            json!({"async": true, "data": {"state": "idle"}})
        );
        assert_eq!(
            handler_error_payload(),
            json!({"status": "error", "error": "Unknown error"})
        );
    }
}
