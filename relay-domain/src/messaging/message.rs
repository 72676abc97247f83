//! 消息模型
//!
//! 请求/应答与单向通知共用同一信封：`correlationId`、`timestamp`、`traceId`
//! 加上业务负载；应答携带 `success`、`statusCode`、`message` 与可选负载。
//!
use crate::error::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    correlation_id: String,
    timestamp: DateTime<Utc>,
    trace_id: String,
    #[serde(rename = "data")]
    payload: Value,
}

impl RequestMessage {
    /// 以新的 correlation id 与当前时间构造消息
    pub fn new(trace_id: impl Into<String>, payload: Value) -> Self {
        Self::correlated(Uuid::new_v4().to_string(), trace_id, payload)
    }

    /// 使用调用方预先分配的 correlation id
    pub fn correlated(
        correlation_id: impl Into<String>,
        trace_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            trace_id: trace_id.into(),
            payload,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 将负载解码为具体类型
    pub fn decode<T: DeserializeOwned>(&self) -> DomainResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(DomainError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    success: bool,
    status_code: u16,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "data")]
    payload: Option<Value>,
}

impl ReplyMessage {
    pub fn ok(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            success: true,
            status_code: 200,
            message: message.into(),
            payload,
        }
    }

    pub fn failure(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status_code,
            message: message.into(),
            payload: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_camel_case() {
        let msg = RequestMessage::new("trace-1", json!({ "email": "a@b.c" }));
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["traceId"], "trace-1");
        assert_eq!(wire["data"]["email"], "a@b.c");
        assert!(wire["correlationId"].as_str().is_some());

        let reply = serde_json::to_value(ReplyMessage::failure(400, "bad email")).unwrap();
        assert_eq!(reply, json!({ "success": false, "statusCode": 400, "message": "bad email" }));
    }

    #[test]
    fn correlation_ids_are_fresh() {
        let a = RequestMessage::new("t", json!({}));
        let b = RequestMessage::new("t", json!({}));
        assert_ne!(a.correlation_id(), b.correlation_id());
    }
}
