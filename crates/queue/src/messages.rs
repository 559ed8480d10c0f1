//! Typed `data` payloads for the broker commands this crate issues.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{commands, Envelope};

/// Payload of a `signin` request.
#[derive(Debug, Serialize)]
pub struct SigninRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Payload of a `signin` reply.
#[derive(Debug, Deserialize)]
pub struct SigninResponse {
    pub jwt: String,
    pub user: SigninUser,
}

#[derive(Debug, Deserialize)]
pub struct SigninUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
}

/// Payload of a `registerqueue` request. Omitting `queuename` asks the
/// broker to assign a unique name.
#[derive(Debug, Serialize)]
pub struct RegisterQueueRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queuename: Option<&'a str>,
    pub jwt: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RegisterQueueResponse {
    pub queuename: String,
}

#[derive(Debug, Serialize)]
pub struct CloseQueueRequest<'a> {
    pub queuename: &'a str,
    pub jwt: &'a str,
}

/// A message addressed to a named queue, both as sent (`queuemessage`
/// request) and as delivered to a registered queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub queuename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replyto: Option<String>,
    #[serde(rename = "correlationId", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

impl QueueMessage {
    pub fn new(queuename: impl Into<String>, data: Value) -> Self {
        Self {
            queuename: queuename.into(),
            replyto: None,
            correlation_id: None,
            data,
            jwt: None,
        }
    }

    pub fn with_replyto(mut self, replyto: impl Into<String>) -> Self {
        self.replyto = Some(replyto.into());
        self
    }

    pub fn with_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    /// Wrap the message in a `queuemessage` envelope whose id doubles as
    /// the message's correlation id.
    pub fn into_envelope(mut self) -> Result<Envelope, serde_json::Error> {
        let id = Envelope::new_id();
        self.correlation_id = Some(id.clone());
        let data = serde_json::to_string(&self)?;
        Ok(Envelope::with_id(id, commands::QUEUE_MESSAGE, data))
    }
}

/// Extract the remote failure message from a reply, if it is one.
///
/// A reply is an error when its command is `error`, or when its JSON
/// payload carries a non-null `error` field.
pub fn remote_error(command: &str, data: &str) -> Option<String> {
    let parsed: Option<Value> = serde_json::from_str(data).ok();
    let field = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .filter(|e| !e.is_null());

    match (command == commands::ERROR, field) {
        (_, Some(Value::String(message))) => Some(message.clone()),
        (_, Some(Value::Object(obj))) if obj.get("message").is_some_and(Value::is_string) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        (_, Some(other)) => Some(other.to_string()),
        (true, None) => Some(if data.is_empty() {
            "unknown remote error".to_string()
        } else {
            data.to_string()
        }),
        (false, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn queue_message_envelope_carries_its_own_correlation_id() {
        let msg = QueueMessage::new("robot-1", json!({"command": "invoke"}))
            .with_replyto("reply-q")
            .with_jwt("token");
        let env = msg.into_envelope().unwrap();

        assert_eq!(env.command, commands::QUEUE_MESSAGE);
        let body: Value = serde_json::from_str(&env.data).unwrap();
        assert_eq!(body["correlationId"], env.id.as_str());
        assert_eq!(body["queuename"], "robot-1");
        assert_eq!(body["replyto"], "reply-q");
        assert_eq!(body["data"]["command"], "invoke");
    }

    #[test]
    fn delivered_queue_message_parses_without_optional_fields() {
        let msg: QueueMessage =
            serde_json::from_str(r#"{"queuename":"q","data":{"command":"invokesuccess"}}"#)
                .unwrap();
        assert_eq!(msg.queuename, "q");
        assert!(msg.replyto.is_none());
        assert_eq!(msg.data["command"], "invokesuccess");
    }

    #[test]
    fn register_queue_request_omits_missing_name() {
        let req = RegisterQueueRequest {
            queuename: None,
            jwt: "t",
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"jwt":"t"}"#);
    }

    #[test]
    fn remote_error_detection() {
        assert_eq!(
            remote_error("query", r#"{"error":"access denied"}"#),
            Some("access denied".to_string())
        );
        assert_eq!(
            remote_error("query", r#"{"error":{"message":"bad filter"}}"#),
            Some("bad filter".to_string())
        );
        assert_eq!(
            remote_error("error", "boom"),
            Some("boom".to_string())
        );
        assert_eq!(remote_error("query", r#"{"error":null,"result":[]}"#), None);
        assert_eq!(remote_error("query", r#"{"result":[]}"#), None);
    }
}
