//! Wire frames exchanged between the script context and the native side
//!
//! Wire format: one JSON object per frame, tagged by `type`:
//! - `{"type":"invoke","id":..,"cmd":..,"payload":..}` script -> native
//! - `{"type":"resolve","id":..,"result":..}` or `{"type":"resolve","id":..,"error":{kind,message}}`
//! - `{"type":"event","name":..,"data":..}` native -> script
//!
//! Byte streams carry NDJSON. Webviews receive the same values as escaped
//! arguments of a `window.__native__` call.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crossweb_core::{
    BridgeConfig, BridgeError, BridgeResult, Command, CommandError, CommandResult, Event,
};

/// Global object the script shim installs
pub const SCRIPT_NAMESPACE: &str = "window.__native__";

/// A single frame on the bridge
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Invoke {
        id: String,
        cmd: String,
        #[serde(default, deserialize_with = "payload_text")]
        payload: String,
    },
    Resolve {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CommandError>,
    },
    Event {
        name: String,
        #[serde(default)]
        data: Value,
    },
}

/// Accept the payload as a string, or as any JSON value kept as its text
fn payload_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Frame {
    pub fn invoke(id: impl Into<String>, command: &Command) -> Self {
        Frame::Invoke {
            id: id.into(),
            cmd: command.name.clone(),
            payload: command.payload.clone(),
        }
    }

    pub fn resolve(id: impl Into<String>, outcome: CommandResult<Value>) -> Self {
        let id = id.into();
        match outcome {
            Ok(result) => Frame::Resolve {
                id,
                result: Some(result),
                error: None,
            },
            Err(error) => Frame::Resolve {
                id,
                result: None,
                error: Some(error),
            },
        }
    }

    pub fn event(event: Event) -> Self {
        Frame::Event {
            name: event.name,
            data: event.data,
        }
    }

    /// Parse one line or message
    pub fn parse(text: &str) -> BridgeResult<Self> {
        serde_json::from_str(text.trim()).map_err(|e| BridgeError::InvalidFrame(e.to_string()))
    }

    /// Serialize to a single NDJSON line (with trailing newline)
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }

    /// Script call delivering this frame to a webview
    ///
    /// Invoke frames travel the other way and have no script form.
    pub fn to_script(&self) -> Option<String> {
        match self {
            Frame::Resolve { id, result, error } => Some(format!(
                "{}.onMessage({}, {}, {});",
                SCRIPT_NAMESPACE,
                script_literal(&Value::String(id.clone())),
                script_literal(result.as_ref().unwrap_or(&Value::Null)),
                script_literal(&serde_json::to_value(error).unwrap_or(Value::Null)),
            )),
            Frame::Event { name, data } => Some(format!(
                "{}.onEvent({}, {});",
                SCRIPT_NAMESPACE,
                script_literal(&Value::String(name.clone())),
                script_literal(data),
            )),
            Frame::Invoke { .. } => None,
        }
    }

    /// Correlation id, if the frame carries one
    pub fn id(&self) -> Option<&str> {
        match self {
            Frame::Invoke { id, .. } | Frame::Resolve { id, .. } => Some(id),
            Frame::Event { .. } => None,
        }
    }
}

/// Turn a resolve frame's fields back into the handler outcome
pub fn resolve_outcome(result: Option<Value>, error: Option<CommandError>) -> CommandResult<Value> {
    match error {
        Some(err) => Err(err),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}

/// JSON text that is also safe to splice into a `<script>` body or an
/// evaluated string. Only characters inside string literals can need
/// escaping, and their `\uXXXX` forms are valid JSON.
pub fn script_literal(value: &Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Check an inbound invocation against the configured limits
///
/// The id itself is assumed non-empty; frames without one cannot be answered.
pub fn validate_invocation(id: &str, command: &Command, limits: &BridgeConfig) -> CommandResult<()> {
    if id.len() > limits.max_id_len {
        return Err(CommandError::invalid_payload(format!(
            "id exceeds {} bytes",
            limits.max_id_len
        )));
    }
    if command.name.is_empty() {
        return Err(CommandError::invalid_payload("empty command name"));
    }
    if command.name.len() > limits.max_command_len {
        return Err(CommandError::invalid_payload(format!(
            "command name exceeds {} bytes",
            limits.max_command_len
        )));
    }
    if command.payload.len() > limits.max_payload_bytes {
        return Err(CommandError::invalid_payload(format!(
            "payload exceeds {} bytes",
            limits.max_payload_bytes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossweb_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_parse_invoke_with_string_payload() {
        let frame = Frame::parse(r#"{"type":"invoke","id":"a1","cmd":"keystore.encrypt","payload":"deadbeef"}"#)
            .unwrap();
        assert_eq!(
            frame,
            Frame::Invoke {
                id: "a1".into(),
                cmd: "keystore.encrypt".into(),
                payload: "deadbeef".into(),
            }
        );
    }

    #[test]
    fn test_parse_invoke_with_object_payload() {
        let frame = Frame::parse(r#"{"type":"invoke","id":"a2","cmd":"fs.read","payload":{"path":"a.txt"}}"#)
            .unwrap();
        match frame {
            Frame::Invoke { payload, .. } => {
                let value: Value = serde_json::from_str(&payload).unwrap();
                assert_eq!(value, json!({"path": "a.txt"}));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let frame = Frame::parse(r#"{"type":"invoke","id":"a3","cmd":"keystore.load"}"#).unwrap();
        assert!(matches!(frame, Frame::Invoke { ref payload, .. } if payload.is_empty()));
    }

    #[test]
    fn test_resolve_shapes() {
        let ok = serde_json::to_value(Frame::resolve("x", Ok(json!({"ok": true})))).unwrap();
        assert_eq!(ok, json!({"type": "resolve", "id": "x", "result": {"ok": true}}));

        let err = serde_json::to_value(Frame::resolve("y", Err(CommandError::unknown_command("nope.cmd")))).unwrap();
        assert_eq!(err["error"]["kind"], "unknown_command");
        assert!(err.get("result").is_none());
    }

    #[test]
    fn test_resolve_null_result_roundtrips_as_success() {
        let line = Frame::resolve("n", Ok(Value::Null)).to_ndjson().unwrap();
        match Frame::parse(&line).unwrap() {
            Frame::Resolve { result, error, .. } => {
                assert_eq!(resolve_outcome(result, error), Ok(Value::Null));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_ndjson_is_single_line() {
        let frame = Frame::event(Event::new("note", json!({"text": "a\nb"})));
        let line = frame.to_ndjson().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = Frame::parse("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
    }

    #[test]
    fn test_script_literal_cannot_break_out() {
        let hostile = json!({"privateKey": "\"); alert(1); (\"</script><script>&\u{2028}\u{2029}"});
        let literal = script_literal(&hostile);
        assert!(!literal.contains("</script>"));
        assert!(!literal.contains('<'));
        assert!(!literal.contains('&'));
        assert!(!literal.contains('\u{2028}'));
        assert!(!literal.contains('\u{2029}'));
        // Still the same JSON value
        let back: Value = serde_json::from_str(&literal).unwrap();
        assert_eq!(back, hostile);
    }

    #[test]
    fn test_to_script_resolve_and_event() {
        let script = Frame::resolve("id-1", Ok(json!({"ok": true}))).to_script().unwrap();
        assert_eq!(script, r#"window.__native__.onMessage("id-1", {"ok":true}, null);"#);

        let script = Frame::resolve("id-2", Err(CommandError::handler_fault("boom")))
            .to_script()
            .unwrap();
        assert!(script.starts_with(r#"window.__native__.onMessage("id-2", null, {"#));
        assert!(script.contains(r#""kind":"handler_fault""#));

        let script = Frame::event(Event::new("host.ready", json!({}))).to_script().unwrap();
        assert_eq!(script, r#"window.__native__.onEvent("host.ready", {});"#);

        assert!(Frame::invoke("i", &Command::new("a.b", "")).to_script().is_none());
    }

    #[test]
    fn test_validate_limits() {
        let limits = BridgeConfig::default();
        assert!(validate_invocation("id", &Command::new("keystore.load", ""), &limits).is_ok());

        let long_id = "i".repeat(limits.max_id_len + 1);
        let err = validate_invocation(&long_id, &Command::new("keystore.load", ""), &limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);

        let err = validate_invocation("id", &Command::new("", ""), &limits).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidPayload);

        let long_cmd = format!("x.{}", "c".repeat(limits.max_command_len));
        assert!(validate_invocation("id", &Command::new(long_cmd, ""), &limits).is_err());

        let big = "a".repeat(limits.max_payload_bytes + 1);
        assert!(validate_invocation("id", &Command::new("fs.write", big), &limits).is_err());
    }
}
