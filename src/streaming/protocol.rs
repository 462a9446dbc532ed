//! Text framing of the subscription websocket.
//!
//! Client to server:
//!
//! - `connect <version> <json>` once, answered by `connected`
//! - `sub <id> <json>` to subscribe
//! - `unsub <id>` to unsubscribe
//!
//! Server to client, per subscription:
//!
//! - `<id> A <json>` full answer
//! - `<id> D <delta>` answer encoded against the previous one
//! - `<id> C` subscription closed
//! - `<id> E <json>` subscription failed

use serde_json::Value;

use crate::auth::LoginMode;
use crate::error::api_error_message;
use crate::{Error, Result};

/// Handshake reply.
pub(crate) const CONNECTED: &str = "connected";

/// Protocol version announced by web sessions.
pub(crate) const WEB_PROTOCOL_VERSION: u32 = 31;

/// Protocol version announced by app sessions.
pub(crate) const APP_PROTOCOL_VERSION: u32 = 21;

/// Error code the service uses when a session is no longer valid.
const AUTHENTICATION_ERROR: &str = "AUTHENTICATION_ERROR";

pub(crate) fn connect_message(mode: LoginMode, locale: &str) -> String {
    match mode {
        LoginMode::Web => {
            let hello = serde_json::json!({
                "locale": locale,
                "platformId": "webtrading",
                "platformVersion": "chrome - 120.0.0",
                "clientId": "app.traderepublic.com",
                "clientVersion": env!("CARGO_PKG_VERSION"),
            });
            format!("connect {WEB_PROTOCOL_VERSION} {hello}")
        }
        LoginMode::App => {
            let hello = serde_json::json!({ "locale": locale });
            format!("connect {APP_PROTOCOL_VERSION} {hello}")
        }
    }
}

pub(crate) fn subscribe_message(id: u64, payload: &Value) -> String {
    format!("sub {id} {payload}")
}

pub(crate) fn unsubscribe_message(id: u64) -> String {
    format!("unsub {id}")
}

/// Kind of a subscription frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnswerKind {
    Full,
    Delta,
    Complete,
    Error,
}

/// A parsed server frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    Connected,
    Answer {
        id: u64,
        kind: AnswerKind,
        payload: &'a str,
    },
}

pub(crate) fn parse_frame(text: &str) -> Result<Frame<'_>> {
    if text == CONNECTED {
        return Ok(Frame::Connected);
    }

    let mut parts = text.splitn(3, ' ');
    let id = parts
        .next()
        .and_then(|id| id.parse::<u64>().ok())
        .ok_or_else(|| Error::Protocol(format!("frame without subscription id: {text:.64}")))?;
    let kind = match parts.next() {
        Some("A") => AnswerKind::Full,
        Some("D") => AnswerKind::Delta,
        Some("C") => AnswerKind::Complete,
        Some("E") => AnswerKind::Error,
        other => {
            return Err(Error::Protocol(format!(
                "unknown frame code {other:?} for subscription {id}"
            )))
        }
    };
    let payload = parts.next().unwrap_or("").trim_start();

    Ok(Frame::Answer { id, kind, payload })
}

/// Rebuild an answer from the previous answer and a delta.
///
/// The delta is a tab separated list of instructions applied left to right
/// over the characters of `previous`:
///
/// - `=N` copies the next `N` characters
/// - `-N` skips the next `N` characters
/// - `+text` inserts URL-encoded text (`+` standing for a space)
pub(crate) fn apply_delta(previous: &str, delta: &str) -> Result<String> {
    let previous: Vec<char> = previous.chars().collect();
    let mut cursor = 0usize;
    let mut result = String::with_capacity(previous.len());

    for instruction in delta.split('\t').filter(|i| !i.is_empty()) {
        let mut chars = instruction.chars();
        let op = chars.next();
        let arg = chars.as_str();
        match op {
            Some('+') => {
                let spaced = arg.replace('+', " ");
                let decoded = urlencoding::decode(&spaced)
                    .map_err(|e| Error::Protocol(format!("undecodable delta insert: {e}")))?;
                result.push_str(decoded.trim());
            }
            Some(op @ ('=' | '-')) => {
                let count: usize = arg
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad delta instruction {instruction:?}")))?;
                let end = cursor
                    .checked_add(count)
                    .filter(|end| *end <= previous.len())
                    .ok_or_else(|| {
                        Error::Protocol(format!(
                            "delta runs past previous answer ({} > {})",
                            cursor.saturating_add(count),
                            previous.len()
                        ))
                    })?;
                if op == '=' {
                    result.extend(&previous[cursor..end]);
                }
                cursor = end;
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "bad delta instruction {instruction:?}"
                )))
            }
        }
    }

    Ok(result)
}

/// Map an `E` frame payload to an error.
pub(crate) fn error_from_payload(payload: &str) -> Error {
    let body: Value = serde_json::from_str(payload).unwrap_or(Value::Null);
    let code = body
        .get("errors")
        .and_then(|e| e.get(0))
        .and_then(|e| e.get("errorCode"))
        .and_then(|c| c.as_str());

    if code == Some(AUTHENTICATION_ERROR) {
        return Error::SessionExpired;
    }
    let message = api_error_message(&body).unwrap_or_else(|| payload.to_string());
    Error::Protocol(format!("subscription failed: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_messages() {
        let web = connect_message(LoginMode::Web, "de");
        assert!(web.starts_with("connect 31 {"));
        assert!(web.contains("\"locale\":\"de\""));

        assert_eq!(connect_message(LoginMode::App, "en"), "connect 21 {\"locale\":\"en\"}");
    }

    #[test]
    fn test_sub_and_unsub_messages() {
        let payload = serde_json::json!({"type": "timelineDetailV2", "id": "abc"});
        let message = subscribe_message(7, &payload);
        let json = message.strip_prefix("sub 7 ").unwrap();
        assert_eq!(serde_json::from_str::<Value>(json).unwrap(), payload);
        assert_eq!(unsubscribe_message(7), "unsub 7");
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(parse_frame("connected").unwrap(), Frame::Connected);
        assert_eq!(
            parse_frame("12 A {\"items\":[]}").unwrap(),
            Frame::Answer {
                id: 12,
                kind: AnswerKind::Full,
                payload: "{\"items\":[]}"
            }
        );
        assert_eq!(
            parse_frame("3 C").unwrap(),
            Frame::Answer {
                id: 3,
                kind: AnswerKind::Complete,
                payload: ""
            }
        );
        assert!(matches!(
            parse_frame("3 E {}").unwrap(),
            Frame::Answer {
                kind: AnswerKind::Error,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_frame("hello world"), Err(Error::Protocol(_))));
        assert!(matches!(parse_frame("4 X {}"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_apply_delta_reconstructs_text() {
        let previous = "{\"price\":10.5,\"name\":\"ACME\"}";
        // keep `{"price":`, drop `10.5`, insert `11.25`, keep the rest
        let delta = "=9\t-4\t+11.25\t=15";
        assert_eq!(
            apply_delta(previous, delta).unwrap(),
            "{\"price\":11.25,\"name\":\"ACME\"}"
        );
    }

    #[test]
    fn test_apply_delta_decodes_inserts() {
        assert_eq!(apply_delta("ab", "=1\t+x%22y+z\t=1").unwrap(), "ax\"y zb");
    }

    #[test]
    fn test_apply_delta_trims_inserted_text() {
        assert_eq!(apply_delta("{}", "=1\t+%20a+\t=1").unwrap(), "{a}");
    }

    #[test]
    fn test_apply_delta_counts_characters() {
        assert_eq!(apply_delta("äöü!", "-2\t=2").unwrap(), "ü!");
    }

    #[test]
    fn test_apply_delta_out_of_range() {
        assert!(matches!(apply_delta("abc", "=5"), Err(Error::Protocol(_))));
        assert!(matches!(apply_delta("abc", "=x"), Err(Error::Protocol(_))));
        assert!(matches!(apply_delta("abc", "?1"), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_authentication_error_maps_to_session_expired() {
        let payload = r#"{"errors":[{"errorCode":"AUTHENTICATION_ERROR","errorMessage":"Unauthorized"}]}"#;
        assert!(matches!(error_from_payload(payload), Error::SessionExpired));
    }

    #[test]
    fn test_other_error_is_protocol() {
        let payload = r#"{"errors":[{"errorCode":"BAD_SUBSCRIPTION_TYPE","errorMessage":"unknown type"}]}"#;
        match error_from_payload(payload) {
            Error::Protocol(msg) => assert!(msg.contains("unknown type")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
