//! Request/reply framing.
//!
//! Wire layout, in both directions:
//!
//! ```text
//! [identity]... [""] [envelope JSON] [body JSON]
//! ```
//!
//! Identity frames are opaque and echoed back verbatim so the transport can
//! route the reply. An envelope's `recv_identity` replaces the first identity
//! frame of the reply.

use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;
use crate::infra::Frames;

/// Sequence number, request type, and optional routing override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Caller-chosen sequence number, echoed in the reply.
    pub seq: u64,
    /// Request type used for handler lookup.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Identity the reply should be routed to instead of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_identity: Option<Vec<u8>>,
}

impl Envelope {
    /// Envelope without routing override.
    pub fn new(seq: u64, request_type: impl Into<String>) -> Self {
        Self {
            seq,
            request_type: request_type.into(),
            recv_identity: None,
        }
    }
}

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Routing identity frames, sender first. May be empty.
    pub identities: Vec<Vec<u8>>,
    /// Decoded envelope.
    pub envelope: Envelope,
    /// Decoded body. An empty body frame reads as `{}`.
    pub body: serde_json::Value,
}

impl Inbound {
    /// Identity frames the reply is addressed to, with the envelope's
    /// override applied.
    #[must_use]
    pub fn reply_route(&self) -> Vec<Vec<u8>> {
        let mut route = self.identities.clone();
        if let Some(over) = self.envelope.recv_identity.as_ref() {
            match route.first_mut() {
                Some(first) => first.clone_from(over),
                None => route.push(over.clone()),
            }
        }
        route
    }
}

/// Split a raw message into identities, envelope, and body.
///
/// Zero or more identity frames precede the empty delimiter; whether the
/// reply can be routed is left to the transport.
///
/// # Errors
///
/// `MalformedMessage` when the delimiter, envelope, or body frame is missing,
/// or when the envelope or body does not decode.
pub fn parse_request(frames: Frames) -> Result<Inbound, SchedulerError> {
    let Some(delimiter) = frames.iter().position(Vec::is_empty) else {
        return Err(SchedulerError::MalformedMessage("missing empty delimiter frame".into()));
    };
    let total = frames.len();
    if total < delimiter + 3 {
        return Err(SchedulerError::MalformedMessage(format!(
            "expected envelope and body after delimiter, got {} frame(s)",
            total - delimiter - 1
        )));
    }
    if total > delimiter + 3 {
        return Err(SchedulerError::MalformedMessage(format!(
            "unexpected {} trailing frame(s)",
            total - delimiter - 3
        )));
    }

    let mut frames = frames;
    let body_raw = frames.pop().unwrap_or_default();
    let envelope_raw = frames.pop().unwrap_or_default();
    frames.truncate(delimiter);
    let envelope: Envelope = serde_json::from_slice(&envelope_raw)
        .map_err(|e| SchedulerError::MalformedMessage(format!("envelope: {e}")))?;
    let body = if body_raw.is_empty() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&body_raw)
            .map_err(|e| SchedulerError::MalformedMessage(format!("body: {e}")))?
    };
    Ok(Inbound {
        identities: frames,
        envelope,
        body,
    })
}

/// Assemble an outgoing message.
#[must_use]
pub fn compose(route: Vec<Vec<u8>>, envelope: &Envelope, body: &serde_json::Value) -> Frames {
    let mut frames = route;
    frames.push(Vec::new());
    // Both types serialize infallibly.
    frames.push(serde_json::to_vec(envelope).unwrap_or_default());
    frames.push(serde_json::to_vec(body).unwrap_or_default());
    frames
}

/// Request frames as a client sends them, without the identity the
/// transport adds.
#[must_use]
pub fn request_frames(envelope: &Envelope, body: &serde_json::Value) -> Frames {
    compose(Vec::new(), envelope, body)
}

/// Split a reply as seen by a client (identity already stripped).
///
/// # Errors
///
/// `MalformedMessage` when the reply does not have the
/// `[""] [envelope] [body]` shape.
pub fn parse_reply(frames: &[Vec<u8>]) -> Result<(Envelope, serde_json::Value), SchedulerError> {
    let [delimiter, envelope, body] = frames else {
        return Err(SchedulerError::MalformedMessage(format!(
            "expected 3 reply frames, got {}",
            frames.len()
        )));
    };
    if !delimiter.is_empty() {
        return Err(SchedulerError::MalformedMessage("missing empty delimiter frame".into()));
    }
    let envelope = serde_json::from_slice(envelope)
        .map_err(|e| SchedulerError::MalformedMessage(format!("envelope: {e}")))?;
    let body = serde_json::from_slice(body)
        .map_err(|e| SchedulerError::MalformedMessage(format!("body: {e}")))?;
    Ok((envelope, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(identities: &[&[u8]], envelope: &str, body: &str) -> Frames {
        let mut frames: Frames = identities.iter().map(|i| i.to_vec()).collect();
        frames.push(Vec::new());
        frames.push(envelope.as_bytes().to_vec());
        frames.push(body.as_bytes().to_vec());
        frames
    }

    #[test]
    fn parses_multiple_identities() {
        let inbound = parse_request(raw(
            &[b"proxy", b"client"],
            r#"{"seq":7,"type":"devices.list"}"#,
            "{}",
        ))
        .unwrap();
        assert_eq!(inbound.identities, vec![b"proxy".to_vec(), b"client".to_vec()]);
        assert_eq!(inbound.envelope, Envelope::new(7, "devices.list"));
        assert_eq!(inbound.body, json!({}));
    }

    #[test]
    fn accepts_zero_identities() {
        let inbound = parse_request(raw(&[], r#"{"seq":1,"type":"devices.list"}"#, "{}")).unwrap();
        assert!(inbound.identities.is_empty());
        assert_eq!(inbound.envelope.seq, 1);
        assert!(inbound.reply_route().is_empty());
    }

    #[test]
    fn override_supplies_route_without_identities() {
        let inbound = parse_request(raw(
            &[],
            r#"{"seq":2,"type":"x","recv_identity":[111,116,104,101,114]}"#,
            "",
        ))
        .unwrap();
        assert_eq!(inbound.reply_route(), vec![b"other".to_vec()]);
        assert_eq!(inbound.body, json!({}));
    }

    #[test]
    fn missing_body_is_malformed() {
        let mut frames = raw(&[b"c"], r#"{"seq":1,"type":"x"}"#, "");
        frames.pop();
        let err = parse_request(frames).unwrap_err();
        assert_eq!(err.code(), "malformed_message");
    }

    #[test]
    fn missing_delimiter_is_malformed() {
        let frames = vec![b"c".to_vec(), br#"{"seq":1,"type":"x"}"#.to_vec()];
        assert!(matches!(parse_request(frames), Err(SchedulerError::MalformedMessage(_))));
    }

    #[test]
    fn garbage_envelope_is_malformed() {
        let frames = raw(&[b"c"], "not json", "{}");
        assert!(matches!(parse_request(frames), Err(SchedulerError::MalformedMessage(_))));
    }

    #[test]
    fn bad_body_is_malformed() {
        let err = parse_request(raw(&[b"c"], r#"{"seq":1,"type":"x"}"#, "{oops")).unwrap_err();
        assert_eq!(err.code(), "malformed_message");
    }

    #[test]
    fn override_replaces_first_identity_only() {
        let inbound = parse_request(raw(
            &[b"proxy", b"client"],
            r#"{"seq":1,"type":"x","recv_identity":[111,116,104,101,114]}"#,
            "{}",
        ))
        .unwrap();
        assert_eq!(inbound.reply_route(), vec![b"other".to_vec(), b"client".to_vec()]);
    }

    #[test]
    fn reply_shape_parses_back() {
        let frames = compose(vec![b"c".to_vec()], &Envelope::new(3, "x.reply"), &json!({"ok": true}));
        let (envelope, body) = parse_reply(&frames[1..]).unwrap();
        assert_eq!(envelope.seq, 3);
        assert_eq!(body, json!({"ok": true}));
    }
}
