//! Notification types and the cross-instance wire envelope.
//!
//! Subscribers receive a [`Notification`] serialized as a JSON text frame:
//!
//! ```json
//! {"target":"Image","address":"203.0.113.7","client":"Mozilla/5.0"}
//! ```
//!
//! Between relay instances the same frame travels inside an [`Envelope`]
//! (`{"token": "...", "data": "<frame text>"}`) so that the receiving
//! instance can route it without knowing anything else about the request.

use serde::{Deserialize, Serialize};

use crate::errors::EnvelopeError;
use crate::token::Token;

/// Client identifier used when the triggering request carried no `User-Agent`.
pub const UNKNOWN_CLIENT: &str = "[unknown]";

/// Which kind of beacon triggered a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// The 1x1 image beacon (`/<token>.png`).
    Image,
    /// The tracked redirect link (`/<token>/<link>`).
    Link,
}

impl Target {
    /// Wire name, as sent to subscribers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Link => "Link",
        }
    }
}

/// The subscriber-facing notification payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Which beacon fired.
    pub target: Target,
    /// Best-known originating address of the triggering request.
    pub address: String,
    /// Client identifier of the triggering request.
    pub client: String,
}

impl Notification {
    /// Build a notification, substituting [`UNKNOWN_CLIENT`] for a missing client.
    pub fn new(target: Target, address: impl Into<String>, client: Option<String>) -> Self {
        Self {
            target,
            address: address.into(),
            client: client.unwrap_or_else(|| UNKNOWN_CLIENT.to_owned()),
        }
    }

    /// Serialize to the text frame sent to subscribers.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A notification addressed to a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Token whose owner should receive the notification.
    pub token: Token,
    /// What the owner receives.
    pub notification: Notification,
}

impl NotificationEvent {
    /// Pair a notification with its token.
    pub fn new(token: Token, notification: Notification) -> Self {
        Self {
            token,
            notification,
        }
    }

    /// Build the cross-instance envelope for this event.
    pub fn to_envelope(&self) -> Result<Envelope, EnvelopeError> {
        Ok(Envelope {
            token: self.token.as_str().to_owned(),
            data: self.notification.to_frame()?,
        })
    }

    /// Reconstruct an event from a received envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EnvelopeError> {
        let token = Token::parse(&envelope.token)?;
        let notification: Notification = serde_json::from_str(&envelope.data)?;
        Ok(Self::new(token, notification))
    }
}

/// Cross-instance bus payload.
///
/// `data` is the serialized subscriber frame, carried as a string. Receivers
/// parse it back into a [`Notification`] and serialize it again before
/// delivery, so fields they do not know are dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target token.
    pub token: String,
    /// Serialized [`Notification`].
    pub data: String,
}

impl Envelope {
    /// Encode for the bus.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a bus message.
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Value;

    fn image_event() -> NotificationEvent {
        NotificationEvent::new(
            Token::parse("abc").unwrap(),
            Notification::new(Target::Image, "203.0.113.7", Some("Mail/1.0".into())),
        )
    }

    #[test]
    fn frame_has_exactly_three_fields() {
        let frame = image_event().notification.to_frame().unwrap();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        let obj = parsed.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(parsed["target"], "Image");
        assert_eq!(parsed["address"], "203.0.113.7");
        assert_eq!(parsed["client"], "Mail/1.0");
        assert!(obj.get("token").is_none());
    }

    #[test]
    fn missing_client_becomes_unknown() {
        let n = Notification::new(Target::Link, "::1", None);
        assert_eq!(n.client, UNKNOWN_CLIENT);
    }

    #[test]
    fn target_wire_names() {
        assert_eq!(Target::Image.as_str(), "Image");
        assert_eq!(Target::Link.as_str(), "Link");
        assert_eq!(serde_json::to_string(&Target::Link).unwrap(), r#""Link""#);
    }

    #[test]
    fn envelope_carries_frame_as_string() {
        let envelope = image_event().to_envelope().unwrap();
        assert_eq!(envelope.token, "abc");
        let raw = envelope.encode().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert!(parsed["data"].is_string());
        assert_eq!(parsed["token"], "abc");
    }

    #[test]
    fn event_survives_the_bus() {
        let event = image_event();
        let raw = event.to_envelope().unwrap().encode().unwrap();
        let back = NotificationEvent::from_envelope(&Envelope::decode(&raw).unwrap()).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn envelope_with_bad_token_is_rejected() {
        let envelope = Envelope {
            token: "bad token".into(),
            data: r#"{"target":"Image","address":"a","client":"c"}"#.into(),
        };
        assert_matches!(
            NotificationEvent::from_envelope(&envelope),
            Err(EnvelopeError::Token(_))
        );
    }

    #[test]
    fn envelope_with_bad_data_is_rejected() {
        let envelope = Envelope {
            token: "abc".into(),
            data: r#"{"target":"Sound"}"#.into(),
        };
        assert_matches!(
            NotificationEvent::from_envelope(&envelope),
            Err(EnvelopeError::Json(_))
        );
    }

    #[test]
    fn unknown_data_fields_are_dropped_on_receive() {
        let envelope = Envelope {
            token: "abc".into(),
            data: r#"{"target":"Link","address":"a","client":"c","extra":1}"#.into(),
        };
        let event = NotificationEvent::from_envelope(&envelope).unwrap();
        let frame: Value = serde_json::from_str(&event.notification.to_frame().unwrap()).unwrap();
        assert_eq!(frame.as_object().unwrap().len(), 3);
        assert!(frame.get("extra").is_none());
    }

    #[test]
    fn decode_garbage() {
        assert!(Envelope::decode("not json").is_err());
    }
}
