//! Converts raw transport events into canonical inbound messages.
//!
//! Anything that cannot become a text message is dropped with a typed
//! reason; decrypt failures are surfaced so the supervisor can feed the
//! corruption guard before discarding the event.

use chrono::{DateTime, Utc};

use crate::transport::{BROADCAST_CHAT, GROUP_SUFFIX, RawMessage};

/// Which raw representation the text was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    Conversation,
    ExtendedText,
}

/// Canonical inbound message record. Immutable; discarded after dispatch.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    pub sender_id: String,
    pub is_group: bool,
    pub text: String,
    pub raw_kind: RawKind,
    pub timestamp: DateTime<Utc>,
}

/// Why a raw event was not turned into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Event carries no message payload at all.
    NoPayload,
    /// Event originates from the bot's own identity.
    SelfSent,
    /// Event belongs to the platform-wide broadcast channel.
    Broadcast,
    /// Transport-level decryption failure; the guard must see this.
    DecryptFailure { chat_id: String },
    /// Payload exists but is not representable as text.
    NonText,
}

/// Result of normalizing one raw event.
#[derive(Debug)]
pub enum Normalized {
    Message(InboundMessage),
    Dropped(DropReason),
}

/// Normalize a raw transport event.
pub fn normalize(raw: &RawMessage) -> Normalized {
    if raw.from_me {
        return Normalized::Dropped(DropReason::SelfSent);
    }
    if raw.chat_id == BROADCAST_CHAT {
        return Normalized::Dropped(DropReason::Broadcast);
    }
    if raw.decrypt_error {
        return Normalized::Dropped(DropReason::DecryptFailure {
            chat_id: raw.chat_id.clone(),
        });
    }
    let Some(payload) = &raw.payload else {
        return Normalized::Dropped(DropReason::NoPayload);
    };

    // Plain representation first, then extended/quoted; first non-empty wins.
    let (text, raw_kind) = if let Some(text) = non_empty(payload.conversation.as_deref()) {
        (text, RawKind::Conversation)
    } else if let Some(text) = non_empty(payload.extended_text.as_deref()) {
        (text, RawKind::ExtendedText)
    } else {
        return Normalized::Dropped(DropReason::NonText);
    };

    let is_group = raw.chat_id.ends_with(GROUP_SUFFIX);
    let sender_id = raw
        .participant
        .clone()
        .unwrap_or_else(|| raw.chat_id.clone());

    Normalized::Message(InboundMessage {
        chat_id: raw.chat_id.clone(),
        sender_id,
        is_group,
        text,
        raw_kind,
        timestamp: raw.timestamp,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    match value {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawPayload;

    fn raw(chat_id: &str) -> RawMessage {
        RawMessage::text(chat_id, "hello")
    }

    #[test]
    fn plain_text_normalizes() {
        let msg = match normalize(&raw("628111@s.whatsapp.net")) {
            Normalized::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(msg.chat_id, "628111@s.whatsapp.net");
        assert_eq!(msg.sender_id, "628111@s.whatsapp.net");
        assert!(!msg.is_group);
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.raw_kind, RawKind::Conversation);
    }

    #[test]
    fn group_sender_is_the_participant() {
        let mut event = raw("12036304@g.us");
        event.participant = Some("628222@s.whatsapp.net".to_string());
        let msg = match normalize(&event) {
            Normalized::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert!(msg.is_group);
        assert_eq!(msg.sender_id, "628222@s.whatsapp.net");
    }

    #[test]
    fn extended_text_is_the_fallback_representation() {
        let mut event = raw("628111@s.whatsapp.net");
        event.payload = Some(RawPayload {
            conversation: Some(String::new()),
            extended_text: Some("quoted reply".to_string()),
            media_kind: None,
        });
        let msg = match normalize(&event) {
            Normalized::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        };
        assert_eq!(msg.text, "quoted reply");
        assert_eq!(msg.raw_kind, RawKind::ExtendedText);
    }

    #[test]
    fn self_sent_is_dropped() {
        let mut event = raw("628111@s.whatsapp.net");
        event.from_me = true;
        assert!(matches!(
            normalize(&event),
            Normalized::Dropped(DropReason::SelfSent)
        ));
    }

    #[test]
    fn broadcast_is_dropped() {
        let event = raw("status@broadcast");
        assert!(matches!(
            normalize(&event),
            Normalized::Dropped(DropReason::Broadcast)
        ));
    }

    #[test]
    fn decrypt_failure_is_surfaced_with_chat_id() {
        let mut event = raw("peer@s.whatsapp.net");
        event.payload = None;
        event.decrypt_error = true;
        match normalize(&event) {
            Normalized::Dropped(DropReason::DecryptFailure { chat_id }) => {
                assert_eq!(chat_id, "peer@s.whatsapp.net");
            }
            other => panic!("expected decrypt failure, got {other:?}"),
        }
    }

    #[test]
    fn missing_payload_is_dropped() {
        let mut event = raw("628111@s.whatsapp.net");
        event.payload = None;
        assert!(matches!(
            normalize(&event),
            Normalized::Dropped(DropReason::NoPayload)
        ));
    }

    #[test]
    fn media_only_payload_is_dropped_as_non_text() {
        let mut event = raw("628111@s.whatsapp.net");
        event.payload = Some(RawPayload {
            conversation: None,
            extended_text: None,
            media_kind: Some("image".to_string()),
        });
        assert!(matches!(
            normalize(&event),
            Normalized::Dropped(DropReason::NonText)
        ));
    }
}
