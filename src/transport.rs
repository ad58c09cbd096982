//! The opaque chat-transport seam.
//!
//! The real protocol client (connection establishment, encryption, framing,
//! device linking) lives behind [`Transport`] and [`TransportConnector`]. The
//! engine only needs "send", "fetch metadata", and a stream of
//! [`TransportEvent`]s; tests drive the whole engine through scripted
//! implementations of these traits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::auth::Credential;
use crate::error::TransportError;

/// The platform-wide broadcast pseudo-chat; never a command source.
pub const BROADCAST_CHAT: &str = "status@broadcast";

/// Suffix convention marking a group chat identifier.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Typing indicator states the transport can broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Composing,
    Paused,
}

/// Why a session closed, as signaled by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Platform status code carried by the closure.
    pub code: u16,
    pub message: String,
}

impl CloseReason {
    /// Explicit logout; retrying is pointless without a fresh device link.
    pub const LOGGED_OUT: u16 = 401;
    /// Session state rejected by the server.
    pub const BAD_SESSION: u16 = 500;
    /// Linked-device state no longer matches the server's.
    pub const DEVICE_MISMATCH: u16 = 411;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Terminal closures must not be retried automatically.
    pub fn is_terminal(&self) -> bool {
        self.code == Self::LOGGED_OUT
    }

    /// Closures that are themselves evidence of a stale credential store.
    pub fn is_credential_desync(&self) -> bool {
        matches!(self.code, Self::BAD_SESSION | Self::DEVICE_MISMATCH)
    }
}

/// Text payload variants of a raw inbound event.
///
/// Both representations may be present; extraction order is plain first,
/// then extended/quoted.
#[derive(Debug, Clone, Default)]
pub struct RawPayload {
    pub conversation: Option<String>,
    pub extended_text: Option<String>,
    /// Set for media-only payloads (image, audio, sticker, ...).
    pub media_kind: Option<String>,
}

/// One raw inbound event as delivered by the transport.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub chat_id: String,
    /// Sending participant within a group; `None` in direct chats.
    pub participant: Option<String>,
    /// True when the event originates from the bot's own identity.
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    /// Absent for stub events (including decrypt failures).
    pub payload: Option<RawPayload>,
    /// The transport could not decrypt this event.
    pub decrypt_error: bool,
}

impl RawMessage {
    /// A plain text message, for tests and the local REPL transport.
    pub fn text(chat_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            participant: None,
            from_me: false,
            timestamp: Utc::now(),
            payload: Some(RawPayload {
                conversation: Some(body.into()),
                ..RawPayload::default()
            }),
            decrypt_error: false,
        }
    }
}

/// Events the supervisor consumes from an open session.
#[derive(Debug)]
pub enum TransportEvent {
    /// The session reached the open state.
    Connected,
    /// One inbound batch, in arrival order.
    Messages(Vec<RawMessage>),
    /// The transport rotated session secrets; persist them now.
    CredentialsRotated(Credential),
    /// A transport-level decryption failure for one chat.
    DecryptFailure { chat_id: String },
    /// The session closed.
    Closed(CloseReason),
}

/// Outbound operations on an open session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Send text that mentions the given identifiers.
    async fn send_text_mentioning(
        &self,
        chat_id: &str,
        text: &str,
        mentions: &[String],
    ) -> Result<(), TransportError>;

    async fn send_contact_card(
        &self,
        chat_id: &str,
        display_name: &str,
        vcard: &str,
    ) -> Result<(), TransportError>;

    async fn send_presence(&self, chat_id: &str, presence: Presence)
    -> Result<(), TransportError>;

    /// Mark the chat's latest messages read. Best-effort.
    async fn mark_read(&self, chat_id: &str) -> Result<(), TransportError>;

    /// Profile name for a direct chat, if the platform knows one.
    async fn fetch_contact_name(&self, chat_id: &str) -> Result<Option<String>, TransportError>;

    /// Subject line for a group chat, if the platform knows one.
    async fn fetch_group_subject(&self, chat_id: &str) -> Result<Option<String>, TransportError>;
}

/// An open session: outbound handle plus the inbound event stream.
pub struct SessionHandle {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transport sessions from stored credentials.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a session. `credential` is `None` on first run, in which case the
    /// transport performs its own device-link flow before connecting.
    async fn connect(&self, credential: Option<Credential>)
    -> Result<SessionHandle, TransportError>;
}
