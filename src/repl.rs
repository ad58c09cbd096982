//! Local line-oriented transport for development.
//!
//! Stands in for the real chat platform: each stdin line becomes an inbound
//! message in a fixed pseudo-chat and replies are printed to stdout. The
//! whole engine runs unmodified on top of it, which makes the binary usable
//! without a linked device.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;

use crate::auth::Credential;
use crate::error::TransportError;
use crate::transport::{
    CloseReason, Presence, RawMessage, SessionHandle, Transport, TransportConnector,
    TransportEvent,
};

/// Pseudo-chat id every stdin line is attributed to.
pub const LOCAL_CHAT: &str = "local@s.whatsapp.net";

/// Echo transport: replies go to stdout, metadata is unknown.
struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        println!("[{chat_id}] {text}");
        Ok(())
    }

    async fn send_text_mentioning(
        &self,
        chat_id: &str,
        text: &str,
        mentions: &[String],
    ) -> Result<(), TransportError> {
        println!("[{chat_id}] {text} (mentions: {})", mentions.join(", "));
        Ok(())
    }

    async fn send_contact_card(
        &self,
        chat_id: &str,
        display_name: &str,
        vcard: &str,
    ) -> Result<(), TransportError> {
        println!("[{chat_id}] contact card '{display_name}':\n{vcard}");
        Ok(())
    }

    async fn send_presence(&self, _chat_id: &str, _presence: Presence) -> Result<(), TransportError> {
        Ok(())
    }

    async fn mark_read(&self, _chat_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn fetch_contact_name(&self, _chat_id: &str) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn fetch_group_subject(&self, _chat_id: &str) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

/// Connects a session backed by stdin/stdout.
pub struct LocalConnector;

#[async_trait]
impl TransportConnector for LocalConnector {
    async fn connect(
        &self,
        _credential: Option<Credential>,
    ) -> Result<SessionHandle, TransportError> {
        let (tx, events) = mpsc::channel(32);

        tokio::spawn(async move {
            if tx.send(TransportEvent::Connected).await.is_err() {
                return;
            }
            let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("stdin read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = TransportEvent::Messages(vec![RawMessage::text(LOCAL_CHAT, line)]);
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // stdin closed; end the session for good rather than reconnect
            let _ = tx
                .send(TransportEvent::Closed(CloseReason::new(
                    CloseReason::LOGGED_OUT,
                    "input closed",
                )))
                .await;
        });

        Ok(SessionHandle {
            transport: Arc::new(LocalTransport),
            events,
        })
    }
}
