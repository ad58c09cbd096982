//! Session lifecycle: connect, drive the event stream, reconnect.
//!
//! The supervisor owns the one long-lived loop in the process. Each pass
//! scans the credential store, opens a session, then consumes transport
//! events until the session closes. Transient closures reconnect with a
//! linearly growing delay; a logged-out closure stops the loop, since
//! retrying without a fresh device link can only produce the same answer.

use std::sync::Arc;

use tokio::sync::watch;

use crate::auth::{CorruptionGuard, CredentialStore};
use crate::config::ReconnectConfig;
use crate::contact::ContactResolver;
use crate::dispatch::Dispatcher;
use crate::error::{Error, StoreError, TransportError};
use crate::normalize::{DropReason, Normalized, normalize};
use crate::stats::Stats;
use crate::transport::{CloseReason, RawMessage, SessionHandle, TransportConnector, TransportEvent};

/// Where the supervisor is in the session lifecycle. Logged on transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// How one driven session ended.
enum Driven {
    Shutdown,
    Closed(CloseReason),
}

/// Drives the connect/reconnect loop and routes inbound batches.
pub struct Supervisor {
    connector: Arc<dyn TransportConnector>,
    store: CredentialStore,
    guard: CorruptionGuard,
    dispatcher: Arc<Dispatcher>,
    contacts: Arc<ContactResolver>,
    stats: Arc<Stats>,
    reconnect: ReconnectConfig,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        store: CredentialStore,
        guard: CorruptionGuard,
        dispatcher: Arc<Dispatcher>,
        contacts: Arc<ContactResolver>,
        stats: Arc<Stats>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            connector,
            store,
            guard,
            dispatcher,
            contacts,
            stats,
            reconnect,
        }
    }

    /// Run until shutdown is signaled or the session is terminally closed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            tracing::info!(state = ?SessionState::Connecting, attempt, "opening session");
            let report = self.guard.scan(&self.store);
            if report.deleted_count() > 0 {
                tracing::warn!(
                    scanned = report.scanned,
                    deleted = report.deleted_count(),
                    "credential scan repaired the store"
                );
            }

            let credential = match self.store.load() {
                Ok(credential) => Some(credential),
                Err(StoreError::NotFound) => {
                    tracing::info!("no stored credentials, transport will run its link flow");
                    None
                }
                Err(e) => return Err(e.into()),
            };

            let session = match self.connector.connect(credential).await {
                Ok(session) => session,
                Err(TransportError::LoggedOut) => {
                    tracing::error!("transport refused the stored session: logged out");
                    return Err(TransportError::LoggedOut.into());
                }
                Err(e) => {
                    tracing::warn!("connect failed: {e}");
                    attempt += 1;
                    if !self.backoff(attempt, &mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.drive(session, &mut attempt, &mut shutdown).await? {
                Driven::Shutdown => return Ok(()),
                Driven::Closed(reason) => {
                    tracing::warn!(state = ?SessionState::Closed, code = reason.code,
                        "session closed: {}", reason.message);
                    if reason.is_terminal() {
                        tracing::error!("logged out; delete the session directory and relink");
                        return Err(TransportError::LoggedOut.into());
                    }
                    if reason.is_credential_desync() {
                        // The closure itself is evidence of stale store state;
                        // scan again right away instead of waiting for the
                        // next pass to notice.
                        tracing::warn!(code = reason.code, "closure suggests credential desync");
                        let report = self.guard.scan(&self.store);
                        tracing::info!(
                            deleted = report.deleted_count(),
                            "post-desync credential scan complete"
                        );
                    }
                    self.stats.note_reconnect();
                    attempt += 1;
                    if !self.backoff(attempt, &mut shutdown).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Consume events from one session until it closes or shutdown arrives.
    async fn drive(
        &self,
        mut session: SessionHandle,
        attempt: &mut u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Driven, Error> {
        loop {
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    // a dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(Driven::Shutdown);
                    }
                    continue;
                }
                event = session.events.recv() => event,
            };

            let Some(event) = event else {
                // The transport dropped its sender without a close event.
                return Ok(Driven::Closed(CloseReason::new(408, "event stream ended")));
            };

            match event {
                TransportEvent::Connected => {
                    *attempt = 0;
                    tracing::info!(state = ?SessionState::Open, "session open");
                }
                TransportEvent::Messages(batch) => {
                    self.process_batch(&session, batch).await;
                }
                TransportEvent::CredentialsRotated(credential) => {
                    // Losing a rotation means the next connect uses stale
                    // secrets, so a persist failure is fatal.
                    self.store.save(&credential)?;
                    tracing::debug!("rotated credentials persisted");
                }
                TransportEvent::DecryptFailure { chat_id } => {
                    self.on_decrypt_failure(&chat_id);
                }
                TransportEvent::Closed(reason) => {
                    return Ok(Driven::Closed(reason));
                }
            }
        }
    }

    /// Process one inbound batch in arrival order. Nothing in here is fatal.
    async fn process_batch(&self, session: &SessionHandle, batch: Vec<RawMessage>) {
        for raw in batch {
            self.stats.note_message();
            match normalize(&raw) {
                Normalized::Message(msg) => {
                    let name = self
                        .contacts
                        .resolve(session.transport.as_ref(), &msg.chat_id)
                        .await;
                    tracing::info!(chat = %name, sender = %msg.sender_id,
                        group = msg.is_group, "message: {}", msg.text);

                    if let Err(e) = session.transport.mark_read(&msg.chat_id).await {
                        tracing::debug!(chat = %msg.chat_id, "mark-read failed: {e}");
                    }

                    self.dispatcher.dispatch(&session.transport, &msg).await;
                }
                Normalized::Dropped(DropReason::DecryptFailure { chat_id }) => {
                    self.on_decrypt_failure(&chat_id);
                }
                Normalized::Dropped(reason) => {
                    tracing::trace!(chat = %raw.chat_id, ?reason, "event dropped");
                }
            }
        }
    }

    /// Feed the failure tracker; at the threshold, invalidate the chat's key
    /// records so the transport renegotiates them on the next exchange.
    fn on_decrypt_failure(&self, chat_id: &str) {
        if !self.guard.record_decrypt_failure(chat_id) {
            return;
        }
        match self.store.remove_entries_for_chat(chat_id) {
            Ok(removed) => {
                tracing::warn!(chat = %chat_id, removed,
                    "decrypt-failure threshold hit, invalidated chat key records");
                self.guard.clear(chat_id);
            }
            Err(e) => {
                tracing::warn!(chat = %chat_id, "failed to invalidate chat key records: {e}");
            }
        }
    }

    /// Sleep out the backoff delay. False means shutdown arrived mid-sleep.
    async fn backoff(&self, attempt: u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.reconnect.delay_for(attempt);
        tracing::info!(attempt, delay_secs = delay.as_secs(), "reconnecting after delay");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        }
    }
}
