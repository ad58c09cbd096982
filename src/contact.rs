//! Memoized display-name resolution for chat identifiers.
//!
//! Resolution never blocks or fails message processing: every lookup error
//! degrades to a fallback value, and the fallback is cached like a hit so a
//! flaky transport is asked at most once per identifier per process.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::transport::{GROUP_SUFFIX, Transport};

const UNKNOWN_GROUP: &str = "Unknown Group";

/// Lazy chat-id → display-name cache. Entries live for the whole process;
/// staleness is acceptable.
#[derive(Default)]
pub struct ContactResolver {
    cache: Mutex<HashMap<String, String>>,
}

impl ContactResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a display name for `chat_id`.
    pub async fn resolve(&self, transport: &dyn Transport, chat_id: &str) -> String {
        if let Some(name) = self.cached(chat_id) {
            return name;
        }

        let name = if chat_id.ends_with(GROUP_SUFFIX) {
            match transport.fetch_group_subject(chat_id).await {
                Ok(Some(subject)) if !subject.is_empty() => subject,
                Ok(_) => UNKNOWN_GROUP.to_string(),
                Err(e) => {
                    tracing::debug!(chat = %chat_id, "group metadata fetch failed: {e}");
                    UNKNOWN_GROUP.to_string()
                }
            }
        } else {
            let number = bare_number(chat_id).to_string();
            match transport.fetch_contact_name(chat_id).await {
                Ok(Some(name)) if !name.is_empty() => name,
                Ok(_) => number,
                Err(e) => {
                    tracing::debug!(chat = %chat_id, "contact fetch failed: {e}");
                    number
                }
            }
        };

        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chat_id.to_string(), name.clone());
        name
    }

    fn cached(&self, chat_id: &str) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_id)
            .cloned()
    }
}

/// The numeric identifier before the `@` suffix.
fn bare_number(chat_id: &str) -> &str {
    chat_id.split('@').next().unwrap_or(chat_id)
}
