//! Structural integrity checks for the credential store, plus the per-chat
//! decryption-failure tracker.
//!
//! The scan runs once before every connection attempt and is always
//! non-fatal: corrupt records are deleted on the spot and reported, never
//! retried or escalated. The failure tracker replaces error-message substring
//! matching ("Bad MAC") with a structured, time-windowed counter.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::auth::store::{CredentialStore, MASTER_RECORD};

/// Records smaller than this cannot hold real key material.
const MIN_RECORD_BYTES: u64 = 8;
/// Records larger than this are implausible for secret material.
const MAX_RECORD_BYTES: u64 = 1024 * 1024;

/// Why a record was judged corrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptKind {
    /// Not valid JSON, or the master record not a well-formed credential.
    Unparseable,
    TooSmall,
    TooLarge,
    /// Leftover from an interrupted atomic write.
    StrayTemp,
}

/// Informational result of one store scan.
#[derive(Debug, Default)]
pub struct RepairReport {
    pub scanned: usize,
    pub deleted: Vec<(String, CorruptKind)>,
}

impl RepairReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Scans the credential store and tracks decrypt-failure loops.
pub struct CorruptionGuard {
    window: Duration,
    threshold: usize,
    failures: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl CorruptionGuard {
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Delete every structurally corrupt record from the store.
    ///
    /// Per-record IO failures are logged and skipped; the scan itself never
    /// fails a connection attempt.
    pub fn scan(&self, store: &CredentialStore) -> RepairReport {
        let mut report = RepairReport::default();
        let names = match store.entry_names() {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("credential scan could not list records: {e}");
                return report;
            }
        };

        for name in names {
            report.scanned += 1;
            let Some(kind) = self.judge(store, &name) else {
                continue;
            };
            match store.remove_entry(&name) {
                Ok(()) => {
                    tracing::warn!(record = %name, reason = ?kind, "deleted corrupt credential record");
                    report.deleted.push((name, kind));
                }
                Err(e) => {
                    tracing::warn!(record = %name, "failed to delete corrupt record: {e}");
                }
            }
        }
        report
    }

    fn judge(&self, store: &CredentialStore, name: &str) -> Option<CorruptKind> {
        if name.ends_with(".tmp") {
            return Some(CorruptKind::StrayTemp);
        }
        let bytes = match store.read_entry(name) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(record = %name, "unreadable record left in place: {e}");
                return None;
            }
        };
        let len = bytes.len() as u64;
        if len < MIN_RECORD_BYTES {
            return Some(CorruptKind::TooSmall);
        }
        if len > MAX_RECORD_BYTES {
            return Some(CorruptKind::TooLarge);
        }
        let well_formed = if name == MASTER_RECORD {
            serde_json::from_slice::<crate::auth::Credential>(&bytes).is_ok()
        } else {
            serde_json::from_slice::<serde_json::Value>(&bytes).is_ok()
        };
        if well_formed {
            None
        } else {
            Some(CorruptKind::Unparseable)
        }
    }

    /// Record one decryption failure for `chat_id`.
    ///
    /// Returns true when the failures remaining inside the detection window
    /// reach the threshold, meaning the chat's key material is
    /// desynchronized and the caller should invalidate it.
    pub fn record_decrypt_failure(&self, chat_id: &str) -> bool {
        self.record_decrypt_failure_at(chat_id, Instant::now())
    }

    fn record_decrypt_failure_at(&self, chat_id: &str, now: Instant) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let record = failures.entry(chat_id.to_string()).or_default();
        record.push_back(now);
        while let Some(&oldest) = record.front() {
            if now.duration_since(oldest) > self.window {
                record.pop_front();
            } else {
                break;
            }
        }
        record.len() >= self.threshold
    }

    /// Forget tracked failures for `chat_id`, after its keys were regenerated.
    pub fn clear(&self, chat_id: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::Credential;
    use tempfile::tempdir;

    fn guard() -> CorruptionGuard {
        CorruptionGuard::new(Duration::from_secs(300), 10)
    }

    fn store_with_master(dir: &std::path::Path) -> CredentialStore {
        let store = CredentialStore::open(dir).unwrap();
        store
            .save(&Credential {
                noise_key: "bm9pc2U=".to_string(),
                identity_key: "aWQ=".to_string(),
                registration_id: 7,
                account_id: None,
            })
            .unwrap();
        store
    }

    #[test]
    fn scan_removes_exactly_the_corrupt_entries() {
        let dir = tempdir().unwrap();
        let store = store_with_master(dir.path());
        store.save_entry("sender-key-1@g.us-1", br#"{"k":1}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json at all").unwrap();
        std::fs::write(dir.path().join("tiny.json"), b"{}").unwrap();

        let report = guard().scan(&store);

        assert_eq!(report.deleted_count(), 2);
        let deleted: Vec<&str> = report.deleted.iter().map(|(n, _)| n.as_str()).collect();
        assert!(deleted.contains(&"broken.json"));
        assert!(deleted.contains(&"tiny.json"));

        let names = store.entry_names().unwrap();
        assert!(names.contains(&"creds.json".to_string()));
        assert!(names.contains(&"sender-key-1@g.us-1.json".to_string()));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn scan_removes_oversized_records() {
        let dir = tempdir().unwrap();
        let store = store_with_master(dir.path());
        let huge = format!("{{\"blob\":\"{}\"}}", "x".repeat(2 * 1024 * 1024));
        std::fs::write(dir.path().join("huge.json"), huge).unwrap();

        let report = guard().scan(&store);
        assert_eq!(report.deleted, vec![("huge.json".to_string(), CorruptKind::TooLarge)]);
    }

    #[test]
    fn scan_removes_stray_temp_files() {
        let dir = tempdir().unwrap();
        let store = store_with_master(dir.path());
        std::fs::write(dir.path().join("creds.json.tmp"), b"partial write").unwrap();

        let report = guard().scan(&store);
        assert_eq!(
            report.deleted,
            vec![("creds.json.tmp".to_string(), CorruptKind::StrayTemp)]
        );
        // the real master record survives
        assert!(store.load().is_ok());
    }

    #[test]
    fn scan_deletes_unparseable_master_record() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("creds.json"),
            br#"{"registration_id":"not-a-number"}"#,
        )
        .unwrap();

        let report = guard().scan(&store);
        assert_eq!(report.deleted_count(), 1);
        assert!(matches!(store.load(), Err(crate::error::StoreError::NotFound)));
    }

    #[test]
    fn scan_of_clean_store_deletes_nothing() {
        let dir = tempdir().unwrap();
        let store = store_with_master(dir.path());
        store.save_entry("app-state-1", br#"{"v":1}"#).unwrap();

        let report = guard().scan(&store);
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted_count(), 0);
    }

    #[test]
    fn nine_failures_in_window_do_not_trigger() {
        let g = guard();
        let start = Instant::now();
        for i in 0..9 {
            assert!(!g.record_decrypt_failure_at("peer@s.whatsapp.net", start + Duration::from_secs(i)));
        }
    }

    #[test]
    fn tenth_failure_in_window_triggers() {
        let g = guard();
        let start = Instant::now();
        for i in 0..9 {
            g.record_decrypt_failure_at("peer@s.whatsapp.net", start + Duration::from_secs(i));
        }
        assert!(g.record_decrypt_failure_at("peer@s.whatsapp.net", start + Duration::from_secs(9)));
    }

    #[test]
    fn failures_outside_window_are_pruned() {
        let g = guard();
        let start = Instant::now();
        for i in 0..9 {
            g.record_decrypt_failure_at("chat@g.us", start + Duration::from_secs(i));
        }
        // tenth failure arrives after the first nine fell out of the window
        assert!(!g.record_decrypt_failure_at("chat@g.us", start + Duration::from_secs(600)));
    }

    #[test]
    fn failures_are_tracked_per_chat() {
        let g = CorruptionGuard::new(Duration::from_secs(300), 2);
        let now = Instant::now();
        assert!(!g.record_decrypt_failure_at("a@g.us", now));
        assert!(!g.record_decrypt_failure_at("b@g.us", now));
        assert!(g.record_decrypt_failure_at("a@g.us", now));
    }

    #[test]
    fn clear_resets_a_chat() {
        let g = CorruptionGuard::new(Duration::from_secs(300), 2);
        let now = Instant::now();
        g.record_decrypt_failure_at("a@g.us", now);
        g.clear("a@g.us");
        assert!(!g.record_decrypt_failure_at("a@g.us", now));
    }
}
