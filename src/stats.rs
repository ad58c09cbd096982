//! Process-lifetime counters backing the stats command.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

/// In-memory runtime counters. Reset on process restart by design.
pub struct Stats {
    started: DateTime<Utc>,
    messages_seen: AtomicU64,
    commands_run: AtomicU64,
    replies_sent: AtomicU64,
    reconnects: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            messages_seen: AtomicU64::new(0),
            commands_run: AtomicU64::new(0),
            replies_sent: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn note_message(&self) {
        self.messages_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_command(&self) {
        self.commands_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_reply(&self) {
        self.replies_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn commands_run(&self) -> u64 {
        self.commands_run.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Human-readable report for the stats command.
    pub fn report(&self) -> String {
        let uptime = Utc::now().signed_duration_since(self.started);
        let hours = uptime.num_hours();
        let minutes = uptime.num_minutes() % 60;
        format!(
            "Bot stats\n\
             Uptime: {hours}h {minutes}m\n\
             Messages seen: {}\n\
             Commands run: {}\n\
             Replies sent: {}\n\
             Reconnects: {}",
            self.messages_seen.load(Ordering::Relaxed),
            self.commands_run.load(Ordering::Relaxed),
            self.replies_sent.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
        )
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
