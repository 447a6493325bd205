//! Per-session link counters.
//! Cheap relaxed atomics; read them with [`SessionMetrics::snapshot`].
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionMetrics {
    frames_received: AtomicU64,
    frames_discarded: AtomicU64,
    lines_discarded: AtomicU64,
    drains_sent: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_filtered: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_discarded: u64,
    pub lines_discarded: u64,
    pub drains_sent: u64,
    pub messages_dispatched: u64,
    pub messages_filtered: u64,
}

impl SessionMetrics {
    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_lines_discarded(&self) {
        self.lines_discarded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_drains_sent(&self) {
        self.drains_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_messages_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_messages_filtered(&self) {
        self.messages_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            lines_discarded: self.lines_discarded.load(Ordering::Relaxed),
            drains_sent: self.drains_sent.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            messages_filtered: self.messages_filtered.load(Ordering::Relaxed),
        }
    }
}
