//! Sliding time-window counters.
//!
//! Each signal keeps its own window length. A stored timestamp survives only
//! while `now - t < window`; pruning happens on every append and every read.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Hard cap on timestamps kept per key, oldest dropped first.
///
/// Far above every detection threshold, so it only bounds memory during a
/// flood inside a single window.
pub const MAX_ENTRIES_PER_KEY: usize = 512;

/// Which signal a timestamp belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ChannelCreation,
    BotJoin,
    AutomatedMessage,
    HumanMessage,
}

/// Window lengths per signal.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub channel_creation: Duration,
    pub bot_join: Duration,
    pub automated_message: Duration,
    pub human_message: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            channel_creation: Duration::from_secs(3),
            bot_join: Duration::from_secs(10),
            automated_message: Duration::from_secs(2),
            human_message: Duration::from_secs(3),
        }
    }
}

impl WindowConfig {
    /// Window length for a signal.
    pub fn window_for(&self, signal: SignalKind) -> Duration {
        match signal {
            SignalKind::ChannelCreation => self.channel_creation,
            SignalKind::BotJoin => self.bot_join,
            SignalKind::AutomatedMessage => self.automated_message,
            SignalKind::HumanMessage => self.human_message,
        }
    }
}

/// Per-key, per-signal timestamp buffers.
///
/// Keys are guild ids for guild-wide signals and account ids for per-author
/// signals. Each entry is locked independently, so concurrent events on the
/// same key are serialized without blocking other keys.
pub struct SlidingWindow {
    config: WindowConfig,
    entries: DashMap<(u64, SignalKind), VecDeque<DateTime<Utc>>>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::with_config(WindowConfig::default())
    }

    pub fn with_config(config: WindowConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Append a timestamp and return the pruned count for the key.
    pub fn record(&self, key: u64, signal: SignalKind, timestamp: DateTime<Utc>) -> usize {
        let window = self.config.window_for(signal);
        let mut entry = self.entries.entry((key, signal)).or_default();

        entry.push_back(timestamp);
        while entry.len() > MAX_ENTRIES_PER_KEY {
            entry.pop_front();
        }
        prune(&mut entry, timestamp, window);

        entry.len()
    }

    /// Prune the key's buffer relative to `now` and return what is left.
    pub fn count(&self, key: u64, signal: SignalKind, now: DateTime<Utc>) -> usize {
        let window = self.config.window_for(signal);
        match self.entries.get_mut(&(key, signal)) {
            Some(mut entry) => {
                prune(&mut entry, now, window);
                entry.len()
            }
            None => 0,
        }
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep only timestamps with `now - t < window`.
///
/// Timestamps are not guaranteed to arrive in order (gateway events are
/// dispatched concurrently), so this filters the whole buffer rather than
/// popping from the front.
fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(365));
    entries.retain(|&t| now.signed_duration_since(t) < window);
}
