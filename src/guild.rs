//! Per-guild state owned by the router.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::model::id::{GuildId, UserId};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::models::LockdownReason;
use crate::recovery::EmergencyChannelSet;
use crate::window::{SlidingWindow, WindowConfig};

/// Lockdown state of one guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdownState {
    Normal,
    Locked,
}

/// Details of the current lockdown.
#[derive(Debug, Clone)]
pub struct LockdownStatus {
    pub incident_id: Uuid,
    pub reason: LockdownReason,
    pub since: DateTime<Utc>,
}

/// The guarded Normal/Locked flag.
///
/// Entering is a single compare-and-swap, so any number of concurrent
/// triggers yield exactly one winner. A second flag tracks whether a
/// lockdown sequence is still running; `reset` leaves it alone, so an
/// unlock during a sequence cannot let a second one start beside it.
#[derive(Debug, Default)]
pub struct LockdownFlag {
    locked: AtomicBool,
    running: AtomicBool,
    status: Mutex<Option<LockdownStatus>>,
}

/// Held for the duration of one lockdown sequence.
#[derive(Debug)]
pub struct SequenceGuard<'a> {
    flag: &'a LockdownFlag,
    status: LockdownStatus,
}

impl SequenceGuard<'_> {
    pub fn status(&self) -> &LockdownStatus {
        &self.status
    }
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        self.flag.running.store(false, Ordering::Release);
    }
}

impl LockdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normal → Locked. Returns a guard for the sequence if this call won
    /// the transition, `None` if the guild was already locked or a previous
    /// sequence has not finished.
    pub fn try_enter(&self, reason: LockdownReason) -> Option<SequenceGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.running.store(false, Ordering::Release);
            return None;
        }

        let status = LockdownStatus {
            incident_id: Uuid::new_v4(),
            reason,
            since: Utc::now(),
        };
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Some(status.clone());
        Some(SequenceGuard { flag: self, status })
    }

    /// Locked → Normal. Returns whether the guild was locked.
    pub fn reset(&self) -> bool {
        let was_locked = self.locked.swap(false, Ordering::AcqRel);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = None;
        was_locked
    }

    pub fn state(&self) -> LockdownState {
        if self.locked.load(Ordering::Acquire) {
            LockdownState::Locked
        } else {
            LockdownState::Normal
        }
    }

    pub fn is_sequence_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.state() == LockdownState::Locked
    }

    pub fn status(&self) -> Option<LockdownStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Everything mutable the bot keeps for one guild.
pub struct GuildContext {
    pub guild_id: GuildId,
    pub windows: SlidingWindow,
    pub emergency: EmergencyChannelSet,
    pub lockdown: LockdownFlag,
    confirmations: DashMap<UserId, oneshot::Sender<()>>,
}

impl GuildContext {
    pub fn new(guild_id: GuildId, windows: WindowConfig) -> Self {
        Self {
            guild_id,
            windows: SlidingWindow::with_config(windows),
            emergency: EmergencyChannelSet::new(),
            lockdown: LockdownFlag::new(),
            confirmations: DashMap::new(),
        }
    }

    /// Register a pending confirmation for an actor. A newer request
    /// replaces (and thereby cancels) an older one.
    pub fn await_confirmation(&self, actor: UserId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.confirmations.insert(actor, tx);
        rx
    }

    /// Resolve the actor's pending confirmation, if any.
    pub fn confirm(&self, actor: UserId) -> bool {
        match self.confirmations.remove(&actor) {
            Some((_, tx)) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn has_pending_confirmation(&self, actor: UserId) -> bool {
        self.confirmations.contains_key(&actor)
    }

    pub fn drop_confirmation(&self, actor: UserId) {
        self.confirmations.remove(&actor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_normal() {
        let flag = LockdownFlag::new();
        assert_eq!(flag.state(), LockdownState::Normal);
        assert!(flag.status().is_none());
    }

    #[test]
    fn enter_is_at_most_once() {
        let flag = LockdownFlag::new();
        let first = flag.try_enter(LockdownReason::BotSpam);
        assert!(first.is_some());
        assert!(flag.try_enter(LockdownReason::MassChannelCreation).is_none());
        assert_eq!(
            flag.status().map(|s| s.reason),
            Some(LockdownReason::BotSpam)
        );
    }

    #[test]
    fn reset_allows_reentry() {
        let flag = LockdownFlag::new();
        flag.try_enter(LockdownReason::Manual);
        assert!(flag.reset());
        assert!(!flag.reset());
        assert_eq!(flag.state(), LockdownState::Normal);
        assert!(flag.try_enter(LockdownReason::Manual).is_some());
    }

    #[test]
    fn unlock_during_sequence_blocks_second_sequence() {
        let flag = LockdownFlag::new();
        let sequence = flag.try_enter(LockdownReason::BotSpam);
        assert!(sequence.is_some());

        assert!(flag.reset());
        assert_eq!(flag.state(), LockdownState::Normal);
        assert!(flag.is_sequence_running());
        assert!(flag.try_enter(LockdownReason::Manual).is_none());
        assert_eq!(flag.state(), LockdownState::Normal);

        drop(sequence);
        assert!(!flag.is_sequence_running());
        assert!(flag.try_enter(LockdownReason::Manual).is_some());
    }

    #[test]
    fn concurrent_entries_have_one_winner() {
        let flag = Arc::new(LockdownFlag::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let flag = flag.clone();
                std::thread::spawn(move || flag.try_enter(LockdownReason::BotSpam).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn confirmation_round_trip() {
        let ctx = GuildContext::new(GuildId::new(1), WindowConfig::default());
        let rx = ctx.await_confirmation(UserId::new(5));
        assert!(ctx.has_pending_confirmation(UserId::new(5)));
        assert!(!ctx.confirm(UserId::new(6)));
        assert!(ctx.confirm(UserId::new(5)));
        assert!(rx.await.is_ok());
        assert!(!ctx.has_pending_confirmation(UserId::new(5)));
    }
}
