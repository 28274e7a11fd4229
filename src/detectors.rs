//! Burst and content detectors.
//!
//! Each detector records its signal in the guild's [`SlidingWindow`] and
//! returns a [`Verdict`]. Detectors never call the platform themselves: the
//! single-actor remediation travels inside the verdict and the router executes
//! it before asking for lockdown.

use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};

use crate::error::Result;
use crate::models::LockdownReason;
use crate::recovery::EmergencyChannelSet;
use crate::window::{SignalKind, SlidingWindow, WindowConfig};

/// Channel-name fragments that mark a raid channel.
pub const DEFAULT_RAID_KEYWORDS: &[&str] = &[
    "raid",
    "spam",
    "nuked",
    "hacked",
    "rip",
    "lol",
    "get",
    "raided",
    "bot",
    "link",
    "http",
    "discord.gg",
    ".gg",
    "invite",
    "join",
    "www",
    ".com",
    ".net",
    ".org",
];

/// Detector thresholds and windows.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Channel creations inside the window that trigger lockdown (default: 2).
    pub channel_burst_threshold: usize,
    /// Bot joins inside the window that trigger lockdown (default: 2).
    pub bot_join_threshold: usize,
    /// Messages from one bot inside the window that trigger lockdown (default: 3).
    pub bot_spam_threshold: usize,
    /// Messages from one human inside the window that earn a timeout (default: 5).
    pub human_spam_threshold: usize,
    /// Timeout applied to a spamming human (default: 1 hour).
    pub spam_timeout: Duration,
    /// Window lengths per signal.
    pub windows: WindowConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            channel_burst_threshold: 2,
            bot_join_threshold: 2,
            bot_spam_threshold: 3,
            human_spam_threshold: 5,
            spam_timeout: Duration::from_secs(3600),
            windows: WindowConfig::default(),
        }
    }
}

/// A single-actor action a detector wants carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    DeleteChannel {
        channel_id: ChannelId,
    },
    Ban {
        user_id: UserId,
        reason: &'static str,
    },
    Timeout {
        user_id: UserId,
        duration: Duration,
        reason: &'static str,
    },
    DeleteMessage {
        channel_id: ChannelId,
        message_id: MessageId,
    },
}

/// Outcome of running a detector on one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Act on the offending actor only.
    Remediate(Vec<Remediation>),
    /// Act on the offending actor, then lock the guild down.
    Lockdown {
        reason: LockdownReason,
        remediation: Remediation,
    },
}

impl Verdict {
    pub fn lockdown_reason(&self) -> Option<LockdownReason> {
        match self {
            Verdict::Lockdown { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Case-insensitive substring matcher over the raid keyword list.
pub struct KeywordMatcher {
    set: RegexSet,
}

impl KeywordMatcher {
    /// Compile a matcher. Keywords are literal text, not patterns.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let patterns = keywords
            .iter()
            .map(|k| format!("(?i){}", regex::escape(k.as_ref())));
        Ok(Self {
            set: RegexSet::new(patterns)?,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_RAID_KEYWORDS)
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}

/// True if the content pings everyone in the guild.
pub fn mentions_broadcast(content: &str) -> bool {
    content.contains("@everyone") || content.contains("@here")
}

/// The full detector suite.
pub struct Detectors {
    config: DetectionConfig,
    keywords: KeywordMatcher,
}

impl Detectors {
    pub fn new(config: DetectionConfig, keywords: KeywordMatcher) -> Self {
        Self { config, keywords }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Channel-creation rules, in priority order: emergency exemption,
    /// record, keyword match, burst count.
    pub fn channel_created(
        &self,
        windows: &SlidingWindow,
        emergency: &EmergencyChannelSet,
        guild_id: GuildId,
        channel_id: ChannelId,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Verdict {
        if emergency.take_exemption(channel_id, name) {
            return Verdict::Allow;
        }

        let count = windows.record(guild_id.get(), SignalKind::ChannelCreation, timestamp);

        if self.keywords.is_match(name) {
            return Verdict::Lockdown {
                reason: LockdownReason::SuspiciousChannelName,
                remediation: Remediation::DeleteChannel { channel_id },
            };
        }

        if count >= self.config.channel_burst_threshold {
            return Verdict::Lockdown {
                reason: LockdownReason::MassChannelCreation,
                remediation: Remediation::DeleteChannel { channel_id },
            };
        }

        Verdict::Allow
    }

    /// Only automated accounts are tracked.
    pub fn member_joined(
        &self,
        windows: &SlidingWindow,
        guild_id: GuildId,
        user_id: UserId,
        is_automated: bool,
        joined_at: DateTime<Utc>,
    ) -> Verdict {
        if !is_automated {
            return Verdict::Allow;
        }

        let count = windows.record(guild_id.get(), SignalKind::BotJoin, joined_at);
        if count >= self.config.bot_join_threshold {
            return Verdict::Lockdown {
                reason: LockdownReason::MultipleBotsJoining,
                remediation: Remediation::Ban {
                    user_id,
                    reason: "Auto-ban: Multiple bots joining rapidly",
                },
            };
        }

        Verdict::Allow
    }

    /// Message rules. Automated and human authors are handled by disjoint
    /// rules; our own account is never tracked.
    #[allow(clippy::too_many_arguments)]
    pub fn message_posted(
        &self,
        windows: &SlidingWindow,
        own_id: UserId,
        author_id: UserId,
        is_automated: bool,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
        author_can_mention_everyone: bool,
        timestamp: DateTime<Utc>,
    ) -> Verdict {
        if is_automated {
            if author_id == own_id {
                return Verdict::Allow;
            }

            let count = windows.record(author_id.get(), SignalKind::AutomatedMessage, timestamp);
            if count >= self.config.bot_spam_threshold {
                return Verdict::Lockdown {
                    reason: LockdownReason::BotSpam,
                    remediation: Remediation::Ban {
                        user_id: author_id,
                        reason: "Bot spam detected - instant ban",
                    },
                };
            }
            return Verdict::Allow;
        }

        let mut remediations = Vec::new();

        let count = windows.record(author_id.get(), SignalKind::HumanMessage, timestamp);
        if count >= self.config.human_spam_threshold {
            remediations.push(Remediation::Timeout {
                user_id: author_id,
                duration: self.config.spam_timeout,
                reason: "Spam detected",
            });
        }

        if mentions_broadcast(content) && !author_can_mention_everyone {
            remediations.push(Remediation::DeleteMessage {
                channel_id,
                message_id,
            });
            remediations.push(Remediation::Ban {
                user_id: author_id,
                reason: "Unauthorized @everyone spam",
            });
        }

        if remediations.is_empty() {
            Verdict::Allow
        } else {
            Verdict::Remediate(remediations)
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn detectors() -> Detectors {
        Detectors::new(
            DetectionConfig::default(),
            KeywordMatcher::with_defaults().expect("keywords compile"),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any name containing "discord.gg" in any casing is suspicious,
        /// whatever the window already holds.
        #[test]
        fn prop_invite_names_always_suspicious(
            prefix in "[a-z0-9-]{0,10}",
            suffix in "[a-z0-9-]{0,10}",
            upper in prop::collection::vec(any::<bool>(), 10),
            prior in 0usize..5,
        ) {
            let invite: String = "discord.gg"
                .chars()
                .zip(upper.iter())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            let name = format!("{}{}{}", prefix, invite, suffix);

            let d = detectors();
            let w = SlidingWindow::new();
            let e = EmergencyChannelSet::new();
            let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
            for i in 0..prior {
                w.record(1, SignalKind::ChannelCreation, base - chrono::Duration::seconds(60 + i as i64));
            }

            let verdict = d.channel_created(&w, &e, GuildId::new(1), ChannelId::new(9), &name, base);
            prop_assert_eq!(verdict.lockdown_reason(), Some(LockdownReason::SuspiciousChannelName));
        }

        /// Within one 3s window, the second creation of a clean name always
        /// locks the guild down for mass creation.
        #[test]
        fn prop_burst_inside_window_locks(gap_ms in 0i64..3_000) {
            let d = detectors();
            let w = SlidingWindow::new();
            let e = EmergencyChannelSet::new();
            let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

            let first = d.channel_created(&w, &e, GuildId::new(1), ChannelId::new(1), "general", base);
            prop_assert_eq!(first, Verdict::Allow);

            let second = d.channel_created(
                &w,
                &e,
                GuildId::new(1),
                ChannelId::new(2),
                "memes",
                base + chrono::Duration::milliseconds(gap_ms),
            );
            prop_assert_eq!(second.lockdown_reason(), Some(LockdownReason::MassChannelCreation));
        }
    }
}
