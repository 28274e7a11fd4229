//! raidguard: anti-raid defense for Discord guilds.
//!
//! Sliding-window detectors feed a per-guild lockdown state machine that
//! bans raid bots, purges webhooks and rebuilds the guild around two
//! emergency channels.

pub mod backup;
pub mod commands;
pub mod config;
pub mod detectors;
pub mod discord;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod guild;
pub mod health;
pub mod lockdown;
pub mod models;
pub mod platform;
pub mod recovery;
pub mod router;
pub mod window;
