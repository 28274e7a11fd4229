//! Prefix command parsing and the administrator check.
//!
//! Commands are plain messages such as `!lockdown`. Parsing is pure; the
//! gateway handler decides what to do with the result.

use serenity::model::Permissions;

use crate::models::CommandKind;

/// Reply expected within the confirmation window to go ahead with a restore.
pub const CONFIRM_WORD: &str = "confirm";

/// Every command name the bot answers to.
pub const COMMAND_NAMES: &[(&str, CommandKind)] = &[
    ("lockdown", CommandKind::Lockdown),
    ("unlock", CommandKind::Unlock),
    ("emergency_channels", CommandKind::EmergencyChannels),
    ("ban_all_bots", CommandKind::BanAllBots),
    ("backup", CommandKind::Backup),
    ("restore", CommandKind::Restore),
];

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Lockdown => "lockdown",
            CommandKind::Unlock => "unlock",
            CommandKind::EmergencyChannels => "emergency_channels",
            CommandKind::BanAllBots => "ban_all_bots",
            CommandKind::Backup => "backup",
            CommandKind::Restore => "restore",
        }
    }
}

/// Parse `<prefix><name> [args...]`. Names are case sensitive and trailing
/// arguments are ignored. Returns `None` for anything that is not a known
/// command.
pub fn parse_command(prefix: &str, content: &str) -> Option<CommandKind> {
    if prefix.is_empty() {
        return None;
    }
    let rest = content.trim_start().strip_prefix(prefix)?;
    let name = rest.split_whitespace().next()?;
    // `!lockdown` but not `! lockdown`
    if !rest.starts_with(name) {
        return None;
    }

    COMMAND_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// Admin commands require the administrator permission.
pub fn is_authorized(permissions: Permissions) -> bool {
    permissions.administrator()
}

/// True if a message confirms a pending restore.
pub fn is_confirmation(content: &str) -> bool {
    content.trim().eq_ignore_ascii_case(CONFIRM_WORD)
}
