//! Gateway intents, cache policy flags, and application flags.

use bitflags::bitflags;

bitflags! {
    /// Gateway intents controlling which event groups Discord sends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EXPRESSIONS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;
        const GUILD_MESSAGE_POLLS = 1 << 24;
        const DIRECT_MESSAGE_POLLS = 1 << 25;
    }
}

bitflags! {
    /// Cache policy: which resources are cached, and whether as full
    /// objects or partial stand-ins.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CacheFlags: u128 {
        const PARTIAL_GUILDS = 1 << 0;
        const PARTIAL_MEMBERS = 1 << 1;
        const PARTIAL_CHANNELS = 1 << 2;
        const PARTIAL_THREADS = 1 << 3;
        const PARTIAL_ROLES = 1 << 4;
        const PARTIAL_EMOJIS = 1 << 5;
        const PARTIAL_STICKERS = 1 << 6;
        const PARTIAL_VOICE_STATES = 1 << 7;
        const PARTIAL_SOUNDBOARD_SOUNDS = 1 << 8;
        const GUILDS = 1 << 50;
        const MEMBERS = 1 << 51;
        const CHANNELS = 1 << 52;
        const THREADS = 1 << 53;
        const ROLES = 1 << 54;
        const EMOJIS = 1 << 55;
        const STICKERS = 1 << 56;
        const VOICE_STATES = 1 << 57;
        const SOUNDBOARD_SOUNDS = 1 << 58;
        const PRESENCES = 1 << 100;
    }
}

bitflags! {
    /// Application flags, of which the gateway cares about the intent
    /// allowances.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ApplicationFlags: u64 {
        const GATEWAY_PRESENCE = 1 << 12;
        const GATEWAY_PRESENCE_LIMITED = 1 << 13;
        const GATEWAY_GUILD_MEMBERS = 1 << 14;
        const GATEWAY_GUILD_MEMBERS_LIMITED = 1 << 15;
        const VERIFICATION_PENDING_GUILD_LIMIT = 1 << 16;
        const EMBEDDED = 1 << 17;
        const GATEWAY_MESSAGE_CONTENT = 1 << 18;
        const GATEWAY_MESSAGE_CONTENT_LIMITED = 1 << 19;
        const APPLICATION_COMMAND_BADGE = 1 << 23;
    }
}

/// Privileged intents the application is not allowed to request.
///
/// An empty result means the configured intents are safe to IDENTIFY with;
/// anything else would make Discord reject the session with close code 4014.
#[must_use]
pub fn denied_intents(app_flags: ApplicationFlags, intents: Intents) -> Intents {
    let mut denied = Intents::empty();

    if intents.contains(Intents::GUILD_PRESENCES)
        && !app_flags.intersects(
            ApplicationFlags::GATEWAY_PRESENCE | ApplicationFlags::GATEWAY_PRESENCE_LIMITED,
        )
    {
        denied |= Intents::GUILD_PRESENCES;
    }

    if intents.contains(Intents::GUILD_MEMBERS)
        && !app_flags.intersects(
            ApplicationFlags::GATEWAY_GUILD_MEMBERS
                | ApplicationFlags::GATEWAY_GUILD_MEMBERS_LIMITED,
        )
    {
        denied |= Intents::GUILD_MEMBERS;
    }

    if intents.contains(Intents::MESSAGE_CONTENT)
        && !app_flags.intersects(
            ApplicationFlags::GATEWAY_MESSAGE_CONTENT
                | ApplicationFlags::GATEWAY_MESSAGE_CONTENT_LIMITED,
        )
    {
        denied |= Intents::MESSAGE_CONTENT;
    }

    denied
}

impl Intents {
    /// A sensible bot default: guilds, guild/direct messages, content.
    #[must_use]
    pub const fn default_bot() -> Self {
        Self::GUILDS
            .union(Self::GUILD_MESSAGES)
            .union(Self::DIRECT_MESSAGES)
            .union(Self::MESSAGE_CONTENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_intents_without_allowance_are_denied() {
        let intents = Intents::GUILD_MEMBERS | Intents::MESSAGE_CONTENT | Intents::GUILDS;
        let denied = denied_intents(ApplicationFlags::empty(), intents);
        assert_eq!(denied, Intents::GUILD_MEMBERS | Intents::MESSAGE_CONTENT);
    }

    #[test]
    fn limited_allowance_is_enough() {
        let flags = ApplicationFlags::GATEWAY_GUILD_MEMBERS_LIMITED
            | ApplicationFlags::GATEWAY_MESSAGE_CONTENT;
        let intents = Intents::GUILD_MEMBERS | Intents::MESSAGE_CONTENT;
        assert!(denied_intents(flags, intents).is_empty());
    }

    #[test]
    fn unprivileged_intents_are_never_denied() {
        let intents = Intents::GUILDS | Intents::GUILD_MESSAGES;
        assert!(denied_intents(ApplicationFlags::empty(), intents).is_empty());
    }
}
