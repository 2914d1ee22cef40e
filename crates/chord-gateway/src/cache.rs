//! Event-driven guild cache.
//!
//! State is mutated exclusively by applying gateway events; nothing here
//! fetches from the HTTP API. `CacheFlags` decide per category whether
//! entries are kept at all, and whether the full object or just its ID
//! is retained.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::flags::CacheFlags;
use crate::shard::ShardEvent;

/// A cached object, at the fidelity the flags allow.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// The full JSON object as received from the gateway.
    Full(Value),
    /// Only the snowflake ID.
    Partial(u64),
}

impl CacheEntry {
    /// The entry's snowflake.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Full(value) => snowflake(&value["id"]),
            Self::Partial(id) => Some(*id),
        }
    }

    /// The full object, when cached at full fidelity.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Full(value) => Some(value),
            Self::Partial(_) => None,
        }
    }
}

/// What a category's flags permit storing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fidelity {
    Off,
    Partial,
    Full,
}

impl Fidelity {
    const fn enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

#[derive(Debug, Default)]
struct GuildCache {
    guild: Option<CacheEntry>,
    members: HashMap<u64, CacheEntry>,
    channels: HashMap<u64, CacheEntry>,
    threads: HashMap<u64, CacheEntry>,
    roles: HashMap<u64, CacheEntry>,
    emojis: HashMap<u64, CacheEntry>,
    stickers: HashMap<u64, CacheEntry>,
    soundboard_sounds: HashMap<u64, CacheEntry>,
    voice_states: HashMap<u64, CacheEntry>,
}

/// Read-only copy of one guild's cached state.
#[derive(Debug, Clone, Default)]
pub struct GuildCacheView {
    pub guild: Option<CacheEntry>,
    pub members: HashMap<u64, CacheEntry>,
    pub channels: HashMap<u64, CacheEntry>,
    pub threads: HashMap<u64, CacheEntry>,
    pub roles: HashMap<u64, CacheEntry>,
    pub emojis: HashMap<u64, CacheEntry>,
    pub stickers: HashMap<u64, CacheEntry>,
    pub soundboard_sounds: HashMap<u64, CacheEntry>,
    pub voice_states: HashMap<u64, CacheEntry>,
}

/// Guild cache fed by shard events.
pub struct Cache {
    flags: CacheFlags,
    guilds: RwLock<HashMap<u64, GuildCache>>,
}

impl Cache {
    #[must_use]
    pub fn new(flags: CacheFlags) -> Self {
        Self {
            flags,
            guilds: RwLock::new(HashMap::new()),
        }
    }

    /// IDs of all known guilds.
    #[must_use]
    pub fn guild_ids(&self) -> Vec<u64> {
        self.guilds.read().keys().copied().collect()
    }

    /// Snapshot of one guild's cached state.
    #[must_use]
    pub fn guild(&self, guild_id: u64) -> Option<GuildCacheView> {
        self.guilds.read().get(&guild_id).map(|g| GuildCacheView {
            guild: g.guild.clone(),
            members: g.members.clone(),
            channels: g.channels.clone(),
            threads: g.threads.clone(),
            roles: g.roles.clone(),
            emojis: g.emojis.clone(),
            stickers: g.stickers.clone(),
            soundboard_sounds: g.soundboard_sounds.clone(),
            voice_states: g.voice_states.clone(),
        })
    }

    /// Apply one shard event to the cache.
    pub fn apply(&self, event: &ShardEvent) {
        match event {
            ShardEvent::Ready { data, .. } => self.seed_from_ready(data),
            ShardEvent::Dispatch { event, data, .. } => self.apply_dispatch(event, data),
            ShardEvent::Resumed { .. } => {}
        }
    }

    fn fidelity(&self, full: CacheFlags, partial: CacheFlags) -> Fidelity {
        if self.flags.contains(full) {
            Fidelity::Full
        } else if self.flags.contains(partial) {
            Fidelity::Partial
        } else {
            Fidelity::Off
        }
    }

    fn guild_fidelity(&self) -> Fidelity {
        self.fidelity(CacheFlags::GUILDS, CacheFlags::PARTIAL_GUILDS)
    }

    fn seed_from_ready(&self, data: &Value) {
        if !self.guild_fidelity().enabled() {
            return;
        }
        // READY carries unavailable guild stubs; GUILD_CREATE fills them in.
        let Some(guilds) = data["guilds"].as_array() else {
            return;
        };
        let mut store = self.guilds.write();
        for stub in guilds {
            if let Some(id) = snowflake(&stub["id"]) {
                store.entry(id).or_default().guild = Some(CacheEntry::Partial(id));
            }
        }
    }

    fn apply_dispatch(&self, event: &str, data: &Value) {
        match event {
            "GUILD_CREATE" => self.guild_create(data),
            "GUILD_UPDATE" => self.guild_update(data),
            "GUILD_DELETE" => self.guild_delete(data),
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
                self.upsert(
                    data,
                    member_key(data),
                    CacheFlags::MEMBERS,
                    CacheFlags::PARTIAL_MEMBERS,
                    |g| &mut g.members,
                );
            }
            "GUILD_MEMBER_REMOVE" => {
                self.remove(data, member_key(data), |g| &mut g.members);
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                self.upsert(
                    data,
                    snowflake(&data["id"]),
                    CacheFlags::CHANNELS,
                    CacheFlags::PARTIAL_CHANNELS,
                    |g| &mut g.channels,
                );
            }
            "CHANNEL_DELETE" => {
                self.remove(data, snowflake(&data["id"]), |g| &mut g.channels);
            }
            "THREAD_CREATE" | "THREAD_UPDATE" => {
                self.upsert(
                    data,
                    snowflake(&data["id"]),
                    CacheFlags::THREADS,
                    CacheFlags::PARTIAL_THREADS,
                    |g| &mut g.threads,
                );
            }
            "THREAD_DELETE" => {
                self.remove(data, snowflake(&data["id"]), |g| &mut g.threads);
            }
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                let role = &data["role"];
                self.upsert_object(
                    data,
                    role,
                    snowflake(&role["id"]),
                    CacheFlags::ROLES,
                    CacheFlags::PARTIAL_ROLES,
                    |g| &mut g.roles,
                );
            }
            "GUILD_ROLE_DELETE" => {
                self.remove(data, snowflake(&data["role_id"]), |g| &mut g.roles);
            }
            "GUILD_EMOJIS_UPDATE" => {
                self.replace_collection(
                    data,
                    &data["emojis"],
                    CacheFlags::EMOJIS,
                    CacheFlags::PARTIAL_EMOJIS,
                    |g| &mut g.emojis,
                );
            }
            "GUILD_STICKERS_UPDATE" => {
                self.replace_collection(
                    data,
                    &data["stickers"],
                    CacheFlags::STICKERS,
                    CacheFlags::PARTIAL_STICKERS,
                    |g| &mut g.stickers,
                );
            }
            "GUILD_SOUNDBOARD_SOUND_CREATE" | "GUILD_SOUNDBOARD_SOUND_UPDATE" => {
                self.upsert(
                    data,
                    snowflake(&data["sound_id"]),
                    CacheFlags::SOUNDBOARD_SOUNDS,
                    CacheFlags::PARTIAL_SOUNDBOARD_SOUNDS,
                    |g| &mut g.soundboard_sounds,
                );
            }
            "GUILD_SOUNDBOARD_SOUND_DELETE" => {
                self.remove(data, snowflake(&data["sound_id"]), |g| &mut g.soundboard_sounds);
            }
            "GUILD_SOUNDBOARD_SOUNDS_UPDATE" => {
                self.replace_collection(
                    data,
                    &data["soundboard_sounds"],
                    CacheFlags::SOUNDBOARD_SOUNDS,
                    CacheFlags::PARTIAL_SOUNDBOARD_SOUNDS,
                    |g| &mut g.soundboard_sounds,
                );
            }
            "VOICE_STATE_UPDATE" => self.voice_state_update(data),
            _ => {}
        }
    }

    fn guild_create(&self, data: &Value) {
        let Some(guild_id) = snowflake(&data["id"]) else {
            return;
        };
        let guild_fidelity = self.guild_fidelity();
        if !guild_fidelity.enabled() {
            return;
        }

        let mut store = self.guilds.write();
        let guild = store.entry(guild_id).or_default();
        guild.guild = Some(match guild_fidelity {
            Fidelity::Full => CacheEntry::Full(data.clone()),
            _ => CacheEntry::Partial(guild_id),
        });

        fill_map(
            &mut guild.members,
            &data["members"],
            member_key,
            self.fidelity(CacheFlags::MEMBERS, CacheFlags::PARTIAL_MEMBERS),
        );
        fill_map(
            &mut guild.channels,
            &data["channels"],
            |c| snowflake(&c["id"]),
            self.fidelity(CacheFlags::CHANNELS, CacheFlags::PARTIAL_CHANNELS),
        );
        fill_map(
            &mut guild.threads,
            &data["threads"],
            |t| snowflake(&t["id"]),
            self.fidelity(CacheFlags::THREADS, CacheFlags::PARTIAL_THREADS),
        );
        fill_map(
            &mut guild.roles,
            &data["roles"],
            |r| snowflake(&r["id"]),
            self.fidelity(CacheFlags::ROLES, CacheFlags::PARTIAL_ROLES),
        );
        fill_map(
            &mut guild.emojis,
            &data["emojis"],
            |e| snowflake(&e["id"]),
            self.fidelity(CacheFlags::EMOJIS, CacheFlags::PARTIAL_EMOJIS),
        );
        fill_map(
            &mut guild.stickers,
            &data["stickers"],
            |s| snowflake(&s["id"]),
            self.fidelity(CacheFlags::STICKERS, CacheFlags::PARTIAL_STICKERS),
        );
        fill_map(
            &mut guild.soundboard_sounds,
            &data["soundboard_sounds"],
            |s| snowflake(&s["sound_id"]),
            self.fidelity(
                CacheFlags::SOUNDBOARD_SOUNDS,
                CacheFlags::PARTIAL_SOUNDBOARD_SOUNDS,
            ),
        );
        fill_map(
            &mut guild.voice_states,
            &data["voice_states"],
            |v| snowflake(&v["user_id"]),
            self.fidelity(CacheFlags::VOICE_STATES, CacheFlags::PARTIAL_VOICE_STATES),
        );
    }

    fn guild_update(&self, data: &Value) {
        let Some(guild_id) = snowflake(&data["id"]) else {
            return;
        };
        let fidelity = self.guild_fidelity();
        if !fidelity.enabled() {
            return;
        }
        let mut store = self.guilds.write();
        if let Some(guild) = store.get_mut(&guild_id) {
            guild.guild = Some(match fidelity {
                Fidelity::Full => CacheEntry::Full(data.clone()),
                _ => CacheEntry::Partial(guild_id),
            });
        }
    }

    fn guild_delete(&self, data: &Value) {
        let Some(guild_id) = snowflake(&data["id"]) else {
            return;
        };
        // An unavailable guild is an outage, not a removal.
        if data["unavailable"].as_bool() == Some(true) {
            return;
        }
        self.guilds.write().remove(&guild_id);
    }

    fn voice_state_update(&self, data: &Value) {
        let fidelity = self.fidelity(CacheFlags::VOICE_STATES, CacheFlags::PARTIAL_VOICE_STATES);
        if !fidelity.enabled() {
            return;
        }
        let (Some(guild_id), Some(user_id)) =
            (snowflake(&data["guild_id"]), snowflake(&data["user_id"]))
        else {
            return;
        };
        let mut store = self.guilds.write();
        let Some(guild) = store.get_mut(&guild_id) else {
            return;
        };
        if data["channel_id"].is_null() {
            guild.voice_states.remove(&user_id);
        } else {
            guild
                .voice_states
                .insert(user_id, entry_for(data, user_id, fidelity));
        }
    }

    fn upsert(
        &self,
        data: &Value,
        key: Option<u64>,
        full: CacheFlags,
        partial: CacheFlags,
        map: impl FnOnce(&mut GuildCache) -> &mut HashMap<u64, CacheEntry>,
    ) {
        self.upsert_object(data, data, key, full, partial, map);
    }

    fn upsert_object(
        &self,
        envelope: &Value,
        object: &Value,
        key: Option<u64>,
        full: CacheFlags,
        partial: CacheFlags,
        map: impl FnOnce(&mut GuildCache) -> &mut HashMap<u64, CacheEntry>,
    ) {
        let fidelity = self.fidelity(full, partial);
        if !fidelity.enabled() {
            return;
        }
        let (Some(guild_id), Some(key)) = (snowflake(&envelope["guild_id"]), key) else {
            return;
        };
        let mut store = self.guilds.write();
        let Some(guild) = store.get_mut(&guild_id) else {
            return;
        };
        map(guild).insert(key, entry_for(object, key, fidelity));
    }

    fn remove(
        &self,
        data: &Value,
        key: Option<u64>,
        map: impl FnOnce(&mut GuildCache) -> &mut HashMap<u64, CacheEntry>,
    ) {
        let (Some(guild_id), Some(key)) = (snowflake(&data["guild_id"]), key) else {
            return;
        };
        let mut store = self.guilds.write();
        if let Some(guild) = store.get_mut(&guild_id) {
            map(guild).remove(&key);
        }
    }

    fn replace_collection(
        &self,
        data: &Value,
        items: &Value,
        full: CacheFlags,
        partial: CacheFlags,
        map: impl FnOnce(&mut GuildCache) -> &mut HashMap<u64, CacheEntry>,
    ) {
        let fidelity = self.fidelity(full, partial);
        if !fidelity.enabled() {
            return;
        }
        let Some(guild_id) = snowflake(&data["guild_id"]) else {
            return;
        };
        let mut store = self.guilds.write();
        let Some(guild) = store.get_mut(&guild_id) else {
            return;
        };
        let target = map(guild);
        target.clear();
        fill_map(target, items, |i| snowflake(&i["id"]), fidelity);
    }
}

fn fill_map(
    map: &mut HashMap<u64, CacheEntry>,
    items: &Value,
    key: impl Fn(&Value) -> Option<u64>,
    fidelity: Fidelity,
) {
    if !fidelity.enabled() {
        return;
    }
    let Some(items) = items.as_array() else {
        return;
    };
    for item in items {
        if let Some(id) = key(item) {
            map.insert(id, entry_for(item, id, fidelity));
        }
    }
}

fn entry_for(object: &Value, id: u64, fidelity: Fidelity) -> CacheEntry {
    match fidelity {
        Fidelity::Full => CacheEntry::Full(object.clone()),
        _ => CacheEntry::Partial(id),
    }
}

fn member_key(member: &Value) -> Option<u64> {
    snowflake(&member["user"]["id"])
}

/// Snowflakes arrive as strings; accept raw numbers too.
fn snowflake(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guild_create(id: u64) -> ShardEvent {
        ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_CREATE".into(),
            data: json!({
                "id": id.to_string(),
                "name": "testing",
                "members": [
                    {"user": {"id": "100", "username": "alice"}},
                    {"user": {"id": "101", "username": "bob"}},
                ],
                "channels": [{"id": "200", "name": "general"}],
                "roles": [{"id": "300", "name": "mods"}],
                "voice_states": [{"user_id": "100", "channel_id": "400"}],
            }),
        }
    }

    #[test]
    fn full_flags_keep_whole_objects() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::MEMBERS);
        cache.apply(&guild_create(1));

        let view = cache.guild(1).unwrap();
        let member = view.members.get(&100).unwrap();
        assert_eq!(member.as_value().unwrap()["user"]["username"], "alice");
        assert!(view.channels.is_empty());
    }

    #[test]
    fn partial_flags_keep_only_ids() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::PARTIAL_MEMBERS);
        cache.apply(&guild_create(1));

        let view = cache.guild(1).unwrap();
        assert_eq!(view.members.get(&101), Some(&CacheEntry::Partial(101)));
        assert!(view.members.get(&101).unwrap().as_value().is_none());
    }

    #[test]
    fn disabled_guild_caching_ignores_everything() {
        let cache = Cache::new(CacheFlags::MEMBERS);
        cache.apply(&guild_create(1));
        assert!(cache.guild(1).is_none());
    }

    #[test]
    fn member_lifecycle() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::MEMBERS);
        cache.apply(&guild_create(1));

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_MEMBER_ADD".into(),
            data: json!({"guild_id": "1", "user": {"id": "102", "username": "carol"}}),
        });
        assert!(cache.guild(1).unwrap().members.contains_key(&102));

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_MEMBER_REMOVE".into(),
            data: json!({"guild_id": "1", "user": {"id": "100"}}),
        });
        assert!(!cache.guild(1).unwrap().members.contains_key(&100));
    }

    #[test]
    fn voice_state_removed_when_channel_is_null() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::VOICE_STATES);
        cache.apply(&guild_create(1));
        assert!(cache.guild(1).unwrap().voice_states.contains_key(&100));

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "VOICE_STATE_UPDATE".into(),
            data: json!({"guild_id": "1", "user_id": "100", "channel_id": null}),
        });
        assert!(!cache.guild(1).unwrap().voice_states.contains_key(&100));
    }

    #[test]
    fn role_delete_drops_only_that_role() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::ROLES);
        cache.apply(&guild_create(1));

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_ROLE_CREATE".into(),
            data: json!({"guild_id": "1", "role": {"id": "301", "name": "admins"}}),
        });
        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_ROLE_DELETE".into(),
            data: json!({"guild_id": "1", "role_id": "300"}),
        });

        let view = cache.guild(1).unwrap();
        assert!(!view.roles.contains_key(&300));
        assert!(view.roles.contains_key(&301));
    }

    #[test]
    fn emoji_update_replaces_collection() {
        let cache = Cache::new(CacheFlags::GUILDS | CacheFlags::EMOJIS);
        cache.apply(&guild_create(1));
        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_EMOJIS_UPDATE".into(),
            data: json!({"guild_id": "1", "emojis": [{"id": "500", "name": "blob"}]}),
        });

        let view = cache.guild(1).unwrap();
        assert_eq!(view.emojis.len(), 1);
        assert!(view.emojis.contains_key(&500));
    }

    #[test]
    fn unavailable_guild_delete_is_an_outage() {
        let cache = Cache::new(CacheFlags::GUILDS);
        cache.apply(&guild_create(1));

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_DELETE".into(),
            data: json!({"id": "1", "unavailable": true}),
        });
        assert!(cache.guild(1).is_some());

        cache.apply(&ShardEvent::Dispatch {
            shard_id: 0,
            event: "GUILD_DELETE".into(),
            data: json!({"id": "1"}),
        });
        assert!(cache.guild(1).is_none());
    }

    #[test]
    fn ready_seeds_guild_stubs() {
        let cache = Cache::new(CacheFlags::PARTIAL_GUILDS);
        cache.apply(&ShardEvent::Ready {
            shard_id: 0,
            data: json!({"guilds": [{"id": "7", "unavailable": true}]}),
        });
        let view = cache.guild(7).unwrap();
        assert_eq!(view.guild, Some(CacheEntry::Partial(7)));
    }
}
