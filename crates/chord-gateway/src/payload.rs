//! Gateway wire payloads.
//!
//! The frame schema is Discord's fixed external protocol; only the pieces
//! the connection lifecycle needs are modeled here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::flags::Intents;

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Receive: an event was dispatched.
    Dispatch = 0,
    /// Send/receive: keep the connection alive.
    Heartbeat = 1,
    /// Send: start a new session.
    Identify = 2,
    /// Send: update presence.
    PresenceUpdate = 3,
    /// Send: join/leave/move voice channels.
    VoiceStateUpdate = 4,
    /// Send: resume a previous session.
    Resume = 6,
    /// Receive: reconnect and resume.
    Reconnect = 7,
    /// Send: request guild members.
    RequestGuildMembers = 8,
    /// Receive: session invalidated.
    InvalidSession = 9,
    /// Receive: sent right after connecting.
    Hello = 10,
    /// Receive: heartbeat acknowledged.
    HeartbeatAck = 11,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            3 => Ok(Self::PresenceUpdate),
            4 => Ok(Self::VoiceStateUpdate),
            6 => Ok(Self::Resume),
            7 => Ok(Self::Reconnect),
            8 => Ok(Self::RequestGuildMembers),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(other),
        }
    }
}

/// Close codes after which the session cannot be resumed.
///
/// 1000 is a normal close (fresh reconnect); 4004 and 4010+ are
/// authentication/sharding failures where the session is gone.
pub const CLOSE_NON_RESUMABLE: &[u16] = &[1000, 4004, 4010, 4011, 4012, 4013, 4014];

/// Whether a close code leaves the session resumable.
#[must_use]
pub fn is_resumable_close(code: u16) -> bool {
    !CLOSE_NON_RESUMABLE.contains(&code)
}

/// Whether a close code means reconnecting cannot help.
///
/// Bad token, bad sharding parameters, disallowed intents. Retrying with
/// the same configuration would fail the same way.
#[must_use]
pub fn is_fatal_close(code: u16) -> bool {
    code != 1000 && CLOSE_NON_RESUMABLE.contains(&code)
}

/// One gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode.
    pub op: u8,

    /// Event data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Sequence number (dispatch frames only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Event name (dispatch frames only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// A send-side frame with no sequence or event name.
    #[must_use]
    pub const fn new(op: Opcode, d: Value) -> Self {
        Self {
            op: op as u8,
            d: Some(d),
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last received sequence.
    #[must_use]
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(Opcode::Heartbeat, json!(sequence))
    }

    /// IDENTIFY handshake for a fresh session.
    #[must_use]
    pub fn identify(
        token: &str,
        intents: Intents,
        shard: Option<[u32; 2]>,
        presence: Option<&PlayingStatus>,
    ) -> Self {
        let mut d = json!({
            "token": token,
            "intents": intents.bits(),
            "properties": {
                "os": std::env::consts::OS,
                "browser": "chord",
                "device": "chord",
            },
            "compress": false,
            "large_threshold": 250,
        });
        if let Some(shard) = shard {
            d["shard"] = json!(shard);
        }
        if let Some(presence) = presence {
            d["presence"] = presence.to_value();
        }
        Self::new(Opcode::Identify, d)
    }

    /// RESUME handshake continuing an existing session.
    #[must_use]
    pub fn resume(token: &str, session_id: &str, sequence: u64) -> Self {
        Self::new(
            Opcode::Resume,
            json!({
                "token": token,
                "session_id": session_id,
                "seq": sequence,
            }),
        )
    }

    /// Member-chunk request for a guild.
    #[must_use]
    pub fn request_guild_members(guild_id: u64, query: &str, limit: u32) -> Self {
        Self::new(
            Opcode::RequestGuildMembers,
            json!({
                "guild_id": guild_id.to_string(),
                "query": query,
                "limit": limit,
            }),
        )
    }
}

/// HELLO frame data.
#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    /// Heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,
}

/// The READY fields the connection lifecycle needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    /// Session ID for later RESUME.
    pub session_id: String,

    /// Gateway URL to reconnect to when resuming.
    pub resume_gateway_url: String,
}

/// Online status for presence updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

/// Presence sent with IDENTIFY or a presence update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayingStatus {
    /// Activity name shown under the bot's name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Activity type (0 = playing, 2 = listening, 3 = watching).
    #[serde(default)]
    pub activity_type: u8,

    /// Online status.
    pub status: StatusKind,
}

impl PlayingStatus {
    /// The `d` payload of a presence update frame.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let activities = self.name.as_ref().map_or_else(Vec::new, |name| {
            vec![json!({"name": name, "type": self.activity_type})]
        });
        json!({
            "since": Value::Null,
            "activities": activities,
            "status": self.status,
            "afk": false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for op in [
            Opcode::Dispatch,
            Opcode::Heartbeat,
            Opcode::Identify,
            Opcode::Resume,
            Opcode::Reconnect,
            Opcode::InvalidSession,
            Opcode::Hello,
            Opcode::HeartbeatAck,
        ] {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
        assert!(Opcode::try_from(5).is_err());
        assert!(Opcode::try_from(42).is_err());
    }

    #[test]
    fn identify_carries_shard_and_intents() {
        let payload = GatewayPayload::identify("tok", Intents::default_bot(), Some([1, 4]), None);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "tok");
        assert_eq!(d["shard"], json!([1, 4]));
        assert_eq!(d["intents"], Intents::default_bot().bits());
        assert_eq!(d["compress"], false);
    }

    #[test]
    fn resumable_close_codes() {
        assert!(is_resumable_close(4000));
        assert!(is_resumable_close(1001));
        assert!(!is_resumable_close(1000));
        assert!(!is_resumable_close(4004));
        assert!(!is_resumable_close(4014));
    }

    #[test]
    fn normal_close_is_not_fatal() {
        assert!(!is_fatal_close(1000));
        assert!(!is_fatal_close(4000));
        assert!(is_fatal_close(4004));
        assert!(is_fatal_close(4013));
    }

    #[test]
    fn presence_serializes_status() {
        let status = PlayingStatus {
            name: Some("with fire".into()),
            activity_type: 0,
            status: StatusKind::Idle,
        };
        let value = status.to_value();
        assert_eq!(value["status"], "idle");
        assert_eq!(value["activities"][0]["name"], "with fire");
    }
}
