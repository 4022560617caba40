use bedrock_protocol::management::minecraft::Player;
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // [2020-07-19 18:29:49 INFO] Player connected: Alice, xuid: 123
    // [2020-07-19 18:30:57 INFO] Player disconnected: Alice, xuid: 123
    static ref PLAYER_EVENT_PATTERN: Regex = Regex::new(
        r"^\[(?P<time>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})[^\]]*\]\s*Player (?P<action>connected|disconnected): (?P<name>[^,]+), xuid: ?(?P<xuid>\d+)"
    )
    .expect("Failed to compile PLAYER_EVENT_PATTERN regex");
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub action: PresenceAction,
    pub username: String,
    pub xuid: u64,
    pub timestamp: NaiveDateTime,
}

impl PlayerEvent {
    /// Extracts a connect/disconnect event from one server log line.
    pub fn parse(line: &str) -> Option<PlayerEvent> {
        if !(line.contains("Player") && line.contains("connected")) {
            return None;
        }
        let caps = PLAYER_EVENT_PATTERN.captures(line.trim())?;
        let timestamp = NaiveDateTime::parse_from_str(&caps["time"], TIMESTAMP_FORMAT).ok()?;
        let xuid = caps["xuid"].parse::<u64>().ok()?;
        let action = match &caps["action"] {
            "disconnected" => PresenceAction::Disconnected,
            _ => PresenceAction::Connected,
        };
        Some(PlayerEvent {
            action,
            username: caps["name"].trim().to_string(),
            xuid,
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceUpdate {
    Joined,
    Rejoined,
    Left,
    /// A disconnect for a player that never connected while we were watching.
    UnknownDisconnect,
}

/// Players seen by one instance, in order of first appearance.
#[derive(Debug, Clone)]
pub struct PlayerTable {
    instance_id: u32,
    players: Vec<Player>,
}

impl PlayerTable {
    pub fn new(instance_id: u32) -> Self {
        Self {
            instance_id,
            players: vec![],
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn get(&self, xuid: u64) -> Option<&Player> {
        self.players.iter().find(|p| p.xuid == xuid)
    }

    pub fn apply(&mut self, event: &PlayerEvent) -> PresenceUpdate {
        let online = event.action == PresenceAction::Connected;
        match self.players.iter_mut().find(|p| p.xuid == event.xuid) {
            Some(player) => {
                player.online = online;
                player.last_action = event.timestamp;
                if online {
                    PresenceUpdate::Rejoined
                } else {
                    PresenceUpdate::Left
                }
            }
            None if online => {
                self.players.push(Player {
                    username: event.username.clone(),
                    xuid: event.xuid,
                    online: true,
                    last_action: event.timestamp,
                    instance_id: self.instance_id,
                });
                PresenceUpdate::Joined
            }
            None => PresenceUpdate::UnknownDisconnect,
        }
    }
}
