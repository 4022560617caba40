use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A player seen in a server's log output.
///
/// `xuid` is the stable key; `username` is only for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub xuid: u64,
    pub online: bool,
    pub last_action: NaiveDateTime,
    pub instance_id: u32,
}
