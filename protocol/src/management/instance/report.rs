use crate::management::instance::properties::PortPair;
use crate::management::instance::status::InstanceStatus;
use crate::management::minecraft::Player;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time view of one fleet instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub id: u32,
    pub name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub ports: Option<PortPair>,
    #[serde(default)]
    pub players: Vec<Player>,
}

impl InstanceReport {
    pub fn online_players(&self) -> impl Iterator<Item = &Player> + '_ {
        self.players.iter().filter(|p| p.online)
    }
}

impl fmt::Display for InstanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {} - ",
            self.id,
            self.name,
            self.server_name.as_deref().unwrap_or("")
        )?;
        match self.ports {
            Some(ports) => write!(f, "{}", ports.v4),
            None => Ok(()),
        }
    }
}
