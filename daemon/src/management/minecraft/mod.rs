mod presence;

pub use presence::{PlayerEvent, PlayerTable, PresenceAction, PresenceUpdate};
