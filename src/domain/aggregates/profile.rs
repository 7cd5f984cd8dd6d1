//! Player profile linked to a site account

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::MinecraftUsername;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub minecraft_username: Option<MinecraftUsername>,
    /// Cached from the public profile directory; absent when the lookup failed.
    pub minecraft_uuid: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self { Self { user_id, minecraft_username: None, minecraft_uuid: None } }

    pub fn link(&mut self, username: MinecraftUsername, uuid: Option<String>) {
        self.minecraft_username = Some(username);
        self.minecraft_uuid = uuid;
    }
}
