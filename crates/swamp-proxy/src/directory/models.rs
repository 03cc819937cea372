//! User and project snapshots.

use serde::{Deserialize, Serialize};

/// The parts of a user record the proxy needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSnapshot {
    pub user_uid: String,
    pub username: String,
}

/// The parts of a project record the proxy needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectSnapshot {
    pub project_uid: String,
    #[sqlx(rename = "project_owner_uid")]
    pub owner_uid: String,
    pub full_name: String,
}

impl ProjectSnapshot {
    /// Whether `user` owns this project.
    pub fn is_owned_by(&self, user: &UserSnapshot) -> bool {
        self.owner_uid == user.user_uid
    }
}
