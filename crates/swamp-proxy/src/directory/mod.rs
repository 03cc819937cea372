//! User and project directory.
//!
//! Request handling only reads from the directory: a user's name for the
//! downstream authorization header, a project's owner, and whether a user
//! holds an active membership in a project. The `user`, `project` and
//! `member` commands write it.

mod models;
mod repository;

use anyhow::Result;
use async_trait::async_trait;

pub use models::{ProjectSnapshot, UserSnapshot};
pub use repository::{SqliteDirectory, new_membership_uid};

/// Read access to users, projects and memberships.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn get_user(&self, user_uid: &str) -> Result<Option<UserSnapshot>>;
    async fn get_project(&self, project_uid: &str) -> Result<Option<ProjectSnapshot>>;
    /// True when the user has a membership in the project that has not been deleted.
    async fn has_active_membership(&self, user_uid: &str, project_uid: &str) -> Result<bool>;
}
