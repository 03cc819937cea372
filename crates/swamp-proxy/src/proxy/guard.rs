//! Project access checks for proxied requests.

use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use super::cache::ProxyCache;
use crate::directory::{ProjectDirectory, ProjectSnapshot, UserSnapshot};

/// Outcome of an access check, with the records it was based on.
#[derive(Debug, Clone)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub project: Option<ProjectSnapshot>,
    pub user: Option<UserSnapshot>,
}

impl AuthorizationDecision {
    /// The user, if access was granted.
    pub fn granted_user(&self) -> Option<&UserSnapshot> {
        if self.allowed { self.user.as_ref() } else { None }
    }
}

/// Decides whether a user may reach a project's viewer.
pub struct AccessGuard {
    directory: Arc<dyn ProjectDirectory>,
    cache: Arc<ProxyCache>,
}

impl AccessGuard {
    pub fn new(directory: Arc<dyn ProjectDirectory>, cache: Arc<ProxyCache>) -> Self {
        Self { directory, cache }
    }

    /// Look up a project, consulting the cache first.
    pub async fn load_project(&self, project_uid: &str) -> Result<Option<ProjectSnapshot>> {
        if let Some(project) = self.cache.project(project_uid) {
            return Ok(Some(project));
        }
        let project = self.directory.get_project(project_uid).await?;
        if let Some(ref project) = project {
            self.cache.put_project(project.clone());
        }
        Ok(project)
    }

    /// Look up a user, consulting the cache first.
    pub async fn load_user(&self, user_uid: &str) -> Result<Option<UserSnapshot>> {
        if let Some(user) = self.cache.user(user_uid) {
            return Ok(Some(user));
        }
        let user = self.directory.get_user(user_uid).await?;
        if let Some(ref user) = user {
            self.cache.put_user(user.clone());
        }
        Ok(user)
    }

    /// Owners and active members pass. A missing user or project fails closed.
    pub async fn authorize(
        &self,
        user: Option<&UserSnapshot>,
        project: Option<&ProjectSnapshot>,
    ) -> Result<bool> {
        let (Some(user), Some(project)) = (user, project) else {
            return Ok(false);
        };
        if project.is_owned_by(user) {
            return Ok(true);
        }
        self.directory
            .has_active_membership(&user.user_uid, &project.project_uid)
            .await
    }

    /// Load the user and project and decide access.
    #[instrument(skip(self))]
    pub async fn decide(
        &self,
        user_uid: &str,
        project_uid: Option<&str>,
    ) -> Result<AuthorizationDecision> {
        let project = match project_uid {
            Some(uid) => self.load_project(uid).await?,
            None => None,
        };
        let user = self.load_user(user_uid).await?;
        let allowed = self.authorize(user.as_ref(), project.as_ref()).await?;

        Ok(AuthorizationDecision {
            allowed,
            project,
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::directory::SqliteDirectory;
    use std::time::Duration;

    async fn seeded() -> (SqliteDirectory, AccessGuard) {
        let db = Database::in_memory().await.unwrap();
        let directory = SqliteDirectory::new(db.pool().clone());
        directory.create_user("usr-owner", "Owner").await.unwrap();
        directory.create_user("usr-member", "Member").await.unwrap();
        directory.create_user("usr-outsider", "Outsider").await.unwrap();
        directory
            .create_project("proj-9", "usr-owner", "Assessment Project")
            .await
            .unwrap();
        directory
            .add_membership("mem-1", "proj-9", "usr-member", false)
            .await
            .unwrap();

        let guard = AccessGuard::new(
            Arc::new(directory.clone()),
            Arc::new(ProxyCache::new(true, Duration::from_secs(600))),
        );
        (directory, guard)
    }

    #[tokio::test]
    async fn owner_and_member_are_allowed() {
        let (_, guard) = seeded().await;

        let owner = guard.decide("usr-owner", Some("proj-9")).await.unwrap();
        assert!(owner.allowed);
        assert_eq!(owner.granted_user().unwrap().username, "Owner");

        let member = guard.decide("usr-member", Some("proj-9")).await.unwrap();
        assert!(member.allowed);
    }

    #[tokio::test]
    async fn outsider_is_denied() {
        let (_, guard) = seeded().await;
        let decision = guard.decide("usr-outsider", Some("proj-9")).await.unwrap();
        assert!(!decision.allowed);
        assert!(decision.project.is_some());
        assert!(decision.granted_user().is_none());
    }

    #[tokio::test]
    async fn ended_membership_is_denied() {
        let (directory, guard) = seeded().await;
        assert!(directory.end_membership("mem-1").await.unwrap());

        let decision = guard.decide("usr-member", Some("proj-9")).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn missing_project_or_user_fails_closed() {
        let (_, guard) = seeded().await;

        let no_project_id = guard.decide("usr-owner", None).await.unwrap();
        assert!(!no_project_id.allowed);
        assert!(no_project_id.project.is_none());

        let unknown_project = guard.decide("usr-owner", Some("proj-x")).await.unwrap();
        assert!(!unknown_project.allowed);
        assert!(unknown_project.project.is_none());

        let unknown_user = guard.decide("usr-ghost", Some("proj-9")).await.unwrap();
        assert!(!unknown_user.allowed);
        assert!(unknown_user.project.is_some());
    }
}
