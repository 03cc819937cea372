//! SQLite-backed project directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::ProjectDirectory;
use super::models::{ProjectSnapshot, UserSnapshot};

/// Repository for user, project and membership lookups.
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

/// A fresh membership id, `mem-` followed by 16 alphanumerics.
pub fn new_membership_uid() -> String {
    use rand::Rng;
    use rand::distr::Alphanumeric;

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("mem-{suffix}")
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user.
    #[instrument(skip(self))]
    pub async fn create_user(&self, user_uid: &str, username: &str) -> Result<UserSnapshot> {
        sqlx::query("INSERT INTO users (user_uid, username) VALUES (?, ?)")
            .bind(user_uid)
            .bind(username)
            .execute(&self.pool)
            .await
            .context("Failed to insert user")?;

        Ok(UserSnapshot {
            user_uid: user_uid.to_string(),
            username: username.to_string(),
        })
    }

    /// Insert a project owned by `owner_uid`.
    #[instrument(skip(self))]
    pub async fn create_project(
        &self,
        project_uid: &str,
        owner_uid: &str,
        full_name: &str,
    ) -> Result<ProjectSnapshot> {
        sqlx::query(
            r#"
            INSERT INTO projects (project_uid, project_owner_uid, full_name)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(project_uid)
        .bind(owner_uid)
        .bind(full_name)
        .execute(&self.pool)
        .await
        .context("Failed to insert project")?;

        Ok(ProjectSnapshot {
            project_uid: project_uid.to_string(),
            owner_uid: owner_uid.to_string(),
            full_name: full_name.to_string(),
        })
    }

    /// Record an active membership of `user_uid` in `project_uid`.
    #[instrument(skip(self))]
    pub async fn add_membership(
        &self,
        membership_uid: &str,
        project_uid: &str,
        user_uid: &str,
        admin: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_memberships (membership_uid, project_uid, user_uid, admin_flag)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(membership_uid)
        .bind(project_uid)
        .bind(user_uid)
        .bind(admin)
        .execute(&self.pool)
        .await
        .context("Failed to insert project membership")?;
        Ok(())
    }

    /// Soft-delete a membership by stamping its delete date.
    #[instrument(skip(self))]
    pub async fn end_membership(&self, membership_uid: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE project_memberships
            SET delete_date = datetime('now')
            WHERE membership_uid = ? AND delete_date IS NULL
            "#,
        )
        .bind(membership_uid)
        .execute(&self.pool)
        .await
        .context("Failed to end project membership")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProjectDirectory for SqliteDirectory {
    #[instrument(skip(self))]
    async fn get_user(&self, user_uid: &str) -> Result<Option<UserSnapshot>> {
        let user = sqlx::query_as::<_, UserSnapshot>(
            "SELECT user_uid, username FROM users WHERE user_uid = ?",
        )
        .bind(user_uid)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_project(&self, project_uid: &str) -> Result<Option<ProjectSnapshot>> {
        let project = sqlx::query_as::<_, ProjectSnapshot>(
            r#"
            SELECT project_uid, project_owner_uid, full_name
            FROM projects
            WHERE project_uid = ?
            "#,
        )
        .bind(project_uid)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch project")?;

        Ok(project)
    }

    #[instrument(skip(self))]
    async fn has_active_membership(&self, user_uid: &str, project_uid: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM project_memberships
            WHERE user_uid = ? AND project_uid = ? AND delete_date IS NULL
            "#,
        )
        .bind(user_uid)
        .bind(project_uid)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count project memberships")?;

        debug!(
            "user {} has {} active membership(s) in {}",
            user_uid, count, project_uid
        );
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn seeded() -> SqliteDirectory {
        let db = Database::in_memory().await.unwrap();
        let directory = SqliteDirectory::new(db.pool().clone());
        directory.create_user("usr-owner", "Owner").await.unwrap();
        directory.create_user("usr-member", "Member").await.unwrap();
        directory.create_user("usr-outsider", "Outsider").await.unwrap();
        directory
            .create_project("proj-1", "usr-owner", "Project One")
            .await
            .unwrap();
        directory
            .add_membership("mem-1", "proj-1", "usr-member", false)
            .await
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn looks_up_users_and_projects() {
        let directory = seeded().await;

        let user = directory.get_user("usr-member").await.unwrap().unwrap();
        assert_eq!(user.username, "Member");
        assert!(directory.get_user("usr-missing").await.unwrap().is_none());

        let project = directory.get_project("proj-1").await.unwrap().unwrap();
        assert_eq!(project.owner_uid, "usr-owner");
        assert!(directory.get_project("proj-missing").await.unwrap().is_none());
    }

    #[test]
    fn membership_uids_are_unique() {
        let a = new_membership_uid();
        let b = new_membership_uid();
        assert!(a.starts_with("mem-"));
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn membership_requires_known_user_and_project() {
        let directory = seeded().await;

        assert!(
            directory
                .add_membership("mem-2", "proj-1", "usr-ghost", false)
                .await
                .is_err()
        );
        assert!(
            directory
                .add_membership("mem-3", "proj-missing", "usr-outsider", false)
                .await
                .is_err()
        );
        assert!(
            directory
                .create_project("proj-2", "usr-ghost", "Orphan")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn ended_memberships_are_inactive() {
        let directory = seeded().await;

        assert!(
            directory
                .has_active_membership("usr-member", "proj-1")
                .await
                .unwrap()
        );
        assert!(
            !directory
                .has_active_membership("usr-outsider", "proj-1")
                .await
                .unwrap()
        );

        assert!(directory.end_membership("mem-1").await.unwrap());
        assert!(!directory.end_membership("mem-1").await.unwrap());
        assert!(
            !directory
                .has_active_membership("usr-member", "proj-1")
                .await
                .unwrap()
        );
    }
}
