use super::{AppState, Database};
use crate::auth::Identity;
use crate::types::*;

impl Database {
    /// Look up a user through the unique subject index
    pub fn user_by_subject(&self, subject: &str) -> Option<&User> {
        let id = self.users_by_subject.get(subject)?;
        self.users.get(id)
    }

    /// Return the user for an identity, creating it on first sight.
    ///
    /// The subject index is checked and written in the same transaction, so
    /// an insert for an already indexed subject resolves to the existing row.
    pub fn get_or_create_user(&mut self, identity: &Identity) -> User {
        if let Some(user) = self.user_by_subject(&identity.subject) {
            return user.clone();
        }

        let name = identity
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(ANONYMOUS_NAME)
            .to_string();

        let user = User {
            id: ulid::Ulid::new().to_string(),
            subject: identity.subject.clone(),
            name,
        };

        self.users_by_subject
            .insert(user.subject.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user.clone());
        tracing::info!("Created user {} ({})", user.id, user.name);
        user
    }
}

impl AppState {
    /// Resolve the caller to a user record, creating one if needed
    pub async fn get_or_create_user(&self, identity: &Identity) -> User {
        self.db.write().await.get_or_create_user(identity)
    }

    /// Get the caller's user record without creating it
    pub async fn get_current_user(&self, identity: Option<&Identity>) -> Option<User> {
        let identity = identity?;
        self.db
            .read()
            .await
            .user_by_subject(&identity.subject)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::identity;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_or_create_user() {
        let state = AppState::new();
        let user = state.get_or_create_user(&identity("alice", "Alice")).await;
        assert_eq!(user.name, "Alice");
        assert_eq!(user.subject, "alice");

        let again = state.get_or_create_user(&identity("alice", "Alice")).await;
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_name_not_resynced() {
        let state = AppState::new();
        let user = state.get_or_create_user(&identity("alice", "Alice")).await;
        let renamed = state
            .get_or_create_user(&identity("alice", "Alice Cooper"))
            .await;
        assert_eq!(renamed.id, user.id);
        assert_eq!(renamed.name, "Alice");
    }

    #[tokio::test]
    async fn test_anonymous_default_name() {
        let state = AppState::new();
        let nameless = Identity {
            subject: "ghost".to_string(),
            name: None,
        };
        assert_eq!(state.get_or_create_user(&nameless).await.name, "Anonymous");

        let blank = Identity {
            subject: "blank".to_string(),
            name: Some("   ".to_string()),
        };
        assert_eq!(state.get_or_create_user(&blank).await.name, "Anonymous");
    }

    #[tokio::test]
    async fn test_concurrent_first_sight_creates_one_user() {
        let state = Arc::new(AppState::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.get_or_create_user(&identity("alice", "Alice")).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(state.db.read().await.users.len(), 1);
    }

    #[tokio::test]
    async fn test_get_current_user() {
        let state = AppState::new();
        let alice = identity("alice", "Alice");

        assert!(state.get_current_user(None).await.is_none());
        // Never creates
        assert!(state.get_current_user(Some(&alice)).await.is_none());
        assert!(state.db.read().await.users.is_empty());

        let user = state.get_or_create_user(&alice).await;
        assert_eq!(state.get_current_user(Some(&alice)).await, Some(user));
    }
}
