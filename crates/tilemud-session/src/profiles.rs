//! Guarded access to durable character profiles.

use std::sync::Arc;

use tilemud_protocol::{
    CharacterId, CharacterSnapshot, UserId, catalog::CatalogError,
};
use tilemud_store::{CharacterProfile, DbOutageGuard, DurableStore};

/// Profile reads/writes behind the DB outage guard.
pub struct ProfileService<D: DurableStore> {
    durable: Arc<D>,
    guard: Arc<DbOutageGuard>,
}

impl<D: DurableStore> ProfileService<D> {
    pub fn new(durable: Arc<D>, guard: Arc<DbOutageGuard>) -> Self {
        Self { durable, guard }
    }

    /// Fetches the profile, creating the default lazily on first contact.
    pub async fn ensure(
        &self,
        character_id: &CharacterId,
        user_id: &UserId,
    ) -> Result<CharacterProfile, CatalogError> {
        if let Some(existing) = self.get(character_id).await? {
            return Ok(existing);
        }
        let profile = CharacterProfile::default_for(
            character_id.clone(),
            user_id.clone(),
        );
        self.guard.assert_available()?;
        match self.durable.upsert_profile(profile).await {
            Ok(created) => {
                self.guard.record_success();
                tracing::info!(
                    %character_id,
                    "character profile created"
                );
                Ok(created)
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "profile create failed: {e}"
                )))
            }
        }
    }

    pub async fn get(
        &self,
        character_id: &CharacterId,
    ) -> Result<Option<CharacterProfile>, CatalogError> {
        self.guard.assert_available()?;
        match self.durable.get_profile(character_id).await {
            Ok(found) => {
                self.guard.record_success();
                Ok(found)
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "profile read failed: {e}"
                )))
            }
        }
    }
}

/// The wire view of a profile.
pub fn snapshot_of(profile: &CharacterProfile) -> CharacterSnapshot {
    CharacterSnapshot {
        character_id: profile.character_id.clone(),
        display_name: profile.display_name.clone(),
        position: profile.position,
        stats: profile.stats.clone(),
        inventory: profile.inventory.clone(),
    }
}

/// A synthetic snapshot for when the durable store cannot be read: the
/// client gets a usable default view instead of an error.
pub fn fallback_snapshot(
    character_id: &CharacterId,
    user_id: &UserId,
) -> CharacterSnapshot {
    snapshot_of(&CharacterProfile::default_for(
        character_id.clone(),
        user_id.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilemud_protocol::Dependency;
    use tilemud_store::{
        DegradedSignalService, GuardConfig, HealthConfig,
        MemoryDurableStore,
    };

    fn service() -> ProfileService<MemoryDurableStore> {
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        ProfileService::new(
            Arc::new(MemoryDurableStore::new()),
            Arc::new(DbOutageGuard::new(
                GuardConfig::default(),
                Dependency::Postgres,
                health,
            )),
        )
    }

    #[tokio::test]
    async fn test_ensure_creates_default_once() {
        let profiles = service();
        let character_id = CharacterId::new("c-1");
        let user_id = UserId::new("u-1");
        let created = profiles.ensure(&character_id, &user_id).await.unwrap();
        assert_eq!(created.position, tilemud_protocol::Position::ORIGIN);

        // Second call returns the stored profile, not a fresh default.
        let again = profiles.ensure(&character_id, &user_id).await.unwrap();
        assert_eq!(created, again);
    }

    #[tokio::test]
    async fn test_get_absent_returns_none() {
        let profiles = service();
        assert!(
            profiles
                .get(&CharacterId::new("ghost"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_fallback_snapshot_is_total() {
        let snapshot = fallback_snapshot(
            &CharacterId::new("c-1"),
            &UserId::new("u-1"),
        );
        assert_eq!(snapshot.character_id, CharacterId::new("c-1"));
        assert!(!snapshot.display_name.is_empty());
    }
}
