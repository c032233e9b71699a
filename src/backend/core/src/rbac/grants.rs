//! Storage for the role ↔ permission grant relation.
//!
//! The engine never owns persistence; it talks to the grant relation through
//! [`RoleGrantStore`]. Every write is insert-if-absent, so a (role, permission)
//! pair is stored at most once no matter how many writers race on it.
//!
//! Implementations:
//! - [`InMemoryGrantStore`]: sharded map, used in tests and single-process setups
//! - [`PgGrantStore`]: PostgreSQL via `INSERT ... ON CONFLICT DO NOTHING`
//! - [`CachedGrantStore`]: read-through cache over any store, invalidated
//!   synchronously on every write that passes through it

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::debug;

use super::models::{Permission, RoleGrant, RoleId};
use crate::error::Result;

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait RoleGrantStore: Send + Sync {
    /// Write the grant unless it already exists. Returns `true` if a row was written.
    async fn insert_if_absent(&self, grant: &RoleGrant) -> Result<bool>;

    /// Insert-if-absent for several permissions of one role. Returns rows written.
    async fn insert_many_if_absent(&self, role_id: &RoleId, permissions: &[Permission]) -> Result<usize> {
        let mut inserted = 0;
        for permission in permissions {
            if self
                .insert_if_absent(&RoleGrant::new(role_id.clone(), permission.clone()))
                .await?
            {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Remove a grant. Returns `true` if it existed.
    async fn remove(&self, grant: &RoleGrant) -> Result<bool>;

    /// All explicit grants of a role.
    async fn grants_for(&self, role_id: &RoleId) -> Result<HashSet<Permission>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Grant relation kept in a `DashMap`.
///
/// The per-role set is mutated under the shard lock, so check and insert are
/// one atomic step.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGrantStore {
    grants: Arc<DashMap<RoleId, HashSet<Permission>>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored (role, permission) rows.
    pub fn row_count(&self) -> usize {
        self.grants.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl RoleGrantStore for InMemoryGrantStore {
    async fn insert_if_absent(&self, grant: &RoleGrant) -> Result<bool> {
        grant.validate()?;
        Ok(self
            .grants
            .entry(grant.role_id.clone())
            .or_default()
            .insert(grant.permission.clone()))
    }

    async fn insert_many_if_absent(&self, role_id: &RoleId, permissions: &[Permission]) -> Result<usize> {
        let mut set = self.grants.entry(role_id.clone()).or_default();
        Ok(permissions
            .iter()
            .filter(|permission| set.insert((*permission).clone()))
            .count())
    }

    async fn remove(&self, grant: &RoleGrant) -> Result<bool> {
        Ok(self
            .grants
            .get_mut(&grant.role_id)
            .map(|mut set| set.remove(&grant.permission))
            .unwrap_or(false))
    }

    async fn grants_for(&self, role_id: &RoleId) -> Result<HashSet<Permission>> {
        Ok(self
            .grants
            .get(role_id)
            .map(|set| set.clone())
            .unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PostgreSQL Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Grant relation in PostgreSQL.
///
/// Expects a table with a uniqueness constraint on the grant pair:
///
/// ```sql
/// CREATE TABLE role_grants (
///     role_id  TEXT NOT NULL,
///     resource TEXT NOT NULL,
///     action   TEXT NOT NULL,
///     PRIMARY KEY (role_id, resource, action)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PgGrantStore {
    pool: PgPool,
}

const INSERT_GRANT: &str = "INSERT INTO role_grants (role_id, resource, action) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (role_id, resource, action) DO NOTHING";

const INSERT_GRANTS: &str = "INSERT INTO role_grants (role_id, resource, action) \
     SELECT $1, g.resource, g.action \
     FROM UNNEST($2::text[], $3::text[]) AS g(resource, action) \
     ON CONFLICT (role_id, resource, action) DO NOTHING";

const DELETE_GRANT: &str =
    "DELETE FROM role_grants WHERE role_id = $1 AND resource = $2 AND action = $3";

const SELECT_GRANTS: &str = "SELECT resource, action FROM role_grants WHERE role_id = $1";

impl PgGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleGrantStore for PgGrantStore {
    async fn insert_if_absent(&self, grant: &RoleGrant) -> Result<bool> {
        grant.validate()?;
        let result = sqlx::query(INSERT_GRANT)
            .bind(grant.role_id.as_str())
            .bind(&grant.permission.resource)
            .bind(&grant.permission.action)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_many_if_absent(&self, role_id: &RoleId, permissions: &[Permission]) -> Result<usize> {
        let (resources, actions): (Vec<String>, Vec<String>) = permissions
            .iter()
            .map(|p| (p.resource.clone(), p.action.clone()))
            .unzip();
        let result = sqlx::query(INSERT_GRANTS)
            .bind(role_id.as_str())
            .bind(resources)
            .bind(actions)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn remove(&self, grant: &RoleGrant) -> Result<bool> {
        let result = sqlx::query(DELETE_GRANT)
            .bind(grant.role_id.as_str())
            .bind(&grant.permission.resource)
            .bind(&grant.permission.action)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn grants_for(&self, role_id: &RoleId) -> Result<HashSet<Permission>> {
        let rows: Vec<(String, String)> = sqlx::query_as(SELECT_GRANTS)
            .bind(role_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(resource, action)| Permission::new(resource, action))
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cached Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct CacheSlot {
    /// Bumped on every write; a load started under an older version is discarded.
    version: u64,
    grants: Option<HashSet<Permission>>,
}

/// Read-through cache of per-role grant sets.
///
/// Writes go to the inner store first, then bump the role's version and drop
/// the cached set in one step. A concurrent read that loaded before the write
/// finds the version changed and does not populate the cache, so a stale set
/// is never served after a write returns. There is no time-based expiry.
#[derive(Debug)]
pub struct CachedGrantStore<S> {
    inner: S,
    slots: DashMap<RoleId, CacheSlot>,
}

impl<S: RoleGrantStore> CachedGrantStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            slots: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop the cached grants of a role. Call after writes made behind this cache's back.
    pub fn invalidate(&self, role_id: &RoleId) {
        let mut slot = self.slots.entry(role_id.clone()).or_default();
        slot.version += 1;
        slot.grants = None;
        debug!(role_id = %role_id, version = slot.version, "Invalidated cached grants");
    }

    pub fn is_cached(&self, role_id: &RoleId) -> bool {
        self.slots
            .get(role_id)
            .map(|slot| slot.grants.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl<S: RoleGrantStore> RoleGrantStore for CachedGrantStore<S> {
    async fn insert_if_absent(&self, grant: &RoleGrant) -> Result<bool> {
        let inserted = self.inner.insert_if_absent(grant).await;
        self.invalidate(&grant.role_id);
        inserted
    }

    async fn insert_many_if_absent(&self, role_id: &RoleId, permissions: &[Permission]) -> Result<usize> {
        let inserted = self.inner.insert_many_if_absent(role_id, permissions).await;
        self.invalidate(role_id);
        inserted
    }

    async fn remove(&self, grant: &RoleGrant) -> Result<bool> {
        let removed = self.inner.remove(grant).await;
        self.invalidate(&grant.role_id);
        removed
    }

    async fn grants_for(&self, role_id: &RoleId) -> Result<HashSet<Permission>> {
        let version = match self.slots.get(role_id) {
            Some(slot) => {
                if let Some(grants) = &slot.grants {
                    return Ok(grants.clone());
                }
                slot.version
            }
            None => 0,
        };

        let grants = self.inner.grants_for(role_id).await?;

        let mut slot = self.slots.entry(role_id.clone()).or_default();
        if slot.version == version {
            slot.grants = Some(grants.clone());
        }
        Ok(grants)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn grant(role: &str, resource: &str, action: &str) -> RoleGrant {
        RoleGrant::new(RoleId::new(role), Permission::new(resource, action))
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let store = InMemoryGrantStore::new();
        assert!(store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap());
        assert!(!store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap());
        assert!(store.insert_if_absent(&grant("r2", "tasks", "read")).await.unwrap());
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_grant_rejected() {
        let store = InMemoryGrantStore::new();
        let err = store.insert_if_absent(&grant("", "tasks", "read")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedGrant);
        assert_eq!(store.row_count(), 0);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryGrantStore::new();
        store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap();

        assert!(store.remove(&grant("r1", "tasks", "read")).await.unwrap());
        assert!(!store.remove(&grant("r1", "tasks", "read")).await.unwrap());
        assert!(!store.remove(&grant("missing", "tasks", "read")).await.unwrap());
        assert!(store.grants_for(&RoleId::new("r1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_many_counts_only_new_rows() {
        let store = InMemoryGrantStore::new();
        let role = RoleId::new("r1");
        store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap();

        let inserted = store
            .insert_many_if_absent(
                &role,
                &[Permission::new("tasks", "read"), Permission::new("tasks", "update")],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.grants_for(&role).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_populates_on_read() {
        let store = CachedGrantStore::new(InMemoryGrantStore::new());
        let role = RoleId::new("r1");
        store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap();
        assert!(!store.is_cached(&role));

        let grants = store.grants_for(&role).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert!(store.is_cached(&role));
    }

    #[tokio::test]
    async fn test_cache_invalidated_synchronously_on_write() {
        let store = CachedGrantStore::new(InMemoryGrantStore::new());
        let role = RoleId::new("r1");
        store.insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap();
        store.grants_for(&role).await.unwrap();

        store.insert_if_absent(&grant("r1", "tasks", "update")).await.unwrap();
        assert!(!store.is_cached(&role));
        assert_eq!(store.grants_for(&role).await.unwrap().len(), 2);

        store.remove(&grant("r1", "tasks", "read")).await.unwrap();
        let grants = store.grants_for(&role).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants.contains(&Permission::new("tasks", "update")));
    }

    #[tokio::test]
    async fn test_external_write_needs_explicit_invalidate() {
        let store = CachedGrantStore::new(InMemoryGrantStore::new());
        let role = RoleId::new("r1");
        store.grants_for(&role).await.unwrap();

        store.inner().insert_if_absent(&grant("r1", "tasks", "read")).await.unwrap();
        assert!(store.grants_for(&role).await.unwrap().is_empty());

        store.invalidate(&role);
        assert_eq!(store.grants_for(&role).await.unwrap().len(), 1);
    }
}
