// Pool Directory - poolId -> (pool contract id, owning party)
// Copy-on-write map behind ArcSwap: readers take O(1) immutable snapshots, writers
// publish a new map with compare-and-swap. Last write wins per pool id.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::ledger::{LedgerError, LedgerGateway, TemplateKind};
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntry {
    pub pool_id: String,
    pub pool_contract_id: String,
    pub party: String,
    pub updated_at: DateTime<Utc>,
}

/// Immutable point-in-time view of the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDirectorySnapshot {
    #[serde(rename = "mapping")]
    entries: HashMap<String, PoolEntry>,
    last_updated: Option<DateTime<Utc>>,
}

impl PoolDirectorySnapshot {
    pub fn get(&self, pool_id: &str) -> Option<&PoolEntry> {
        self.entries.get(pool_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent update visible in this snapshot.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    /// Distinct non-blank parties owning pools, sorted.
    pub fn parties(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|e| e.party.as_str())
            .filter(|p| !p.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Process-wide pool registry. Construct once at startup and share behind an `Arc`.
pub struct PoolDirectory {
    state: ArcSwap<PoolDirectorySnapshot>,
}

impl Default for PoolDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolDirectory {
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(PoolDirectorySnapshot::default()),
        }
    }

    /// Upserts a pool. Blank `pool_id` or `pool_contract_id` is ignored.
    /// Returns whether the update was applied.
    pub fn update(&self, pool_id: &str, pool_contract_id: &str, party: &str) -> bool {
        if pool_id.trim().is_empty() || pool_contract_id.trim().is_empty() {
            metrics::increment_pool_directory_update("ignored");
            debug!(pool_id, pool_contract_id, "Ignoring pool directory update with blank id");
            return false;
        }

        let now = Utc::now();
        let entry = PoolEntry {
            pool_id: pool_id.to_string(),
            pool_contract_id: pool_contract_id.to_string(),
            party: party.to_string(),
            updated_at: now,
        };

        self.state.rcu(|current| {
            let mut next = PoolDirectorySnapshot::clone(current);
            next.entries.insert(entry.pool_id.clone(), entry.clone());
            // Never move backwards, even if the wall clock does.
            next.last_updated = Some(current.last_updated.map_or(now, |t| t.max(now)));
            next
        });

        metrics::increment_pool_directory_update("applied");
        metrics::set_pool_directory_size(self.len() as f64);
        true
    }

    pub fn snapshot(&self) -> Arc<PoolDirectorySnapshot> {
        self.state.load_full()
    }

    pub fn get(&self, pool_id: &str) -> Option<PoolEntry> {
        self.state.load().get(pool_id).cloned()
    }

    /// `None` until the first applied update.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.load().last_updated
    }

    /// True if never updated, or if the last update is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.last_updated() {
            None => true,
            Some(t) => Utc::now()
                .signed_duration_since(t)
                .to_std()
                .map(|age| age > max_age)
                .unwrap_or(false),
        }
    }

    pub fn len(&self) -> usize {
        self.state.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.load().is_empty()
    }

    /// Registers every active pool contract on the ledger. Returns the number applied.
    pub async fn refresh_from_ledger(&self, ledger: &dyn LedgerGateway) -> Result<usize, LedgerError> {
        let contracts = ledger.query_active(TemplateKind::Pool).await?;
        let applied = contracts
            .iter()
            .filter_map(|c| c.as_pool())
            .filter(|p| self.update(&p.pool_id, p.contract_id.as_str(), &p.operator))
            .count();

        info!(applied, total = self.len(), "Pool directory refreshed from ledger");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_ids_are_ignored() {
        let dir = PoolDirectory::new();
        assert!(!dir.update("", "cid", "p"));
        assert!(!dir.update("id", "", "p"));
        assert!(!dir.update("  ", "cid", "p"));

        let snap = dir.snapshot();
        assert!(snap.is_empty());
        assert!(dir.last_updated().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = PoolDirectory::new();
        dir.update("p1", "c1", "partyA");
        dir.update("p1", "c2", "partyB");

        let snap = dir.snapshot();
        let entry = snap.get("p1").unwrap();
        assert_eq!(entry.pool_contract_id, "c2");
        assert_eq!(entry.party, "partyB");
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let dir = PoolDirectory::new();
        dir.update("p1", "c1", "partyA");
        let before = dir.snapshot();

        dir.update("p2", "c2", "partyB");
        assert_eq!(before.len(), 1);
        assert!(before.get("p2").is_none());
        assert_eq!(dir.snapshot().len(), 2);
    }

    #[test]
    fn test_last_updated_is_monotonic() {
        let dir = PoolDirectory::new();
        dir.update("p1", "c1", "a");
        let first = dir.last_updated().unwrap();
        dir.update("p2", "c2", "b");
        let second = dir.last_updated().unwrap();
        assert!(second >= first);
        assert!(!dir.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn test_parties_are_distinct() {
        let dir = PoolDirectory::new();
        dir.update("p1", "c1", "op");
        dir.update("p2", "c2", "op");
        dir.update("p3", "c3", "");
        assert_eq!(dir.snapshot().parties(), vec!["op".to_string()]);
    }
}
