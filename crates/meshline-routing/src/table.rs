//! Routing rule table
//!
//! The [`RuleTable`] allocates route IDs and stores the rules the route
//! establishment flow produces. Route groups only read rules, and release
//! the entries of their forward rules when they close.
//!
//! Rules carry a keep-alive. A rule that sees no activity for longer than its
//! keep-alive is expired and removed by [`MemoryRuleTable::collect_expired`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use meshline_core::{RouteId, Rule, RoutingError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{RuleTableError, RuleTableResult};

/// Storage of routing rules keyed by local route ID
pub trait RuleTable: Send + Sync {
    /// Reserve `n` fresh route IDs
    ///
    /// Reserved IDs are not handed out again until they are deleted.
    fn reserve_keys(&self, n: usize) -> RuleTableResult<Vec<RouteId>>;

    /// Save a rule under its key route ID, which must have been reserved
    fn save_rule(&self, rule: Rule) -> RuleTableResult<()>;

    /// Look up a rule
    fn rule(&self, id: RouteId) -> RuleTableResult<Rule>;

    /// Delete rules and release their reservations. Unknown IDs are ignored.
    fn del_rules(&self, ids: &[RouteId]);

    /// All stored rules
    fn all_rules(&self) -> Vec<Rule>;

    /// Number of stored rules
    fn count(&self) -> usize;
}

/// Configuration for [`MemoryRuleTable`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTableConfig {
    /// How often the background collector looks for expired rules
    pub gc_interval: Duration,
}

impl Default for RuleTableConfig {
    fn default() -> Self {
        Self {
            gc_interval: Duration::from_secs(5),
        }
    }
}

/// A stored rule with its last activity
#[derive(Debug, Clone)]
struct RuleEntry {
    rule: Rule,
    last_activity: Instant,
}

/// In-memory rule table
pub struct MemoryRuleTable {
    rules: DashMap<RouteId, RuleEntry>,
    reserved: DashSet<RouteId>,
    /// Next route ID to hand out. Zero is never issued.
    next_id: AtomicU32,
    config: RuleTableConfig,
}

impl MemoryRuleTable {
    pub fn new(config: RuleTableConfig) -> Self {
        Self {
            rules: DashMap::new(),
            reserved: DashSet::new(),
            next_id: AtomicU32::new(1),
            config,
        }
    }

    pub fn config(&self) -> &RuleTableConfig {
        &self.config
    }

    /// Record activity on a rule, postponing its expiry
    ///
    /// Returns `false` if no rule is stored under `id`.
    pub fn touch(&self, id: RouteId) -> bool {
        match self.rules.get_mut(&id) {
            Some(mut entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove every rule idle for longer than its keep-alive as of `now`
    ///
    /// Returns the route IDs that were removed.
    pub fn collect_expired(&self, now: Instant) -> Vec<RouteId> {
        let mut expired = Vec::new();

        self.rules.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_activity);
            if idle > entry.rule.keep_alive() {
                expired.push(*id);
                false
            } else {
                true
            }
        });

        for id in &expired {
            self.reserved.remove(id);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Collected expired rules");
        }

        expired
    }

    /// Spawn a task collecting expired rules every `gc_interval`
    pub fn spawn_gc(self: &Arc<Self>) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(table.config.gc_interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                table.collect_expired(Instant::now());
            }
        })
    }

    /// Export all rules as postcard bytes
    pub fn snapshot(&self) -> RuleTableResult<Vec<u8>> {
        let rules = self.all_rules();
        postcard::to_allocvec(&rules).map_err(|e| RuleTableError::Serialization(e.to_string()))
    }

    /// Import rules exported by [`snapshot`](Self::snapshot)
    ///
    /// Imported rules count as active now. Later reservations never collide
    /// with imported keys. Returns the number of imported rules.
    pub fn restore(&self, bytes: &[u8]) -> RuleTableResult<usize> {
        let rules: Vec<Rule> =
            postcard::from_bytes(bytes).map_err(|e| RuleTableError::Deserialization(e.to_string()))?;

        let now = Instant::now();
        let mut max_id = 0;
        for rule in &rules {
            let id = rule.key_route_id();
            if id.0 == 0 {
                return Err(RoutingError::InvalidRule("route id 0 is reserved".to_string()).into());
            }
            max_id = max_id.max(id.0);
            self.reserved.insert(id);
            self.rules.insert(
                id,
                RuleEntry {
                    rule: *rule,
                    last_activity: now,
                },
            );
        }

        if let Some(next) = max_id.checked_add(1) {
            self.next_id.fetch_max(next, Ordering::AcqRel);
        }

        debug!(count = rules.len(), "Restored rules from snapshot");
        Ok(rules.len())
    }
}

impl Default for MemoryRuleTable {
    fn default() -> Self {
        Self::new(RuleTableConfig::default())
    }
}

impl RuleTable for MemoryRuleTable {
    fn reserve_keys(&self, n: usize) -> RuleTableResult<Vec<RouteId>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let count = u32::try_from(n).map_err(|_| RoutingError::NoAvailableKeys)?;
        let start = self
            .next_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
                next.checked_add(count)
            })
            .map_err(|_| RoutingError::NoAvailableKeys)?;

        let ids: Vec<RouteId> = (start..start + count).map(RouteId).collect();
        for id in &ids {
            self.reserved.insert(*id);
        }

        trace!(first = start, count, "Reserved route ids");
        Ok(ids)
    }

    fn save_rule(&self, rule: Rule) -> RuleTableResult<()> {
        let id = rule.key_route_id();
        if id.0 == 0 {
            return Err(RoutingError::InvalidRule("route id 0 is reserved".to_string()).into());
        }
        if !self.reserved.contains(&id) {
            return Err(RoutingError::NotReserved(id.0).into());
        }

        self.rules.insert(
            id,
            RuleEntry {
                rule,
                last_activity: Instant::now(),
            },
        );

        trace!(route_id = %id, kind = ?rule.kind(), "Saved rule");
        Ok(())
    }

    fn rule(&self, id: RouteId) -> RuleTableResult<Rule> {
        self.rules
            .get(&id)
            .map(|entry| entry.rule)
            .ok_or_else(|| RoutingError::RuleNotFound(id.0).into())
    }

    fn del_rules(&self, ids: &[RouteId]) {
        for id in ids {
            self.rules.remove(id);
            self.reserved.remove(id);
        }

        trace!(count = ids.len(), "Deleted rules");
    }

    fn all_rules(&self) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self.rules.iter().map(|entry| entry.rule).collect();
        rules.sort_by_key(|rule| rule.key_route_id());
        rules
    }

    fn count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshline_core::{ConsumeRule, ForwardRule, KeyPair, Port, RouteDescriptor, TransportId};

    fn make_desc() -> RouteDescriptor {
        let keys = KeyPair::generate_many(2);
        RouteDescriptor::new(keys[0].public_key(), keys[1].public_key(), Port(1), Port(2))
    }

    fn make_forward(id: RouteId, keep_alive: Duration) -> Rule {
        ForwardRule::new(keep_alive, id, RouteId(900), TransportId::new_random(), make_desc()).into()
    }

    #[test]
    fn test_reserve_keys_unique_and_nonzero() {
        let table = MemoryRuleTable::default();

        let first = table.reserve_keys(3).unwrap();
        let second = table.reserve_keys(2).unwrap();

        assert_eq!(first, vec![RouteId(1), RouteId(2), RouteId(3)]);
        assert_eq!(second, vec![RouteId(4), RouteId(5)]);
        assert!(table.reserve_keys(0).unwrap().is_empty());
    }

    #[test]
    fn test_reserve_keys_exhausted() {
        let table = MemoryRuleTable::default();
        table.next_id.store(u32::MAX - 1, Ordering::Release);

        let err = table.reserve_keys(2).unwrap_err();
        assert!(matches!(
            err,
            RuleTableError::Core(RoutingError::NoAvailableKeys)
        ));
        assert_eq!(table.reserve_keys(1).unwrap(), vec![RouteId(u32::MAX - 1)]);
    }

    #[test]
    fn test_save_and_get() {
        let table = MemoryRuleTable::default();
        let ids = table.reserve_keys(2).unwrap();

        let fwd = make_forward(ids[0], Duration::from_secs(30));
        let cnsm: Rule = ConsumeRule::new(Duration::from_secs(30), ids[1], make_desc()).into();
        table.save_rule(fwd).unwrap();
        table.save_rule(cnsm).unwrap();

        assert_eq!(table.rule(ids[0]).unwrap(), fwd);
        assert_eq!(table.rule(ids[1]).unwrap(), cnsm);
        assert_eq!(table.count(), 2);
        assert_eq!(table.all_rules(), vec![fwd, cnsm]);
    }

    #[test]
    fn test_save_requires_reservation() {
        let table = MemoryRuleTable::default();

        let err = table
            .save_rule(make_forward(RouteId(42), Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, RuleTableError::Core(RoutingError::NotReserved(42))));

        let err = table
            .save_rule(make_forward(RouteId(0), Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, RuleTableError::Core(RoutingError::InvalidRule(_))));
    }

    #[test]
    fn test_del_rules() {
        let table = MemoryRuleTable::default();
        let ids = table.reserve_keys(2).unwrap();
        table.save_rule(make_forward(ids[0], Duration::from_secs(1))).unwrap();

        table.del_rules(&[ids[0], ids[1], RouteId(77)]);

        assert_eq!(table.count(), 0);
        assert!(matches!(
            table.rule(ids[0]),
            Err(RuleTableError::Core(RoutingError::RuleNotFound(_)))
        ));
        // Reservation was released with the rule.
        assert!(table.save_rule(make_forward(ids[1], Duration::from_secs(1))).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_expired() {
        let table = MemoryRuleTable::default();
        let ids = table.reserve_keys(2).unwrap();
        table.save_rule(make_forward(ids[0], Duration::from_secs(10))).unwrap();
        table.save_rule(make_forward(ids[1], Duration::from_secs(60))).unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(table.touch(ids[0]));
        assert!(!table.touch(RouteId(99)));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(table.collect_expired(Instant::now()).is_empty());

        tokio::time::advance(Duration::from_secs(50)).await;
        let expired = table.collect_expired(Instant::now());
        assert_eq!(expired.len(), 2);
        assert_eq!(table.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_gc() {
        let table = Arc::new(MemoryRuleTable::new(RuleTableConfig {
            gc_interval: Duration::from_secs(1),
        }));
        let ids = table.reserve_keys(1).unwrap();
        table.save_rule(make_forward(ids[0], Duration::from_secs(2))).unwrap();

        let gc = table.spawn_gc();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(table.count(), 0);
        gc.abort();
    }

    #[test]
    fn test_snapshot_restore() {
        let table = MemoryRuleTable::default();
        let ids = table.reserve_keys(3).unwrap();
        for id in &ids {
            table.save_rule(make_forward(*id, Duration::from_secs(5))).unwrap();
        }

        let bytes = table.snapshot().unwrap();

        let restored = MemoryRuleTable::default();
        assert_eq!(restored.restore(&bytes).unwrap(), 3);
        assert_eq!(restored.all_rules(), table.all_rules());

        // Fresh keys continue after the imported ones.
        assert_eq!(restored.reserve_keys(1).unwrap(), vec![RouteId(4)]);
    }

    #[test]
    fn test_restore_rejects_garbage() {
        let table = MemoryRuleTable::default();
        let err = table.restore(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, RuleTableError::Deserialization(_)));
    }
}
