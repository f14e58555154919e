use std::fmt;

use crate::timestamp::TimestampRange;

/// Unique ID for a data node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique ID for a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(u64);

impl ShardId {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique ID for a shard group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardGroupId(u64);

impl ShardGroupId {
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShardGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A replica placement of a shard on a data node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardOwner {
    /// The node holding this replica.
    pub node_id: NodeId,
}

/// A shard and the set of nodes owning a replica of it.
///
/// `owners` is never empty; the replication factor of the shard is the number
/// of owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub id: ShardId,
    pub owners: Vec<ShardOwner>,
}

/// A time-bounded collection of shards partitioning the series-key hash space
/// for the half-open interval `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGroupInfo {
    pub id: ShardGroupId,
    pub time_range: TimestampRange,
    /// The shards of the group. Never empty.
    pub shards: Vec<ShardInfo>,
}

impl ShardGroupInfo {
    /// Returns true if the group's time interval contains `t`.
    pub fn contains(&self, t: i64) -> bool {
        self.time_range.contains(t)
    }

    /// Deterministically maps a series-key hash to exactly one of the group's
    /// shards.
    pub fn shard_for(&self, hash_id: u64) -> &ShardInfo {
        &self.shards[(hash_id % self.shards.len() as u64) as usize]
    }
}

/// A view over a set of shard groups that can answer which group covers a
/// given point in time.
///
/// Groups are sorted first according to end time, and then according to start
/// time. Therefore, if multiple groups match a point's time they are
/// preferred in this order:
///
///  - a group with the earliest end time;
///  - (assuming identical end times) the group with the earliest start time.
#[derive(Debug, Clone, Default)]
pub struct ShardGroupList(Vec<ShardGroupInfo>);

impl ShardGroupList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if any group in the list contains `t`.
    pub fn covers(&self, t: i64) -> bool {
        self.shard_group_at(t).is_some()
    }

    /// Find the group that should contain a point at time `t`, applying the
    /// preference order above.
    pub fn shard_group_at(&self, t: i64) -> Option<&ShardGroupInfo> {
        // First index whose end time is strictly after t; the sort order makes
        // this the preferred candidate.
        let idx = self.0.partition_point(|g| g.time_range.end() <= t);
        self.0.get(idx).filter(|g| g.time_range.start() <= t)
    }

    /// Insert `group`, re-establishing the total order.
    pub fn append(mut self, group: ShardGroupInfo) -> Self {
        self.0.push(group);
        self.0
            .sort_by_key(|g| (g.time_range.end(), g.time_range.start()));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: u64, start: i64, end: i64) -> ShardGroupInfo {
        ShardGroupInfo {
            id: ShardGroupId::new(id),
            time_range: TimestampRange::new(start, end),
            shards: vec![ShardInfo {
                id: ShardId::new(id * 100),
                owners: vec![ShardOwner {
                    node_id: NodeId::new(1),
                }],
            }],
        }
    }

    #[test]
    fn test_empty_list_covers_nothing() {
        let list = ShardGroupList::new();
        assert!(!list.covers(0));
        assert!(list.shard_group_at(42).is_none());
    }

    #[test]
    fn test_covers_half_open_interval() {
        let list = ShardGroupList::new().append(group(1, 100, 200));

        assert!(!list.covers(99));
        assert!(list.covers(100));
        assert!(list.covers(199));
        assert!(!list.covers(200));
    }

    #[test]
    fn test_prefers_earliest_end_time() {
        // Two overlapping groups both containing t=150.
        let list = ShardGroupList::new()
            .append(group(2, 0, 1000))
            .append(group(1, 100, 200));

        let got = list.shard_group_at(150).unwrap();
        assert_eq!(got.id, ShardGroupId::new(1));

        // Past the narrow group's end only the wide group matches.
        let got = list.shard_group_at(500).unwrap();
        assert_eq!(got.id, ShardGroupId::new(2));
    }

    #[test]
    fn test_identical_end_times_prefer_earliest_start() {
        let list = ShardGroupList::new()
            .append(group(1, 100, 200))
            .append(group(2, 50, 200));

        let got = list.shard_group_at(150).unwrap();
        assert_eq!(got.id, ShardGroupId::new(2));
    }

    #[test]
    fn test_append_maintains_order() {
        // Append out of order and verify lookups resolve as if sorted.
        let list = ShardGroupList::new()
            .append(group(3, 200, 300))
            .append(group(1, 0, 100))
            .append(group(2, 100, 200));

        assert_eq!(list.len(), 3);
        assert_eq!(list.shard_group_at(0).unwrap().id, ShardGroupId::new(1));
        assert_eq!(list.shard_group_at(150).unwrap().id, ShardGroupId::new(2));
        assert_eq!(list.shard_group_at(299).unwrap().id, ShardGroupId::new(3));
        assert!(list.shard_group_at(300).is_none());
    }

    #[test]
    fn test_shard_for_is_deterministic() {
        let g = ShardGroupInfo {
            id: ShardGroupId::new(1),
            time_range: TimestampRange::new(0, 100),
            shards: (0..4)
                .map(|i| ShardInfo {
                    id: ShardId::new(i),
                    owners: vec![ShardOwner {
                        node_id: NodeId::new(1),
                    }],
                })
                .collect(),
        };

        assert_eq!(g.shard_for(0).id, ShardId::new(0));
        assert_eq!(g.shard_for(5).id, ShardId::new(1));
        assert_eq!(g.shard_for(7).id, ShardId::new(3));
        // Same hash always lands on the same shard.
        assert_eq!(g.shard_for(7).id, g.shard_for(7).id);
    }
}
