//! In-memory test doubles for the write-path collaborators.
//!
//! The mocks record every call they receive and can be scripted with return
//! values ahead of time; unscripted calls succeed.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use data_types::{DatabaseInfo, NodeId, Point, RetentionPolicyInfo, ShardGroupInfo, ShardId};
use parking_lot::Mutex;

use crate::{DynError, HintedHandoff, MetaClient, ShardWriter, StoreError, TsdbStore};

#[derive(Debug, Default)]
struct MetaState {
    databases: HashMap<String, DatabaseInfo>,
    retention_policies: HashMap<(String, String), RetentionPolicyInfo>,
    shard_groups: Vec<ShardGroupInfo>,
    shard_owners: HashMap<ShardId, (String, String, Vec<ShardGroupInfo>)>,
    create_shard_group_error: Option<String>,
    create_shard_group_calls: Vec<(String, String, i64)>,
}

/// A scripted in-memory [`MetaClient`].
#[derive(Debug, Default)]
pub struct MockMetaClient {
    state: Mutex<MetaState>,
}

impl MockMetaClient {
    /// Register a database.
    pub fn with_database(self, db: DatabaseInfo) -> Self {
        self.state.lock().databases.insert(db.name.clone(), db);
        self
    }

    /// Register a retention policy under `database`.
    pub fn with_retention_policy(self, database: &str, rp: RetentionPolicyInfo) -> Self {
        self.state
            .lock()
            .retention_policies
            .insert((database.to_string(), rp.name.clone()), rp);
        self
    }

    /// Register a shard group handed out by `create_shard_group` for
    /// timestamps it covers.
    pub fn with_shard_group(self, group: ShardGroupInfo) -> Self {
        self.state.lock().shard_groups.push(group);
        self
    }

    /// Register the ownership metadata returned for `shard_id`.
    pub fn with_shard_owner(
        self,
        shard_id: ShardId,
        database: &str,
        retention_policy: &str,
        groups: Vec<ShardGroupInfo>,
    ) -> Self {
        self.state.lock().shard_owners.insert(
            shard_id,
            (database.to_string(), retention_policy.to_string(), groups),
        );
        self
    }

    /// Make `create_shard_group` fail with `message`.
    pub fn with_create_shard_group_error(self, message: &str) -> Self {
        self.state.lock().create_shard_group_error = Some(message.to_string());
        self
    }

    /// The `create_shard_group` calls observed so far.
    pub fn create_shard_group_calls(&self) -> Vec<(String, String, i64)> {
        self.state.lock().create_shard_group_calls.clone()
    }
}

#[async_trait]
impl MetaClient for MockMetaClient {
    async fn database(&self, name: &str) -> Option<DatabaseInfo> {
        self.state.lock().databases.get(name).cloned()
    }

    async fn retention_policy(
        &self,
        database: &str,
        policy: &str,
    ) -> Result<Option<RetentionPolicyInfo>, DynError> {
        Ok(self
            .state
            .lock()
            .retention_policies
            .get(&(database.to_string(), policy.to_string()))
            .cloned())
    }

    async fn create_shard_group(
        &self,
        database: &str,
        policy: &str,
        timestamp: i64,
    ) -> Result<Option<ShardGroupInfo>, DynError> {
        let mut state = self.state.lock();
        state
            .create_shard_group_calls
            .push((database.to_string(), policy.to_string(), timestamp));

        if let Some(message) = &state.create_shard_group_error {
            return Err(message.clone().into());
        }
        Ok(state
            .shard_groups
            .iter()
            .find(|g| g.contains(timestamp))
            .cloned())
    }

    async fn shard_owner(
        &self,
        shard_id: ShardId,
    ) -> Option<(String, String, Vec<ShardGroupInfo>)> {
        self.state.lock().shard_owners.get(&shard_id).cloned()
    }
}

#[derive(Debug, Default)]
struct StoreState {
    writes: Vec<(ShardId, Vec<Point>)>,
    write_results: VecDeque<Result<(), StoreError>>,
    create_calls: Vec<(String, String, ShardId, bool)>,
    create_results: VecDeque<Result<(), StoreError>>,
    hang: bool,
}

/// A scripted in-memory [`TsdbStore`].
#[derive(Debug, Default)]
pub struct MockTsdbStore {
    state: Mutex<StoreState>,
}

impl MockTsdbStore {
    /// Script the results of the next `write_to_shard` calls; once the queue
    /// drains, calls succeed.
    pub fn with_write_results(
        self,
        results: impl IntoIterator<Item = Result<(), StoreError>>,
    ) -> Self {
        self.state.lock().write_results.extend(results);
        self
    }

    /// Script the results of the next `create_shard` calls.
    pub fn with_create_results(
        self,
        results: impl IntoIterator<Item = Result<(), StoreError>>,
    ) -> Self {
        self.state.lock().create_results.extend(results);
        self
    }

    /// Make every `write_to_shard` call block forever.
    pub fn with_hang(self) -> Self {
        self.state.lock().hang = true;
        self
    }

    /// The `write_to_shard` calls observed so far.
    pub fn writes(&self) -> Vec<(ShardId, Vec<Point>)> {
        self.state.lock().writes.clone()
    }

    /// The `create_shard` calls observed so far.
    pub fn create_calls(&self) -> Vec<(String, String, ShardId, bool)> {
        self.state.lock().create_calls.clone()
    }
}

#[async_trait]
impl TsdbStore for MockTsdbStore {
    async fn create_shard(
        &self,
        database: &str,
        retention_policy: &str,
        shard_id: ShardId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.create_calls.push((
            database.to_string(),
            retention_policy.to_string(),
            shard_id,
            enabled,
        ));
        state.create_results.pop_front().unwrap_or(Ok(()))
    }

    async fn write_to_shard(&self, shard_id: ShardId, points: &[Point]) -> Result<(), StoreError> {
        let result = {
            let mut state = self.state.lock();
            state.writes.push((shard_id, points.to_vec()));
            if state.hang {
                None
            } else {
                Some(state.write_results.pop_front().unwrap_or(Ok(())))
            }
        };

        match result {
            Some(result) => result,
            None => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}

#[derive(Debug, Default)]
struct ShardWriterState {
    calls: Vec<(ShardId, NodeId, Vec<Point>)>,
    results: HashMap<NodeId, VecDeque<Result<(), String>>>,
    hang: HashSet<NodeId>,
}

/// A scripted in-memory [`ShardWriter`].
#[derive(Debug, Default)]
pub struct MockShardWriter {
    state: Mutex<ShardWriterState>,
}

impl MockShardWriter {
    /// Script the result of the next `write_shard` call addressed to `node`;
    /// unscripted calls succeed.
    pub fn with_result(self, node: NodeId, result: Result<(), &str>) -> Self {
        self.state
            .lock()
            .results
            .entry(node)
            .or_default()
            .push_back(result.map_err(|e| e.to_string()));
        self
    }

    /// Make `write_shard` calls addressed to `node` block forever.
    pub fn with_hang(self, node: NodeId) -> Self {
        self.state.lock().hang.insert(node);
        self
    }

    /// The `write_shard` calls observed so far.
    pub fn calls(&self) -> Vec<(ShardId, NodeId, Vec<Point>)> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ShardWriter for MockShardWriter {
    async fn write_shard(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), DynError> {
        let result = {
            let mut state = self.state.lock();
            state.calls.push((shard_id, owner_id, points.to_vec()));
            if state.hang.contains(&owner_id) {
                None
            } else {
                Some(
                    state
                        .results
                        .get_mut(&owner_id)
                        .and_then(|q| q.pop_front())
                        .unwrap_or(Ok(())),
                )
            }
        };

        match result {
            Some(result) => result.map_err(DynError::from),
            None => {
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }
}

#[derive(Debug, Default)]
struct HandoffState {
    calls: Vec<(ShardId, NodeId, Vec<Point>)>,
    error: Option<String>,
}

/// A scripted in-memory [`HintedHandoff`] queue.
#[derive(Debug, Default)]
pub struct MockHintedHandoff {
    state: Mutex<HandoffState>,
}

impl MockHintedHandoff {
    /// Make every enqueue fail with `message`.
    pub fn with_error(self, message: &str) -> Self {
        self.state.lock().error = Some(message.to_string());
        self
    }

    /// The enqueues observed so far.
    pub fn calls(&self) -> Vec<(ShardId, NodeId, Vec<Point>)> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl HintedHandoff for MockHintedHandoff {
    async fn write_shard(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), DynError> {
        let mut state = self.state.lock();
        state.calls.push((shard_id, owner_id, points.to_vec()));
        match &state.error {
            Some(message) => Err(message.clone().into()),
            None => Ok(()),
        }
    }
}
