//! The replicated points writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clock::{SystemProvider, TimeProvider};
use data_types::{
    ConsistencyLevel, NodeId, Point, ShardGroupList, ShardId, ShardInfo, ShardOwner, MIN_NANO_TIME,
};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::stats::{WriteStats, WriteStatsSnapshot};
use crate::{DynError, HintedHandoff, MetaClient, ShardWriter, TsdbStore};

/// The default per-shard replicated write timeout.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`PointsWriter::write_points`].
#[derive(Debug, Error)]
pub enum WriteError {
    /// The named database does not exist.
    #[error("database not found: {db}")]
    DatabaseNotFound {
        /// The database the write addressed.
        db: String,
    },

    /// The named retention policy does not exist.
    #[error("retention policy not found: {rp}")]
    RetentionPolicyNotFound {
        /// The retention policy the write addressed.
        rp: String,
    },

    /// The meta client failed while resolving or creating write targets.
    #[error(transparent)]
    Meta(DynError),

    /// The meta client reported success but handed back no shard group.
    #[error("no shard group returned for write")]
    NoShardGroup,

    /// The replicated write did not reach the requested consistency level
    /// before the write timeout elapsed.
    #[error("timeout")]
    Timeout,

    /// Some, but not enough, replicas acknowledged the write.
    #[error("partial write")]
    PartialWrite,

    /// No replica acknowledged the write.
    #[error("write failed")]
    WriteFailed,

    /// No replica acknowledged the write; `source` is the first failure
    /// observed.
    #[error("write failed: {source}")]
    Failed {
        /// The first per-owner failure.
        source: DynError,
    },
}

/// A request to write `points` produced by statement execution. Always
/// applied at [`ConsistencyLevel::One`].
#[derive(Debug, Clone, PartialEq)]
pub struct IntoWriteRequest {
    /// The destination database.
    pub database: String,
    /// The destination retention policy; empty resolves to the database
    /// default.
    pub retention_policy: String,
    /// The points to write.
    pub points: Vec<Point>,
}

/// The result of mapping one write batch to its destination shards.
///
/// Every occupied bucket has a corresponding [`ShardInfo`] entry.
#[derive(Debug, Default)]
pub struct ShardMapping {
    batch_len: usize,
    points: HashMap<ShardId, Vec<Point>>,
    shards: HashMap<ShardId, ShardInfo>,
}

impl ShardMapping {
    fn new(batch_len: usize) -> Self {
        Self {
            batch_len,
            points: HashMap::new(),
            shards: HashMap::new(),
        }
    }

    /// Append `point` to the bucket of `shard`.
    ///
    /// Buckets are pre-sized to the full batch length as a capacity hint.
    pub fn map_point(&mut self, shard: &ShardInfo, point: Point) {
        let bucket = self
            .points
            .entry(shard.id)
            .or_insert_with(|| Vec::with_capacity(self.batch_len));
        bucket.push(point);

        if !self.shards.contains_key(&shard.id) {
            self.shards.insert(shard.id, shard.clone());
        }
    }

    /// The number of occupied shard buckets.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when no point mapped to any shard.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Consume the mapping, yielding each shard and its bucket of points.
    pub fn into_buckets(self) -> Vec<(ShardInfo, Vec<Point>)> {
        let Self {
            mut shards, points, ..
        } = self;

        points
            .into_iter()
            .map(|(shard_id, points)| {
                let shard = shards
                    .remove(&shard_id)
                    .expect("every mapped bucket has shard metadata");
                (shard, points)
            })
            .collect()
    }
}

/// Handles writes across multiple local and remote data nodes.
///
/// Cheap to clone; clones share the closing signal and the statistics.
#[derive(Debug, Clone)]
pub struct PointsWriter {
    node_id: NodeId,
    write_timeout: Duration,
    closing: Arc<RwLock<CancellationToken>>,

    meta_client: Arc<dyn MetaClient>,
    tsdb_store: Arc<dyn TsdbStore>,
    shard_writer: Arc<dyn ShardWriter>,
    hinted_handoff: Arc<dyn HintedHandoff>,

    time_provider: Arc<dyn TimeProvider>,
    stats: Arc<WriteStats>,
}

impl PointsWriter {
    /// Create a writer for the node identified by `node_id`.
    pub fn new(
        node_id: NodeId,
        meta_client: Arc<dyn MetaClient>,
        tsdb_store: Arc<dyn TsdbStore>,
        shard_writer: Arc<dyn ShardWriter>,
        hinted_handoff: Arc<dyn HintedHandoff>,
    ) -> Self {
        Self {
            node_id,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            closing: Arc::new(RwLock::new(CancellationToken::new())),
            meta_client,
            tsdb_store,
            shard_writer,
            hinted_handoff,
            time_provider: Arc::new(SystemProvider::new()),
            stats: Arc::new(WriteStats::default()),
        }
    }

    /// Override the per-shard write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the clock used to derive the retention window.
    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    /// Reset the closing signal so the writer accepts writes again after
    /// [`close`](Self::close).
    pub fn open(&self) {
        *self.closing.write() = CancellationToken::new();
    }

    /// Signal shutdown. Writes in flight and all later writes fail with
    /// [`WriteError::WriteFailed`] until [`open`](Self::open) is called.
    /// Idempotent.
    pub fn close(&self) {
        self.closing.read().cancel();
    }

    /// A snapshot of this writer's statistics.
    pub fn stats(&self) -> WriteStatsSnapshot {
        self.stats.snapshot()
    }

    /// Write a batch across the local and remote data nodes owning its
    /// shards, honouring `consistency`.
    ///
    /// A `retention_policy` of `None` (or an empty name) resolves to the
    /// database's default policy. The first per-shard failure fails the
    /// whole batch.
    pub async fn write_points(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        consistency: ConsistencyLevel,
        points: Vec<Point>,
    ) -> Result<(), WriteError> {
        self.stats.inc_write_req();
        self.stats.add_point_write_req(points.len() as u64);

        let retention_policy = match retention_policy {
            Some(rp) if !rp.is_empty() => rp.to_string(),
            _ => {
                self.meta_client
                    .database(database)
                    .await
                    .ok_or_else(|| WriteError::DatabaseNotFound {
                        db: database.to_string(),
                    })?
                    .default_retention_policy
            }
        };

        let mapping = self
            .map_shards(database, &retention_policy, points)
            .await?;

        // One worker per occupied shard bucket. The channel is sized to the
        // bucket count so a worker can always deliver its result, even when
        // this call has already returned.
        let buckets = mapping.into_buckets();
        let n_buckets = buckets.len();
        let (tx, mut rx) = mpsc::channel(n_buckets.max(1));
        for (shard, shard_points) in buckets {
            let writer = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let res = writer.write_to_shard(shard, consistency, shard_points).await;
                // The receiver is gone after an early return.
                let _ = tx.send(res).await;
            });
        }
        drop(tx);

        let closing = self.closing.read().clone();
        for _ in 0..n_buckets {
            tokio::select! {
                _ = closing.cancelled() => return Err(WriteError::WriteFailed),
                res = rx.recv() => match res {
                    Some(res) => res?,
                    None => break,
                },
            }
        }

        Ok(())
    }

    /// Write a statement-produced batch at [`ConsistencyLevel::One`].
    pub async fn write_points_into(&self, req: IntoWriteRequest) -> Result<(), WriteError> {
        let IntoWriteRequest {
            database,
            retention_policy,
            points,
        } = req;

        let retention_policy =
            (!retention_policy.is_empty()).then_some(retention_policy.as_str());
        self.write_points(&database, retention_policy, ConsistencyLevel::One, points)
            .await
    }

    /// Map the points of a batch to the shards that must receive them,
    /// creating shard groups where none covers a point's timestamp. Points
    /// older than the retention window are dropped.
    async fn map_shards(
        &self,
        database: &str,
        retention_policy: &str,
        points: Vec<Point>,
    ) -> Result<ShardMapping, WriteError> {
        let rp = self
            .meta_client
            .retention_policy(database, retention_policy)
            .await
            .map_err(WriteError::Meta)?
            .ok_or_else(|| WriteError::RetentionPolicyNotFound {
                rp: retention_policy.to_string(),
            })?;

        let min_time = if rp.is_infinite() {
            MIN_NANO_TIME
        } else {
            self.time_provider
                .now_nanos()
                .saturating_sub(rp.duration.as_nanos() as i64)
        };

        // Collect the shard groups required to cover every retained point.
        let mut list = ShardGroupList::new();
        for p in &points {
            // Either the point is outside the scope of the retention policy,
            // or a suitable shard group is already known.
            if p.time() < min_time || list.covers(p.time()) {
                continue;
            }

            let group = self
                .meta_client
                .create_shard_group(database, retention_policy, p.time())
                .await
                .map_err(WriteError::Meta)?
                .ok_or(WriteError::NoShardGroup)?;
            list = list.append(group);
        }

        let mut mapping = ShardMapping::new(points.len());
        let mut dropped = 0u64;
        for p in points {
            let Some(group) = list.shard_group_at(p.time()) else {
                // No shard group was created because the point is outside
                // the retention window.
                dropped += 1;
                continue;
            };

            let shard = group.shard_for(p.hash_id());
            mapping.map_point(shard, p);
        }

        if dropped > 0 {
            self.stats.add_dropped(dropped);
        }
        Ok(mapping)
    }

    /// Fan a bucket of points out to every owner of `shard`, returning once
    /// the consistency level is satisfied, the write timeout fires, or every
    /// owner has reported.
    async fn write_to_shard(
        &self,
        shard: ShardInfo,
        consistency: ConsistencyLevel,
        points: Vec<Point>,
    ) -> Result<(), WriteError> {
        let n_owners = shard.owners.len();
        let required = consistency.required_acks(n_owners);

        // Buffered to the owner count: workers abandoned by a timeout or an
        // early success must still complete their sends without blocking.
        let (tx, mut rx) = mpsc::channel::<(ShardOwner, Result<(), DynError>)>(n_owners.max(1));
        let points = Arc::new(points);
        for owner in shard.owners.iter().copied() {
            let writer = self.clone();
            let points = Arc::clone(&points);
            let tx = tx.clone();
            let shard_id = shard.id;
            tokio::spawn(async move {
                let res = writer
                    .write_to_owner(shard_id, owner, consistency, &points)
                    .await;
                let _ = tx.send((owner, res)).await;
            });
        }
        drop(tx);

        let closing = self.closing.read().clone();
        let timeout = tokio::time::sleep(self.write_timeout);
        tokio::pin!(timeout);

        let mut wrote = 0;
        let mut write_error: Option<DynError> = None;
        for _ in 0..n_owners {
            tokio::select! {
                _ = closing.cancelled() => return Err(WriteError::WriteFailed),
                _ = &mut timeout => {
                    self.stats.inc_timeout();
                    return Err(WriteError::Timeout);
                }
                res = rx.recv() => {
                    let Some((owner, res)) = res else { break };
                    match res {
                        Err(e) => {
                            error!(
                                shard_id = %shard.id,
                                owner = %owner.node_id,
                                error = %e,
                                "write failed for shard",
                            );
                            // Keep the first error to hand back to the caller.
                            if write_error.is_none() {
                                write_error = Some(e);
                            }
                        }
                        Ok(()) => {
                            wrote += 1;
                            // The requested consistency level is met; any
                            // stragglers are discarded.
                            if wrote >= required {
                                self.stats.inc_ok();
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }

        if wrote > 0 {
            self.stats.inc_partial();
            return Err(WriteError::PartialWrite);
        }

        self.stats.inc_err();
        match write_error {
            Some(source) => Err(WriteError::Failed { source }),
            None => Err(WriteError::WriteFailed),
        }
    }

    /// Write one owner's replica: directly into the local store when this
    /// node owns it, through the shard writer otherwise, falling back to
    /// hinted handoff for retryable remote failures.
    async fn write_to_owner(
        &self,
        shard_id: ShardId,
        owner: ShardOwner,
        consistency: ConsistencyLevel,
        points: &[Point],
    ) -> Result<(), DynError> {
        if owner.node_id == self.node_id {
            self.stats.add_local(points.len() as u64);
            return self
                .tsdb_store
                .write_to_shard(shard_id, points)
                .await
                .map_err(|e| {
                    warn!(%shard_id, error = %e, "failed to write points to shard locally");
                    DynError::from(e)
                });
        }

        self.stats.add_remote(points.len() as u64);
        match self
            .shard_writer
            .write_shard(shard_id, owner.node_id, points)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_retryable(&e) => {
                // The remote write failed, so queue it via hinted handoff.
                warn!(
                    %shard_id,
                    owner = %owner.node_id,
                    error = %e,
                    "queueing remote write via hinted handoff",
                );
                self.stats.add_hinted(points.len() as u64);
                match self
                    .hinted_handoff
                    .write_shard(shard_id, owner.node_id, points)
                    .await
                {
                    Err(hh_err) => Err(hh_err),
                    // A durable enqueue counts as a write at ANY.
                    Ok(()) if consistency == ConsistencyLevel::Any => Ok(()),
                    // At stronger levels the enqueue is fire-and-forget and
                    // the original failure stands.
                    Ok(()) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

/// Whether a remote write failure may be retried later via hinted handoff.
///
/// Field type conflicts are deterministic schema violations and must never be
/// queued for retry.
fn is_retryable(err: &DynError) -> bool {
    !err.to_string().contains("field type conflict")
}
