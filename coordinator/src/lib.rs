//! Write coordination across the cluster.
//!
//! This crate contains the [`PointsWriter`]: it maps a batch of points to the
//! shards that must receive them, fans each shard's bucket out to every
//! replica owner in parallel, and classifies the outcome under the requested
//! consistency level.
//!
//! The collaborators the writer depends on (metadata store, local TSDB
//! engine, peer shard writer, hinted-handoff queue) are expressed as narrow
//! trait contracts so concrete adapters can be injected; in-memory test
//! doubles live in [`mock`].

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use std::fmt::Debug;

use async_trait::async_trait;
use data_types::{DatabaseInfo, NodeId, Point, RetentionPolicyInfo, ShardGroupInfo, ShardId};
use thiserror::Error;

pub mod mock;
pub mod points_writer;
pub mod stats;

pub use points_writer::{
    IntoWriteRequest, PointsWriter, ShardMapping, WriteError, DEFAULT_WRITE_TIMEOUT,
};
pub use stats::{WriteStats, WriteStatsSnapshot};

/// An opaque error produced by an injected collaborator.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by a [`TsdbStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shard has not been created on this node.
    #[error("shard {shard_id} not found")]
    ShardNotFound {
        /// The shard the operation addressed.
        shard_id: ShardId,
    },

    /// Any other storage failure.
    #[error(transparent)]
    Other(#[from] DynError),
}

/// The subset of the cluster metadata store the write path depends on.
#[async_trait]
pub trait MetaClient: Debug + Send + Sync {
    /// Look a database up by name.
    async fn database(&self, name: &str) -> Option<DatabaseInfo>;

    /// Look a retention policy up by database and name.
    async fn retention_policy(
        &self,
        database: &str,
        policy: &str,
    ) -> Result<Option<RetentionPolicyInfo>, DynError>;

    /// Return the shard group covering `timestamp`, creating it if it does
    /// not exist yet.
    async fn create_shard_group(
        &self,
        database: &str,
        policy: &str,
        timestamp: i64,
    ) -> Result<Option<ShardGroupInfo>, DynError>;

    /// Resolve the database, retention policy and shard groups that own
    /// `shard_id`, or `None` when the shard is not (or no longer) part of
    /// any group.
    async fn shard_owner(
        &self,
        shard_id: ShardId,
    ) -> Option<(String, String, Vec<ShardGroupInfo>)>;
}

/// The local TSDB storage engine.
#[async_trait]
pub trait TsdbStore: Debug + Send + Sync {
    /// Materialise a shard under the given database and retention policy.
    async fn create_shard(
        &self,
        database: &str,
        retention_policy: &str,
        shard_id: ShardId,
        enabled: bool,
    ) -> Result<(), StoreError>;

    /// Apply `points` to the local shard.
    async fn write_to_shard(&self, shard_id: ShardId, points: &[Point]) -> Result<(), StoreError>;
}

/// Synchronous delivery of a shard write to a peer data node.
#[async_trait]
pub trait ShardWriter: Debug + Send + Sync {
    /// Write `points` into `shard_id` on the node owning `owner_id`.
    async fn write_shard(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), DynError>;
}

/// Durable enqueue of a shard write for later delivery to a peer that was
/// momentarily unreachable.
#[async_trait]
pub trait HintedHandoff: Debug + Send + Sync {
    /// Queue `points` for later delivery to the node owning `owner_id`.
    async fn write_shard(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), DynError>;
}
