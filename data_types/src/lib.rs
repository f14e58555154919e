//! This crate contains the data types shared between the points writer and
//! the cluster RPC service: node/shard identifiers, shard-group metadata and
//! the time-coverage list over it, retention-policy metadata, write
//! consistency levels, and the point model with its canonical line-format
//! encoding.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod consistency;
pub mod meta;
pub mod point;
pub mod shard;
pub mod timestamp;

pub use consistency::{ConsistencyLevel, InvalidConsistencyLevel};
pub use meta::{DatabaseInfo, RetentionPolicyInfo};
pub use point::{FieldValue, Point, PointError};
pub use shard::{
    NodeId, ShardGroupId, ShardGroupInfo, ShardGroupList, ShardId, ShardInfo, ShardOwner,
};
pub use timestamp::{TimestampRange, MAX_NANO_TIME, MIN_NANO_TIME};
