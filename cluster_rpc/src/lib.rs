//! The peer wire protocol of the cluster service.
//!
//! Peers exchange frames on a single TCP connection. Each frame is a
//! type-length-value triple: a one-byte message type from the [`MessageType`]
//! registry, a big-endian `u64` payload length, and the protobuf-encoded
//! payload itself. The [`tlv`] module implements the framing; [`proto`] holds
//! the message payloads.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs
)]

pub mod proto;
pub mod tlv;

pub use proto::{
    CreateIteratorRequest, CreateIteratorResponse, ExecuteStatementRequest,
    FieldDimensionsRequest, FieldDimensionsResponse, MessageType, WriteShardRequest,
    WriteShardResponse,
};
