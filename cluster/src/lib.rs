//! The cluster service: the peer-facing RPC endpoint applying forwarded
//! shard writes to the local store, and the TCP client used to forward them
//! from the write path.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod service;
pub mod shard_writer;

pub use service::Service;
pub use shard_writer::{NodeLocator, StaticNodeLocator, TcpShardWriter};

/// The header byte under which the connection multiplexer routes streams to
/// this service.
pub const MUX_HEADER: u8 = 2;
