//! A TCP client delivering shard writes to peer data nodes.

use std::collections::HashMap;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cluster_rpc::proto::{MessageType, WriteShardRequest, WriteShardResponse};
use cluster_rpc::tlv;
use coordinator::{DynError, MetaClient, ShardWriter};
use data_types::{NodeId, Point, ShardId};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;

use crate::MUX_HEADER;

/// The default timeout for one remote shard write.
pub const DEFAULT_SHARD_WRITER_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a data node id to the address its cluster service listens on.
/// Cluster membership is managed elsewhere.
pub trait NodeLocator: Debug + Send + Sync {
    /// The address of `node_id`, or `None` when the node is unknown.
    fn node_address(&self, node_id: NodeId) -> Option<SocketAddr>;
}

/// A [`NodeLocator`] over a fixed topology.
#[derive(Debug, Default)]
pub struct StaticNodeLocator {
    addrs: HashMap<NodeId, SocketAddr>,
}

impl StaticNodeLocator {
    /// Build a locator from `(node, address)` pairs.
    pub fn new(addrs: impl IntoIterator<Item = (NodeId, SocketAddr)>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }
}

impl NodeLocator for StaticNodeLocator {
    fn node_address(&self, node_id: NodeId) -> Option<SocketAddr> {
        self.addrs.get(&node_id).copied()
    }
}

/// Errors delivering a shard write to a peer.
#[derive(Debug, Error)]
pub enum Error {
    /// The destination node has no known address.
    #[error("no address known for node {node_id}")]
    UnknownNode {
        /// The unresolvable node.
        node_id: NodeId,
    },

    /// The write did not complete within the configured timeout.
    #[error("timeout writing to node {node_id}")]
    Timeout {
        /// The unresponsive node.
        node_id: NodeId,
    },

    /// The TCP connection could not be established.
    #[error("unable to connect to node {node_id}: {source}")]
    Connect {
        /// The unreachable node.
        node_id: NodeId,
        /// The connect failure.
        source: std::io::Error,
    },

    /// The mux routing header could not be sent.
    #[error("unable to send mux header: {source}")]
    MuxHeader {
        /// The write failure.
        source: std::io::Error,
    },

    /// A frame could not be read or written.
    #[error(transparent)]
    Frame(#[from] tlv::Error),

    /// The peer replied with something other than a write-shard response.
    #[error("unexpected response type: {msg_type}")]
    UnexpectedResponse {
        /// The unexpected type byte.
        msg_type: u8,
    },

    /// The peer reported a failure applying the write.
    #[error("error code {code}: {message}")]
    Remote {
        /// The peer's response code.
        code: u32,
        /// The peer's failure message.
        message: String,
    },
}

/// Writes shard batches to peer data nodes over the cluster RPC protocol.
#[derive(Debug)]
pub struct TcpShardWriter {
    locator: Arc<dyn NodeLocator>,
    meta_client: Arc<dyn MetaClient>,
    timeout: Duration,
}

impl TcpShardWriter {
    /// Create a writer resolving peers through `locator` and shard ownership
    /// through `meta_client`.
    pub fn new(locator: Arc<dyn NodeLocator>, meta_client: Arc<dyn MetaClient>) -> Self {
        Self {
            locator,
            meta_client,
            timeout: DEFAULT_SHARD_WRITER_TIMEOUT,
        }
    }

    /// Override the per-write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn write_shard_inner(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), Error> {
        // Determine where this shard lives and whether it still exists. A
        // write whose shard group is gone (e.g. redelivered from the hinted
        // handoff queue after the group was deleted) is no longer valid and
        // is dropped.
        let owner = self.meta_client.shard_owner(shard_id).await;
        let Some((database, retention_policy, groups)) = owner else {
            info!(%shard_id, "dropping write for shard without owning group");
            return Ok(());
        };
        if groups.is_empty() {
            info!(%shard_id, "dropping write for shard without owning group");
            return Ok(());
        }

        let addr = self
            .locator
            .node_address(owner_id)
            .ok_or(Error::UnknownNode { node_id: owner_id })?;
        let mut conn = TcpStream::connect(addr)
            .await
            .map_err(|source| Error::Connect {
                node_id: owner_id,
                source,
            })?;
        conn.write_all(&[MUX_HEADER])
            .await
            .map_err(|source| Error::MuxHeader { source })?;

        let mut req = WriteShardRequest::new(shard_id, database, retention_policy);
        req.add_points(points);
        tlv::encode_tlv(&mut conn, MessageType::WriteShardRequest.into(), &req).await?;

        let msg_type = tlv::read_type(&mut conn).await?;
        if MessageType::from_u8(msg_type) != Some(MessageType::WriteShardResponse) {
            return Err(Error::UnexpectedResponse { msg_type });
        }

        let resp: WriteShardResponse = tlv::decode_lv(&mut conn).await?;
        if !resp.is_ok() {
            return Err(Error::Remote {
                code: resp.code,
                message: resp.message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ShardWriter for TcpShardWriter {
    async fn write_shard(
        &self,
        shard_id: ShardId,
        owner_id: NodeId,
        points: &[Point],
    ) -> Result<(), DynError> {
        match tokio::time::timeout(
            self.timeout,
            self.write_shard_inner(shard_id, owner_id, points),
        )
        .await
        {
            Ok(res) => res.map_err(DynError::from),
            Err(_) => Err(DynError::from(Error::Timeout { node_id: owner_id })),
        }
    }
}
