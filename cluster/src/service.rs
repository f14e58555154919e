//! The peer-facing RPC service.
//!
//! The service accepts already-demultiplexed TCP connections and reads TLV
//! frames off each one, dispatching by message type. Write requests are
//! applied to the local store, lazily creating the shard when the metadata
//! propagated ahead of it.

use std::net::SocketAddr;
use std::sync::Arc;

use cluster_rpc::proto::{
    CreateIteratorRequest, CreateIteratorResponse, ExecuteStatementRequest,
    FieldDimensionsRequest, FieldDimensionsResponse, MessageType, WriteShardRequest,
    WriteShardResponse,
};
use cluster_rpc::tlv;
use coordinator::{StoreError, TsdbStore};
use data_types::ShardId;
use parking_lot::Mutex;
use prost::Message;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Errors processing a peer request.
#[derive(Debug, Error)]
pub enum Error {
    /// The request payload was not a valid message.
    #[error("unable to decode request: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The request carried points that did not parse.
    #[error("invalid points payload: {0}")]
    Points(#[from] data_types::PointError),

    /// The local store failed to create the missing shard.
    #[error("create shard {shard_id}: {source}")]
    CreateShard {
        /// The shard being created.
        shard_id: ShardId,
        /// The store failure.
        source: StoreError,
    },

    /// The local store failed to apply the write.
    #[error("write shard {shard_id}: {source}")]
    WriteShard {
        /// The shard being written.
        shard_id: ShardId,
        /// The store failure.
        source: StoreError,
    },
}

/// The cluster RPC service.
///
/// Cheap to clone; clones share the closing signal and the connection
/// tracker.
#[derive(Debug, Clone)]
pub struct Service {
    tsdb_store: Arc<dyn TsdbStore>,

    closing: CancellationToken,
    connections: TaskTracker,
    accept_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Service {
    /// Create a service applying peer writes to `tsdb_store`.
    pub fn new(tsdb_store: Arc<dyn TsdbStore>) -> Self {
        Self {
            tsdb_store,
            closing: CancellationToken::new(),
            connections: TaskTracker::new(),
            accept_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin serving connections accepted from `listener`.
    ///
    /// The listener is expected to hand out connections whose mux header has
    /// already been consumed.
    pub fn open(&self, listener: TcpListener) {
        info!("starting cluster service");
        let service = self.clone();
        let handle = tokio::spawn(async move { service.serve(listener).await });
        *self.accept_task.lock() = Some(handle);
    }

    /// Stop accepting connections, close the in-flight ones, and wait for
    /// every handler to unwind.
    pub async fn close(&self) {
        self.closing.cancel();

        let handle = self.accept_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.connections.close();
        self.connections.wait().await;
    }

    /// Accept connections until shutdown. Unknown accept errors are logged
    /// and the loop continues.
    async fn serve(&self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.closing.cancelled() => {
                    info!("cluster service stopping");
                    return;
                }
                res = listener.accept() => {
                    let (conn, addr) = match res {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            if self.closing.is_cancelled() {
                                return;
                            }
                            warn!(error = %e, "accept error");
                            continue;
                        }
                    };

                    debug!(%addr, "accept remote connection");
                    let service = self.clone();
                    self.connections.spawn(async move {
                        // Drop (and so close) the socket as soon as either
                        // the handler finishes or the service shuts down.
                        tokio::select! {
                            _ = service.closing.cancelled() => {}
                            _ = service.handle_conn(conn, addr) => {}
                        }
                        debug!(%addr, "close remote connection");
                    });
                }
            }
        }
    }

    /// Read frames off one connection until EOF, a read error, or a
    /// single-shot request type.
    async fn handle_conn(&self, mut conn: TcpStream, addr: SocketAddr) {
        loop {
            let typ = match tlv::read_type(&mut conn).await {
                Ok(typ) => typ,
                Err(e) if e.is_eof() => return,
                Err(e) => {
                    warn!(%addr, error = %e, "unable to read request type");
                    return;
                }
            };

            match MessageType::from_u8(typ) {
                Some(MessageType::WriteShardRequest) => {
                    let buf = match tlv::read_lv(&mut conn).await {
                        Ok(buf) => buf,
                        Err(e) => {
                            warn!(%addr, error = %e, "unable to read request payload");
                            return;
                        }
                    };

                    let res = self.process_write_shard_request(&buf).await;
                    if let Err(e) = &res {
                        error!(%addr, error = %e, "process write shard error");
                    }
                    self.write_shard_response(&mut conn, &res).await;
                }
                Some(MessageType::ExecuteStatementRequest) => {
                    let buf = match tlv::read_lv(&mut conn).await {
                        Ok(buf) => buf,
                        Err(e) => {
                            warn!(%addr, error = %e, "unable to read request payload");
                            return;
                        }
                    };

                    let res = self.process_execute_statement_request(&buf).await;
                    if let Err(e) = &res {
                        error!(%addr, error = %e, "process execute statement error");
                    }
                    self.write_shard_response(&mut conn, &res).await;
                }
                Some(MessageType::CreateIteratorRequest) => {
                    self.process_create_iterator_request(&mut conn).await;
                    return;
                }
                Some(MessageType::FieldDimensionsRequest) => {
                    self.process_field_dimensions_request(&mut conn).await;
                    return;
                }
                _ => {
                    warn!(%addr, msg_type = typ, "unknown message type");
                }
            }
        }
    }

    /// Apply a forwarded shard write to the local store.
    async fn process_write_shard_request(&self, buf: &[u8]) -> Result<(), Error> {
        let req = WriteShardRequest::decode(buf)?;
        let shard_id = req.shard_id();
        let points = req.points()?;

        let first = self.tsdb_store.write_to_shard(shard_id, &points).await;
        let Err(err) = first else { return Ok(()) };

        // A write may arrive for a shard this node has not created yet: the
        // sending node created the shard through the meta store and the
        // write raced ahead of the local shard materialising. Create it
        // from the metadata embedded in the request and retry once.
        let StoreError::ShardNotFound { .. } = err else {
            return Err(Error::WriteShard {
                shard_id,
                source: err,
            });
        };

        if req.database.is_empty() || req.retention_policy.is_empty() {
            // A stale write for a shard this node will not own.
            info!(%shard_id, "dropped write request: no database or retention policy received");
            return Ok(());
        }

        self.tsdb_store
            .create_shard(&req.database, &req.retention_policy, shard_id, true)
            .await
            .map_err(|source| Error::CreateShard { shard_id, source })?;

        self.tsdb_store
            .write_to_shard(shard_id, &points)
            .await
            .map_err(|source| Error::WriteShard {
                shard_id,
                source,
            })
    }

    /// Statement execution is not performed across the cluster; the request
    /// is acknowledged so the peer does not retry.
    async fn process_execute_statement_request(&self, buf: &[u8]) -> Result<(), Error> {
        let req = ExecuteStatementRequest::decode(buf)?;
        debug!(
            statement = %req.statement,
            database = %req.database,
            "execute statement request",
        );
        Ok(())
    }

    /// Reply to `result` with a [`WriteShardResponse`] frame.
    async fn write_shard_response(&self, conn: &mut TcpStream, result: &Result<(), Error>) {
        let resp = match result {
            Ok(()) => WriteShardResponse::ok(),
            Err(e) => WriteShardResponse::error(e.to_string()),
        };

        if let Err(e) =
            tlv::encode_tlv(conn, MessageType::WriteShardResponse.into(), &resp).await
        {
            error!(error = %e, "write shard response error");
        }
    }

    /// Single-shot: reply once; the caller closes the connection after.
    ///
    /// Iterator creation is a dispatch site only; the response carries no
    /// iterator.
    async fn process_create_iterator_request(&self, conn: &mut TcpStream) {
        let resp = match tlv::decode_lv::<_, CreateIteratorRequest>(conn).await {
            Ok(req) => {
                debug!(n_shards = req.shard_ids.len(), "create iterator request");
                CreateIteratorResponse { err: String::new() }
            }
            Err(e) => {
                warn!(error = %e, "error reading create iterator request");
                CreateIteratorResponse { err: e.to_string() }
            }
        };

        if let Err(e) =
            tlv::encode_tlv(conn, MessageType::CreateIteratorResponse.into(), &resp).await
        {
            error!(error = %e, "error writing create iterator response");
        }
    }

    /// Single-shot: reply once; the caller closes the connection after.
    async fn process_field_dimensions_request(&self, conn: &mut TcpStream) {
        let resp = match tlv::decode_lv::<_, FieldDimensionsRequest>(conn).await {
            Ok(req) => {
                debug!(n_shards = req.shard_ids.len(), "field dimensions request");
                FieldDimensionsResponse {
                    fields: Vec::new(),
                    dimensions: Vec::new(),
                    err: String::new(),
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading field dimensions request");
                FieldDimensionsResponse {
                    fields: Vec::new(),
                    dimensions: Vec::new(),
                    err: e.to_string(),
                }
            }
        };

        if let Err(e) =
            tlv::encode_tlv(conn, MessageType::FieldDimensionsResponse.into(), &resp).await
        {
            error!(error = %e, "error writing field dimensions response");
        }
    }
}
