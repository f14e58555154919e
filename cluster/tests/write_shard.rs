//! End-to-end tests driving the cluster service over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;

use cluster::{Service, StaticNodeLocator, TcpShardWriter, MUX_HEADER};
use cluster_rpc::proto::{
    CreateIteratorRequest, CreateIteratorResponse, ExecuteStatementRequest, MessageType,
    WriteShardRequest, WriteShardResponse,
};
use cluster_rpc::tlv;
use coordinator::mock::{MockMetaClient, MockTsdbStore};
use coordinator::{MetaClient, ShardWriter, StoreError, TsdbStore};
use data_types::{
    NodeId, Point, ShardGroupId, ShardGroupInfo, ShardId, ShardInfo, ShardOwner, TimestampRange,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const SHARD: ShardId = ShardId::new(7);

async fn start_service(store: Arc<MockTsdbStore>) -> (Service, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = Service::new(Arc::clone(&store) as Arc<dyn TsdbStore>);
    service.open(listener);
    (service, addr)
}

fn points() -> Vec<Point> {
    vec![
        Point::new("cpu", [("host", "a")], [("value", 1.0)], 10).unwrap(),
        Point::new("cpu", [("host", "b")], [("value", 2.0)], 20).unwrap(),
    ]
}

fn write_request(shard_id: ShardId, database: &str, retention_policy: &str) -> WriteShardRequest {
    let mut req = WriteShardRequest::new(shard_id, database, retention_policy);
    req.add_points(&points());
    req
}

async fn send_write(conn: &mut TcpStream, req: &WriteShardRequest) -> WriteShardResponse {
    tlv::encode_tlv(conn, MessageType::WriteShardRequest.into(), req)
        .await
        .unwrap();

    let typ = tlv::read_type(conn).await.unwrap();
    assert_eq!(
        MessageType::from_u8(typ),
        Some(MessageType::WriteShardResponse)
    );
    tlv::decode_lv(conn).await.unwrap()
}

#[tokio::test]
async fn test_write_shard_request_applies_points() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;

    assert!(resp.is_ok());
    assert!(resp.message.is_empty());
    assert_eq!(store.writes(), vec![(SHARD, points())]);

    service.close().await;
}

#[tokio::test]
async fn test_multiple_requests_on_one_connection() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    for _ in 0..3 {
        let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;
        assert!(resp.is_ok());
    }
    assert_eq!(store.writes().len(), 3);

    service.close().await;
}

#[tokio::test]
async fn test_unknown_shard_is_lazily_created() {
    let store = Arc::new(MockTsdbStore::default().with_write_results([Err(
        StoreError::ShardNotFound { shard_id: SHARD },
    )]));
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "x", "y")).await;
    assert!(resp.is_ok());

    // Exactly one create, then the retried write.
    assert_eq!(
        store.create_calls(),
        vec![("x".to_string(), "y".to_string(), SHARD, true)]
    );
    assert_eq!(store.writes().len(), 2);

    service.close().await;
}

#[tokio::test]
async fn test_stale_write_without_metadata_is_dropped() {
    let store = Arc::new(MockTsdbStore::default().with_write_results([Err(
        StoreError::ShardNotFound { shard_id: SHARD },
    )]));
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "", "")).await;

    // Dropping the stale write is not an error from the peer's view.
    assert!(resp.is_ok());
    assert!(store.create_calls().is_empty());
    assert_eq!(store.writes().len(), 1);

    service.close().await;
}

#[tokio::test]
async fn test_store_failure_returns_error_response() {
    let store = Arc::new(
        MockTsdbStore::default().with_write_results([Err(StoreError::Other("disk full".into()))]),
    );
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;

    assert_eq!(resp.code, 1);
    assert_eq!(resp.message, "write shard 7: disk full");

    service.close().await;
}

#[tokio::test]
async fn test_failed_lazy_creation_returns_error_response() {
    let store = Arc::new(
        MockTsdbStore::default()
            .with_write_results([Err(StoreError::ShardNotFound { shard_id: SHARD })])
            .with_create_results([Err(StoreError::Other("no capacity".into()))]),
    );
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "x", "y")).await;

    assert_eq!(resp.code, 1);
    assert_eq!(resp.message, "create shard 7: no capacity");
    assert_eq!(store.writes().len(), 1);

    service.close().await;
}

#[tokio::test]
async fn test_execute_statement_is_acknowledged() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let req = ExecuteStatementRequest {
        statement: "DROP DATABASE db0".to_string(),
        database: "db0".to_string(),
    };
    tlv::encode_tlv(&mut conn, MessageType::ExecuteStatementRequest.into(), &req)
        .await
        .unwrap();

    let typ = tlv::read_type(&mut conn).await.unwrap();
    assert_eq!(
        MessageType::from_u8(typ),
        Some(MessageType::WriteShardResponse)
    );
    let resp: WriteShardResponse = tlv::decode_lv(&mut conn).await.unwrap();
    assert!(resp.is_ok());

    // The connection stays usable afterwards.
    let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;
    assert!(resp.is_ok());

    service.close().await;
}

#[tokio::test]
async fn test_unknown_message_type_keeps_connection_open() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_u8(200).await.unwrap();

    let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;
    assert!(resp.is_ok());

    service.close().await;
}

#[tokio::test]
async fn test_create_iterator_request_is_single_shot() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let req = CreateIteratorRequest {
        shard_ids: vec![1, 2, 3],
        opt: Vec::new(),
    };
    tlv::encode_tlv(&mut conn, MessageType::CreateIteratorRequest.into(), &req)
        .await
        .unwrap();

    let typ = tlv::read_type(&mut conn).await.unwrap();
    assert_eq!(
        MessageType::from_u8(typ),
        Some(MessageType::CreateIteratorResponse)
    );
    let resp: CreateIteratorResponse = tlv::decode_lv(&mut conn).await.unwrap();
    assert!(resp.err.is_empty());

    // The service hangs up after replying.
    let err = tlv::read_type(&mut conn).await.unwrap_err();
    assert!(err.is_eof());

    service.close().await;
}

#[tokio::test]
async fn test_close_disconnects_open_connections() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, addr) = start_service(Arc::clone(&store)).await;

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let resp = send_write(&mut conn, &write_request(SHARD, "db0", "rp0")).await;
    assert!(resp.is_ok());

    service.close().await;

    // The handler was torn down: the connection reads EOF (or a reset).
    let mut buf = [0u8; 1];
    match conn.read(&mut buf).await {
        Ok(n) => assert_eq!(n, 0),
        Err(_) => {}
    }
}

/// A stand-in for the connection multiplexer: accepts, strips and checks the
/// mux header byte, and pipes the rest of the stream to the service.
async fn start_mux(service_addr: SocketAddr) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut inbound, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let header = inbound.read_u8().await.unwrap();
                assert_eq!(header, MUX_HEADER);

                let mut outbound = TcpStream::connect(service_addr).await.unwrap();
                let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
            });
        }
    });

    addr
}

fn owning_group() -> ShardGroupInfo {
    ShardGroupInfo {
        id: ShardGroupId::new(1),
        time_range: TimestampRange::new(0, 100),
        shards: vec![ShardInfo {
            id: SHARD,
            owners: vec![ShardOwner {
                node_id: NodeId::new(2),
            }],
        }],
    }
}

#[tokio::test]
async fn test_tcp_shard_writer_end_to_end() {
    let store = Arc::new(MockTsdbStore::default());
    let (service, service_addr) = start_service(Arc::clone(&store)).await;
    let mux_addr = start_mux(service_addr).await;

    let meta = Arc::new(MockMetaClient::default().with_shard_owner(
        SHARD,
        "db0",
        "rp0",
        vec![owning_group()],
    ));
    let locator = Arc::new(StaticNodeLocator::new([(NodeId::new(2), mux_addr)]));

    let writer = TcpShardWriter::new(locator, Arc::clone(&meta) as Arc<dyn MetaClient>);
    writer
        .write_shard(SHARD, NodeId::new(2), &points())
        .await
        .unwrap();

    assert_eq!(store.writes(), vec![(SHARD, points())]);

    service.close().await;
}

#[tokio::test]
async fn test_tcp_shard_writer_surfaces_remote_error() {
    // The peer's schema conflict must reach the sender verbatim so it is
    // classified as non-retryable there.
    let store = Arc::new(MockTsdbStore::default().with_write_results([Err(StoreError::Other(
        "field type conflict".into(),
    ))]));
    let (service, service_addr) = start_service(Arc::clone(&store)).await;
    let mux_addr = start_mux(service_addr).await;

    let meta = Arc::new(MockMetaClient::default().with_shard_owner(
        SHARD,
        "db0",
        "rp0",
        vec![owning_group()],
    ));
    let locator = Arc::new(StaticNodeLocator::new([(NodeId::new(2), mux_addr)]));

    let writer = TcpShardWriter::new(locator, Arc::clone(&meta) as Arc<dyn MetaClient>);
    let err = writer
        .write_shard(SHARD, NodeId::new(2), &points())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("field type conflict"));

    service.close().await;
}

#[tokio::test]
async fn test_tcp_shard_writer_drops_write_for_unowned_shard() {
    // No shard ownership metadata: the write is silently dropped before any
    // connection is attempted (the locator is empty, so dialing would fail).
    let meta = Arc::new(MockMetaClient::default());
    let locator = Arc::new(StaticNodeLocator::default());

    let writer = TcpShardWriter::new(locator, Arc::clone(&meta) as Arc<dyn MetaClient>);
    writer
        .write_shard(SHARD, NodeId::new(2), &points())
        .await
        .unwrap();
}
