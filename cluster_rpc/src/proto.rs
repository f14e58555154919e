//! Message payloads exchanged by the cluster service.
//!
//! The message structs are hand-maintained prost messages; their field tags
//! and the [`MessageType`] codes are part of the compatibility contract
//! between peer nodes and must not be reassigned.

use data_types::{Point, PointError, ShardId};

/// The registry of frame type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A request to apply points to one shard of the receiving node.
    WriteShardRequest = 1,
    /// The reply to [`Self::WriteShardRequest`] and
    /// [`Self::ExecuteStatementRequest`].
    WriteShardResponse = 2,
    /// A request to execute a statement on the receiving node.
    ExecuteStatementRequest = 3,
    /// A single-shot request for an iterator over the named shards.
    CreateIteratorRequest = 4,
    /// The reply to [`Self::CreateIteratorRequest`].
    CreateIteratorResponse = 5,
    /// A single-shot request for the fields and dimensions of the named
    /// shards.
    FieldDimensionsRequest = 6,
    /// The reply to [`Self::FieldDimensionsRequest`].
    FieldDimensionsResponse = 7,
}

impl MessageType {
    /// Look a frame type byte up in the registry.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::WriteShardRequest),
            2 => Some(Self::WriteShardResponse),
            3 => Some(Self::ExecuteStatementRequest),
            4 => Some(Self::CreateIteratorRequest),
            5 => Some(Self::CreateIteratorResponse),
            6 => Some(Self::FieldDimensionsRequest),
            7 => Some(Self::FieldDimensionsResponse),
            _ => None,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> Self {
        t as Self
    }
}

/// A batch of points destined for one shard of the receiving node.
///
/// `database` and `retention_policy` let the receiver create the shard when
/// the metadata has propagated ahead of the shard itself; requests without
/// them are dropped when the shard is unknown.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteShardRequest {
    /// The destination shard.
    #[prost(uint64, tag = "1")]
    pub shard_id: u64,
    /// The database the shard belongs to. May be empty.
    #[prost(string, tag = "2")]
    pub database: String,
    /// The retention policy the shard belongs to. May be empty.
    #[prost(string, tag = "3")]
    pub retention_policy: String,
    /// The points, each encoded in the canonical line format.
    #[prost(bytes = "vec", repeated, tag = "4")]
    pub points: Vec<Vec<u8>>,
}

impl WriteShardRequest {
    /// A request for `shard_id` carrying no points yet.
    pub fn new(
        shard_id: ShardId,
        database: impl Into<String>,
        retention_policy: impl Into<String>,
    ) -> Self {
        Self {
            shard_id: shard_id.get(),
            database: database.into(),
            retention_policy: retention_policy.into(),
            points: Vec::new(),
        }
    }

    /// The destination shard id.
    pub fn shard_id(&self) -> ShardId {
        ShardId::new(self.shard_id)
    }

    /// Append `points` in their wire encoding.
    pub fn add_points(&mut self, points: &[Point]) {
        self.points
            .extend(points.iter().map(|p| p.to_line_protocol().into_bytes()));
    }

    /// Decode the carried points.
    pub fn points(&self) -> Result<Vec<Point>, PointError> {
        self.points
            .iter()
            .map(|raw| {
                let line = std::str::from_utf8(raw).map_err(|_| PointError::InvalidUtf8)?;
                Point::parse_line(line)
            })
            .collect()
    }
}

/// The outcome of a write or statement request.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteShardResponse {
    /// 0 on success, non-zero on failure.
    #[prost(uint32, tag = "1")]
    pub code: u32,
    /// The failure message. Empty on success.
    #[prost(string, tag = "2")]
    pub message: String,
}

impl WriteShardResponse {
    /// A success response.
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: String::new(),
        }
    }

    /// A failure response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    /// True when the peer reported success.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// A statement to execute on the receiving node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteStatementRequest {
    /// The statement text.
    #[prost(string, tag = "1")]
    pub statement: String,
    /// The database to execute against.
    #[prost(string, tag = "2")]
    pub database: String,
}

/// A request for an iterator over the named shards.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateIteratorRequest {
    /// The shards to read.
    #[prost(uint64, repeated, tag = "1")]
    pub shard_ids: Vec<u64>,
    /// Opaque iterator options.
    #[prost(bytes = "vec", tag = "2")]
    pub opt: Vec<u8>,
}

/// The reply to a [`CreateIteratorRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateIteratorResponse {
    /// The failure message. Empty on success.
    #[prost(string, tag = "1")]
    pub err: String,
}

/// A request for the fields and dimensions of the named shards.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldDimensionsRequest {
    /// The shards to inspect.
    #[prost(uint64, repeated, tag = "1")]
    pub shard_ids: Vec<u64>,
    /// Opaque source descriptors.
    #[prost(bytes = "vec", tag = "2")]
    pub sources: Vec<u8>,
}

/// The reply to a [`FieldDimensionsRequest`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FieldDimensionsResponse {
    /// The field names found.
    #[prost(string, repeated, tag = "1")]
    pub fields: Vec<String>,
    /// The dimension (tag key) names found.
    #[prost(string, repeated, tag = "2")]
    pub dimensions: Vec<String>,
    /// The failure message. Empty on success.
    #[prost(string, tag = "3")]
    pub err: String,
}
