//! Request/reply message types between worker threads and server threads.
//!
//! Messages arrive at the server already decoded; wire framing is the
//! transport's concern. Every request names its target table and carries the
//! sender's logical clock where that matters to progress.

use serde::{Deserialize, Serialize};

/// Worker thread ID type.
pub type WorkerId = u32;

/// Server thread ID type.
pub type ServerId = u32;

/// Table (model instance) ID type.
pub type TableId = u32;

/// Logical clock value type.
pub type ClockVal = u64;

/// Parameter key type.
pub type Key = u64;

/// Request message from a worker to the model layer.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Request<V> {
    /// Sending worker's ID.
    pub sender: WorkerId,

    /// Target table.
    pub table_id: TableId,

    /// Sender's logical clock at send time.
    pub clock: ClockVal,

    /// The requested operation.
    pub op: RequestOp<V>,
}

/// Operation kinds carried by a request.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum RequestOp<V> {
    /// Accumulate `vals[i]` into slot `keys[i]`.
    Add { keys: Vec<Key>, vals: Vec<V> },

    /// Accumulate chunks; `vals` is `keys.len() * chunk_size` long.
    AddChunk { keys: Vec<Key>, vals: Vec<V> },

    /// Read slot values, possibly deferred by the consistency model.
    Get { keys: Vec<Key> },

    /// Read chunks.
    GetChunk { keys: Vec<Key> },

    /// Advance the sender's logical clock.
    Clock,

    /// Query the current clock of a worker on the target table.
    GetProgress { worker: WorkerId },

    /// Drop all server-side state belonging to the sender.
    ResetWorker,
}

/// Reply message from the model layer back to a worker.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Reply<V> {
    /// Receiving worker's ID.
    pub recipient: WorkerId,

    /// Table the reply originates from.
    pub table_id: TableId,

    /// The reply payload.
    pub op: ReplyOp<V>,
}

/// Payload kinds carried by a reply. Add and Clock produce no reply.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum ReplyOp<V> {
    /// Slot values for a Get, position-matched to `keys`.
    Get { keys: Vec<Key>, vals: Vec<V> },

    /// Chunk values for a GetChunk; `vals` is `keys.len() * chunk_size` long.
    GetChunk { keys: Vec<Key>, vals: Vec<V> },

    /// Answer to a GetProgress; `clock` is `None` for a worker the table
    /// does not know.
    Progress {
        worker: WorkerId,
        clock: Option<ClockVal>,
    },

    /// Acknowledgement of a ResetWorker.
    ResetWorker,
}
