//! Public interface to the Parasol parameter server core library.
//!
//! The core is the server-side model layer of a distributed parameter
//! server: per-table consistency state machines over pluggable partitioned
//! storage, driven by per-worker progress tracking. Transport, identity
//! mapping, and the worker-facing table facade live outside this crate and
//! talk to it through the request/reply channel types re-exported here.

#![allow(clippy::uninlined_format_args)]

#[macro_use]
mod utils;

mod models;
mod server;

pub use models::{
    AspModel, BspModel, BspResetAddModel, Model, ModelType, SspModel,
    StorageType,
};
pub use server::{
    ClockVal, Key, KeyRange, MapStorage, PendingBuffer, PendingGet,
    ProgressTracker, Reply, ReplyOp, Request, RequestOp, ServerConfig,
    ServerGroup, ServerGroupHandle, ServerId, ServerThread, SlotVal,
    Storage, TableConfig, TableId, TableIdAllocator, TableParams,
    TableRegistry, VectorStorage, WorkerId,
};
pub use utils::ParasolError;
