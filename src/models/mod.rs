//! Parasol's collection of per-table consistency models.
//!
//! A model instance is one table's state machine on one server thread:
//! consistency logic plus its storage shard plus its progress tracker.

mod asp;
mod bsp;
mod bsp_reset_add;
mod ssp;

use std::path::{Path, PathBuf};

use crate::server::{
    ClockVal, Key, Reply, ReplyOp, ServerId, SlotVal, Storage, TableId,
    WorkerId,
};
use crate::utils::ParasolError;

use serde::{Deserialize, Serialize};

use tokio::sync::mpsc;

pub use asp::AspModel;
pub use bsp::BspModel;
pub use bsp_reset_add::BspResetAddModel;
pub use ssp::SspModel;

/// Enum of supported consistency model types.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize,
)]
pub enum ModelType {
    Asp,
    Bsp,
    Ssp,
    BspResetAdd,
}

impl ModelType {
    /// Parse command line string into ModelType enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "Asp" => Some(Self::Asp),
            "Bsp" => Some(Self::Bsp),
            "Ssp" => Some(Self::Ssp),
            "BspResetAdd" => Some(Self::BspResetAdd),
            _ => None,
        }
    }
}

/// Enum of supported storage backend types.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize,
)]
pub enum StorageType {
    Map,
    Vector,
}

impl StorageType {
    /// Parse command line string into StorageType enum.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name {
            "Map" => Some(Self::Map),
            "Vector" => Some(Self::Vector),
            _ => None,
        }
    }
}

/// A table's consistency state machine, dispatched as a tagged variant.
/// All variants expose the same capability set.
pub enum Model<V: SlotVal> {
    Asp(AspModel<V>),
    Bsp(BspModel<V>),
    Ssp(SspModel<V>),
    BspResetAdd(BspResetAddModel<V>),
}

impl<V: SlotVal> Model<V> {
    /// Constructs the model variant for a table. Staleness 0 under Ssp
    /// coincides with Bsp on reads, so it is built as Bsp outright.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        model_type: ModelType,
        table_id: TableId,
        server_id: ServerId,
        staleness: ClockVal,
        dump_interval: ClockVal,
        dump_dir: PathBuf,
        workers: &[WorkerId],
        storage: Storage<V>,
        tx_reply: mpsc::Sender<Reply<V>>,
    ) -> Model<V> {
        match model_type {
            ModelType::Asp => Model::Asp(AspModel::new(
                table_id,
                server_id,
                dump_interval,
                dump_dir,
                workers,
                storage,
                tx_reply,
            )),
            ModelType::Bsp => Model::Bsp(BspModel::new(
                table_id,
                server_id,
                dump_interval,
                dump_dir,
                workers,
                storage,
                tx_reply,
            )),
            ModelType::Ssp if staleness == 0 => Model::Bsp(BspModel::new(
                table_id,
                server_id,
                dump_interval,
                dump_dir,
                workers,
                storage,
                tx_reply,
            )),
            ModelType::Ssp => Model::Ssp(SspModel::new(
                table_id,
                server_id,
                staleness,
                dump_interval,
                dump_dir,
                workers,
                storage,
                tx_reply,
            )),
            ModelType::BspResetAdd => {
                Model::BspResetAdd(BspResetAddModel::new(
                    table_id,
                    server_id,
                    dump_interval,
                    dump_dir,
                    workers,
                    storage,
                    tx_reply,
                ))
            }
        }
    }

    /// Accumulates an (optionally chunked) update from a worker.
    pub async fn add(
        &mut self,
        sender: WorkerId,
        clock: ClockVal,
        keys: Vec<Key>,
        vals: Vec<V>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.add(sender, clock, keys, vals, chunked),
            Model::Bsp(model) => model.add(sender, clock, keys, vals, chunked),
            Model::Ssp(model) => model.add(sender, clock, keys, vals, chunked),
            Model::BspResetAdd(model) => {
                model.add(sender, clock, keys, vals, chunked)
            }
        }
    }

    /// Serves or defers an (optionally chunked) read from a worker.
    pub async fn get(
        &mut self,
        sender: WorkerId,
        clock: ClockVal,
        keys: Vec<Key>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.get(sender, keys, chunked).await,
            Model::Bsp(model) => model.get(sender, clock, keys, chunked).await,
            Model::Ssp(model) => model.get(sender, clock, keys, chunked).await,
            Model::BspResetAdd(model) => {
                model.get(sender, clock, keys, chunked).await
            }
        }
    }

    /// Advances the sender's logical clock.
    pub async fn clock(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.clock(sender).await,
            Model::Bsp(model) => model.clock(sender).await,
            Model::Ssp(model) => model.clock(sender).await,
            Model::BspResetAdd(model) => model.clock(sender).await,
        }
    }

    /// Drops all state belonging to a departed worker and acks.
    pub async fn reset_worker(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.reset_worker(sender).await,
            Model::Bsp(model) => model.reset_worker(sender).await,
            Model::Ssp(model) => model.reset_worker(sender).await,
            Model::BspResetAdd(model) => model.reset_worker(sender).await,
        }
    }

    /// Current clock of a worker, `None` if it is not registered.
    pub fn progress_of(&self, worker: WorkerId) -> Option<ClockVal> {
        match self {
            Model::Asp(model) => model.progress_of(worker),
            Model::Bsp(model) => model.progress_of(worker),
            Model::Ssp(model) => model.progress_of(worker),
            Model::BspResetAdd(model) => model.progress_of(worker),
        }
    }

    /// Current min clock of the table.
    pub fn min_clock(&self) -> ClockVal {
        match self {
            Model::Asp(model) => model.min_clock(),
            Model::Bsp(model) => model.min_clock(),
            Model::Ssp(model) => model.min_clock(),
            Model::BspResetAdd(model) => model.min_clock(),
        }
    }

    /// Snapshots storage to the model's default dump path.
    pub async fn dump(&self) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.dump().await,
            Model::Bsp(model) => model.dump().await,
            Model::Ssp(model) => model.dump().await,
            Model::BspResetAdd(model) => model.dump().await,
        }
    }

    /// Reloads storage from a snapshot file.
    pub async fn load(&mut self, path: &Path) -> Result<(), ParasolError> {
        match self {
            Model::Asp(model) => model.load(path).await,
            Model::Bsp(model) => model.load(path).await,
            Model::Ssp(model) => model.load(path).await,
            Model::BspResetAdd(model) => model.load(path).await,
        }
    }
}

/// Builds the snapshot file path for a table shard.
pub(crate) fn snapshot_path(
    dump_dir: &Path,
    table_id: TableId,
    server_id: ServerId,
) -> PathBuf {
    dump_dir.join(format!("table{}.server{}.snap", table_id, server_id))
}

/// Reads storage and sends the reply for a (possibly chunked) Get.
pub(crate) async fn send_read_reply<V: SlotVal>(
    tx_reply: &mpsc::Sender<Reply<V>>,
    storage: &Storage<V>,
    table_id: TableId,
    sender: WorkerId,
    keys: Vec<Key>,
    chunked: bool,
) -> Result<(), ParasolError> {
    let vals = if chunked {
        storage.get_chunk(&keys)?
    } else {
        storage.get(&keys)?
    };
    let op = if chunked {
        ReplyOp::GetChunk { keys, vals }
    } else {
        ReplyOp::Get { keys, vals }
    };
    tx_reply
        .send(Reply {
            recipient: sender,
            table_id,
            op,
        })
        .await
        .map_err(|e| ParasolError(e.to_string()))
}

/// Sends the acknowledgement for a ResetWorker.
pub(crate) async fn send_reset_ack<V: SlotVal>(
    tx_reply: &mpsc::Sender<Reply<V>>,
    table_id: TableId,
    sender: WorkerId,
) -> Result<(), ParasolError> {
    tx_reply
        .send(Reply {
            recipient: sender,
            table_id,
            op: ReplyOp::ResetWorker,
        })
        .await
        .map_err(|e| ParasolError(e.to_string()))
}

/// Snapshots storage if the freshly advanced min clock hits the dump
/// cadence. A failed dump is logged and the model carries on.
pub(crate) async fn dump_if_due<V: SlotVal>(
    storage: &Storage<V>,
    dump_interval: ClockVal,
    new_min: ClockVal,
    dump_dir: &Path,
    table_id: TableId,
    server_id: ServerId,
) {
    if dump_interval == 0 || new_min % dump_interval != 0 {
        return;
    }
    let path = snapshot_path(dump_dir, table_id, server_id);
    match storage.write_to(&path).await {
        Ok(()) => pf_info!(
            "table {} snapshot at min clock {} -> '{}'",
            table_id,
            new_min,
            path.display()
        ),
        Err(e) => pf_warn!(
            "table {} snapshot at min clock {} failed: {}",
            table_id,
            new_min,
            e
        ),
    }
}
