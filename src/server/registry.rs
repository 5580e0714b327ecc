//! Table registry: model construction and per-message dispatch for one
//! server thread.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::{Model, ModelType, StorageType};
use crate::server::{
    ClockVal, KeyRange, MapStorage, Reply, ReplyOp, Request, RequestOp,
    ServerId, SlotVal, Storage, TableId, VectorStorage, WorkerId,
};
use crate::utils::ParasolError;

use tokio::sync::mpsc;

/// Creation parameters of one table shard on one server thread.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Table ID, assigned by a `TableIdAllocator`.
    pub table_id: TableId,

    /// Consistency model type.
    pub model_type: ModelType,

    /// Storage backend type.
    pub storage_type: StorageType,

    /// Staleness bound; meaningful for Ssp only.
    pub staleness: ClockVal,

    /// Values per key.
    pub chunk_size: u32,

    /// Snapshot every this many min-clock advances; 0 means never.
    pub dump_interval: ClockVal,

    /// Key range this server thread owns for the table.
    pub range: KeyRange,

    /// Workers registered to the table.
    pub workers: Vec<WorkerId>,
}

impl TableConfig {
    fn sanitize(&self) -> Result<(), ParasolError> {
        if self.chunk_size == 0 {
            return logged_err!(
                "table {} invalid chunk_size 0",
                self.table_id
            );
        }
        if self.workers.is_empty() {
            return logged_err!(
                "table {} created with no workers",
                self.table_id
            );
        }
        if self.storage_type == StorageType::Vector && self.range.is_empty() {
            return logged_err!(
                "table {} vector storage over empty range",
                self.table_id
            );
        }
        Ok(())
    }
}

/// Map from table ID to its model instance on this server thread. Populated
/// during the init phase; only per-model state mutates afterward.
pub struct TableRegistry<V: SlotVal> {
    /// Hosting server thread's ID.
    server_id: ServerId,

    /// Directory snapshots are written into.
    dump_dir: PathBuf,

    /// Shared reply queue handed to each model.
    tx_reply: mpsc::Sender<Reply<V>>,

    /// The model instances themselves.
    models: HashMap<TableId, Model<V>>,
}

impl<V: SlotVal> TableRegistry<V> {
    pub fn new(
        server_id: ServerId,
        dump_dir: PathBuf,
        tx_reply: mpsc::Sender<Reply<V>>,
    ) -> Self {
        TableRegistry {
            server_id,
            dump_dir,
            tx_reply,
            models: HashMap::new(),
        }
    }

    /// Constructs this thread's shard of a table.
    pub fn create_table(
        &mut self,
        config: TableConfig,
    ) -> Result<(), ParasolError> {
        config.sanitize()?;
        if self.models.contains_key(&config.table_id) {
            return logged_err!(
                "table {} already exists on server {}",
                config.table_id,
                self.server_id
            );
        }

        let storage = match config.storage_type {
            StorageType::Map => {
                Storage::Map(MapStorage::new(config.chunk_size))
            }
            StorageType::Vector => Storage::Vector(VectorStorage::new(
                config.range,
                config.chunk_size,
            )),
        };
        let model = Model::new(
            config.model_type,
            config.table_id,
            self.server_id,
            config.staleness,
            config.dump_interval,
            self.dump_dir.clone(),
            &config.workers,
            storage,
            self.tx_reply.clone(),
        );
        self.models.insert(config.table_id, model);
        pf_info!(
            "server {} created table {} ({:?}/{:?})",
            self.server_id,
            config.table_id,
            config.model_type,
            config.storage_type
        );
        Ok(())
    }

    /// Routes a request to its table's model. An unknown table ID is fatal.
    pub async fn dispatch(
        &mut self,
        req: Request<V>,
    ) -> Result<(), ParasolError> {
        let Request {
            sender,
            table_id,
            clock,
            op,
        } = req;
        let model = match self.models.get_mut(&table_id) {
            Some(model) => model,
            None => {
                return logged_err!(
                    "server {} got request for unknown table {}",
                    self.server_id,
                    table_id
                );
            }
        };
        match op {
            RequestOp::Add { keys, vals } => {
                model.add(sender, clock, keys, vals, false).await
            }
            RequestOp::AddChunk { keys, vals } => {
                model.add(sender, clock, keys, vals, true).await
            }
            RequestOp::Get { keys } => {
                model.get(sender, clock, keys, false).await
            }
            RequestOp::GetChunk { keys } => {
                model.get(sender, clock, keys, true).await
            }
            RequestOp::Clock => model.clock(sender).await,
            RequestOp::GetProgress { worker } => {
                let clock = model.progress_of(worker);
                self.tx_reply
                    .send(Reply {
                        recipient: sender,
                        table_id,
                        op: ReplyOp::Progress { worker, clock },
                    })
                    .await
                    .map_err(|e| ParasolError(e.to_string()))
            }
            RequestOp::ResetWorker => model.reset_worker(sender).await,
        }
    }

    #[inline]
    pub fn contains(&self, table_id: TableId) -> bool {
        self.models.contains_key(&table_id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Which id assignment path a `TableIdAllocator` has committed to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum IdAssignMode {
    Auto,
    Explicit,
}

/// Hands out table IDs through a single assignment path. A creator either
/// always takes consecutive auto IDs or always brings explicit IDs; mixing
/// the two is rejected rather than racing a shared counter.
#[derive(Debug, Default)]
pub struct TableIdAllocator {
    next_auto: TableId,
    mode: Option<IdAssignMode>,
    claimed: Vec<TableId>,
}

impl TableIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Auto path: returns the next consecutive table ID.
    pub fn next_id(&mut self) -> Result<TableId, ParasolError> {
        match self.mode {
            Some(IdAssignMode::Explicit) => {
                logged_err!("cannot mix auto table ids with explicit ones")
            }
            _ => {
                self.mode = Some(IdAssignMode::Auto);
                let id = self.next_auto;
                self.next_auto += 1;
                Ok(id)
            }
        }
    }

    /// Explicit path: claims a caller-chosen table ID.
    pub fn claim_id(&mut self, id: TableId) -> Result<TableId, ParasolError> {
        match self.mode {
            Some(IdAssignMode::Auto) => {
                logged_err!("cannot mix explicit table ids with auto ones")
            }
            _ => {
                if self.claimed.contains(&id) {
                    return logged_err!("table id {} claimed twice", id);
                }
                self.mode = Some(IdAssignMode::Explicit);
                self.claimed.push(id);
                Ok(id)
            }
        }
    }
}
