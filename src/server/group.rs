//! Server group lifecycle: build every server thread, create tables across
//! them, start everything, stop everything.

use std::collections::HashMap;

use crate::models::{ModelType, StorageType};
use crate::server::{
    ClockVal, KeyRange, Reply, Request, ServerId, SlotVal, TableConfig,
    TableId, TableIdAllocator, ServerThread, WorkerId,
};
use crate::utils::ParasolError;

use serde::Deserialize;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Number of server threads to host.
    pub num_threads: usize,

    /// Per-thread request channel capacity.
    pub chan_req_cap: usize,

    /// Shared reply channel capacity; a full reply channel back-pressures
    /// the server threads.
    pub chan_reply_cap: usize,

    /// Directory snapshot dumps are written into.
    pub dump_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            num_threads: 1,
            chan_req_cap: 4096,
            chan_reply_cap: 4096,
            dump_dir: "/tmp/parasol".into(),
        }
    }
}

/// Group-level creation parameters of one table; the per-thread key range
/// is supplied separately at creation time.
#[derive(Debug, Clone)]
pub struct TableParams {
    /// Explicit table ID, or `None` to take the next consecutive one. A
    /// group accepts one assignment style only, never a mix.
    pub table_id: Option<TableId>,

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

    /// Workers registered to the table.
    pub workers: Vec<WorkerId>,
}

/// A set of server threads under construction. Tables are created here
/// during the init phase; `start` hands back a running handle.
pub struct ServerGroup<V: SlotVal> {
    config: ServerConfig,
    threads: Vec<ServerThread<V>>,
    id_alloc: TableIdAllocator,
    rx_reply: mpsc::Receiver<Reply<V>>,
}

impl<V: SlotVal> ServerGroup<V> {
    /// Creates the group's server threads and the shared reply channel.
    /// `config_str` overlays fields of the default `ServerConfig` as TOML.
    pub fn new(config_str: Option<&str>) -> Result<Self, ParasolError> {
        let config = parsed_config!(config_str => ServerConfig;
                                    num_threads, chan_req_cap,
                                    chan_reply_cap, dump_dir)?;
        if config.num_threads == 0 {
            return logged_err!(
                "invalid config.num_threads {}",
                config.num_threads
            );
        }
        if config.chan_req_cap == 0 {
            return logged_err!(
                "invalid config.chan_req_cap {}",
                config.chan_req_cap
            );
        }
        if config.chan_reply_cap == 0 {
            return logged_err!(
                "invalid config.chan_reply_cap {}",
                config.chan_reply_cap
            );
        }

        let (tx_reply, rx_reply) = mpsc::channel(config.chan_reply_cap);
        let threads = (0..config.num_threads)
            .map(|id| {
                ServerThread::new(
                    id as ServerId,
                    config.dump_dir.clone().into(),
                    tx_reply.clone(),
                )
            })
            .collect();

        Ok(ServerGroup {
            config,
            threads,
            id_alloc: TableIdAllocator::new(),
            rx_reply,
        })
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Creates a table across all server threads, one key range per thread.
    /// Returns the assigned table ID.
    pub fn create_table(
        &mut self,
        params: &TableParams,
        ranges: &[KeyRange],
    ) -> Result<TableId, ParasolError> {
        if ranges.len() != self.threads.len() {
            return logged_err!(
                "got {} ranges for {} server threads",
                ranges.len(),
                self.threads.len()
            );
        }
        let table_id = match params.table_id {
            Some(id) => self.id_alloc.claim_id(id)?,
            None => self.id_alloc.next_id()?,
        };
        for (thread, range) in self.threads.iter_mut().zip(ranges.iter()) {
            thread.create_table(TableConfig {
                table_id,
                model_type: params.model_type,
                storage_type: params.storage_type,
                staleness: params.staleness,
                chunk_size: params.chunk_size,
                dump_interval: params.dump_interval,
                range: *range,
                workers: params.workers.clone(),
            })?;
        }
        Ok(table_id)
    }

    /// Creates a table over `[0, n_keys)` with the default range planner.
    pub fn create_table_even(
        &mut self,
        params: &TableParams,
        n_keys: u64,
    ) -> Result<TableId, ParasolError> {
        let ranges = KeyRange::split(n_keys, self.threads.len())?;
        self.create_table(params, &ranges)
    }

    /// Spawns every server thread onto the runtime and returns the running
    /// group handle.
    pub fn start(self) -> ServerGroupHandle<V> {
        let (tx_term, rx_term) = watch::channel(false);
        let mut req_txs = HashMap::with_capacity(self.threads.len());
        let mut thread_handles = Vec::with_capacity(self.threads.len());
        for thread in self.threads {
            let (tx_req, rx_req) = mpsc::channel(self.config.chan_req_cap);
            req_txs.insert(thread.id(), tx_req);
            thread_handles.push((
                thread.id(),
                tokio::spawn(thread.run(rx_req, rx_term.clone())),
            ));
        }
        pf_info!("started {} server threads", thread_handles.len());
        ServerGroupHandle {
            req_txs,
            rx_reply: self.rx_reply,
            tx_term,
            thread_handles,
        }
    }
}

/// Handle to a running server group.
pub struct ServerGroupHandle<V: SlotVal> {
    /// Per-thread request channel senders.
    req_txs: HashMap<ServerId, mpsc::Sender<Request<V>>>,

    /// Shared reply channel receiver (the transport's end).
    rx_reply: mpsc::Receiver<Reply<V>>,

    /// Termination signal to all threads.
    tx_term: watch::Sender<bool>,

    /// Join handles of the spawned server threads.
    thread_handles: Vec<(ServerId, JoinHandle<Result<(), ParasolError>>)>,
}

impl<V: SlotVal> ServerGroupHandle<V> {
    /// Submits a request to a server thread's queue, awaiting capacity.
    pub async fn submit(
        &self,
        server_id: ServerId,
        req: Request<V>,
    ) -> Result<(), ParasolError> {
        match self.req_txs.get(&server_id) {
            Some(tx_req) => tx_req
                .send(req)
                .await
                .map_err(|e| ParasolError(e.to_string())),
            None => {
                logged_err!("unknown server thread id {}", server_id)
            }
        }
    }

    /// Waits for the next reply from any hosted model.
    pub async fn recv_reply(&mut self) -> Result<Reply<V>, ParasolError> {
        match self.rx_reply.recv().await {
            Some(reply) => Ok(reply),
            None => logged_err!("reply channel has been closed"),
        }
    }

    /// Signals termination, then joins every server thread. A thread that
    /// aborted on a fatal error surfaces that error here.
    pub async fn stop(self) -> Result<(), ParasolError> {
        if self.tx_term.send(true).is_err() {
            pf_warn!("no live server threads to signal");
        }
        drop(self.req_txs);
        let mut result = Ok(());
        for (id, handle) in self.thread_handles {
            if let Err(e) = handle.await? {
                pf_error!("server thread {} exited with error: {}", id, e);
                result = Err(e);
            }
        }
        pf_info!("stopped all server threads");
        result
    }
}
