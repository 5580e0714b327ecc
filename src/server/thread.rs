//! Server thread actor: owns a disjoint set of model instances and
//! serializes every operation on them.
//!
//! All per-model ordering guarantees come from this loop being the single
//! consumer of its request channel; no locking happens inside a model.

use std::path::PathBuf;

use crate::server::{Reply, Request, ServerId, SlotVal, TableConfig, TableRegistry};
use crate::utils::ParasolError;

use tokio::sync::{mpsc, watch};

/// One server thread hosting its shard of every table it serves.
pub struct ServerThread<V: SlotVal> {
    /// My server thread ID.
    id: ServerId,

    /// Table registry, populated during the init phase.
    registry: TableRegistry<V>,
}

impl<V: SlotVal> ServerThread<V> {
    /// Creates a new server thread with an empty registry. Replies from all
    /// hosted models go to the shared `tx_reply` queue; a full queue blocks
    /// the thread, which is the intended back-pressure on workers.
    pub fn new(
        id: ServerId,
        dump_dir: PathBuf,
        tx_reply: mpsc::Sender<Reply<V>>,
    ) -> Self {
        ServerThread {
            id,
            registry: TableRegistry::new(id, dump_dir, tx_reply),
        }
    }

    #[inline]
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Constructs this thread's shard of a table. Init phase only; the
    /// registry does not grow once `run` has consumed the thread.
    pub fn create_table(
        &mut self,
        config: TableConfig,
    ) -> Result<(), ParasolError> {
        self.registry.create_table(config)
    }

    /// Main event loop. Pulls requests off the channel one at a time and
    /// dispatches them; a fatal dispatch error aborts the thread. Returns
    /// cleanly on termination signal or when all request senders are gone.
    pub async fn run(
        mut self,
        mut rx_req: mpsc::Receiver<Request<V>>,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ParasolError> {
        pf_info!("server thread {} entering event loop", self.id);
        loop {
            tokio::select! {
                req = rx_req.recv() => {
                    match req {
                        Some(req) => {
                            if let Err(e) = self.registry.dispatch(req).await {
                                pf_error!(
                                    "server thread {} aborting: {}",
                                    self.id,
                                    e
                                );
                                return Err(e);
                            }
                        }
                        None => {
                            pf_info!(
                                "server thread {} request channel closed",
                                self.id
                            );
                            break;
                        }
                    }
                },

                _ = rx_term.changed() => {
                    pf_warn!(
                        "server thread {} caught termination signal",
                        self.id
                    );
                    break;
                }
            }
        }
        Ok(())
    }
}
