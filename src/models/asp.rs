//! Consistency model: asynchronous parallel.
//!
//! No barriers and no staleness bound: every read is served from current
//! storage, every update lands immediately. The progress tracker is kept
//! only for progress queries and the snapshot cadence.

use std::path::{Path, PathBuf};

use crate::models::{dump_if_due, send_read_reply, send_reset_ack, snapshot_path};
use crate::server::{
    ClockVal, Key, ProgressTracker, Reply, ServerId, SlotVal, Storage,
    TableId, WorkerId,
};
use crate::utils::ParasolError;

use tokio::sync::mpsc;

/// Asp model instance.
pub struct AspModel<V: SlotVal> {
    /// Table ID of this model instance.
    table_id: TableId,

    /// Hosting server thread's ID.
    server_id: ServerId,

    /// Snapshot every this many min-clock advances; 0 means never.
    dump_interval: ClockVal,

    /// Directory snapshots are written into.
    dump_dir: PathBuf,

    /// Storage shard owned by this instance.
    storage: Storage<V>,

    /// Per-worker logical clocks.
    tracker: ProgressTracker,

    /// Shared reply queue of the hosting server thread.
    tx_reply: mpsc::Sender<Reply<V>>,
}

impl<V: SlotVal> AspModel<V> {
    pub(crate) fn new(
        table_id: TableId,
        server_id: ServerId,
        dump_interval: ClockVal,
        dump_dir: PathBuf,
        workers: &[WorkerId],
        storage: Storage<V>,
        tx_reply: mpsc::Sender<Reply<V>>,
    ) -> Self {
        let mut tracker = ProgressTracker::new();
        tracker.init(workers);
        AspModel {
            table_id,
            server_id,
            dump_interval,
            dump_dir,
            storage,
            tracker,
            tx_reply,
        }
    }

    /// Applies an update to storage immediately.
    pub fn add(
        &mut self,
        _sender: WorkerId,
        _clock: ClockVal,
        keys: Vec<Key>,
        vals: Vec<V>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        if chunked {
            self.storage.add_chunk(&keys, &vals)
        } else {
            self.storage.add(&keys, &vals)
        }
    }

    /// Serves every read immediately from current storage.
    pub async fn get(
        &mut self,
        sender: WorkerId,
        keys: Vec<Key>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        send_read_reply(
            &self.tx_reply,
            &self.storage,
            self.table_id,
            sender,
            keys,
            chunked,
        )
        .await
    }

    /// Advances the sender's clock; nothing waits, so a min-clock increase
    /// only drives the snapshot cadence.
    pub async fn clock(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        if !self.tracker.contains(sender) {
            pf_warn!(
                "table {} clock from unregistered worker {}",
                self.table_id,
                sender
            );
            return Ok(());
        }
        if let Some(new_min) = self.tracker.advance(sender)? {
            dump_if_due(
                &self.storage,
                self.dump_interval,
                new_min,
                &self.dump_dir,
                self.table_id,
                self.server_id,
            )
            .await;
        }
        Ok(())
    }

    /// Removes a departed worker and acks; there is nothing pending to
    /// release.
    pub async fn reset_worker(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        self.tracker.remove(sender);
        send_reset_ack(&self.tx_reply, self.table_id, sender).await
    }

    /// Current clock of a worker, `None` if it is not registered.
    #[inline]
    pub fn progress_of(&self, worker: WorkerId) -> Option<ClockVal> {
        self.tracker.progress_of(worker)
    }

    /// Current min clock of the table.
    #[inline]
    pub fn min_clock(&self) -> ClockVal {
        self.tracker.min_clock()
    }

    /// Snapshots storage to the model's default dump path.
    pub async fn dump(&self) -> Result<(), ParasolError> {
        let path =
            snapshot_path(&self.dump_dir, self.table_id, self.server_id);
        self.storage.write_to(&path).await
    }

    /// Reloads storage from a snapshot file.
    pub async fn load(&mut self, path: &Path) -> Result<(), ParasolError> {
        self.storage.load_from(path).await
    }
}

#[cfg(test)]
mod asp_tests {
    use super::*;
    use crate::server::{MapStorage, ReplyOp};

    fn new_model(
        workers: &[WorkerId],
    ) -> (AspModel<f32>, mpsc::Receiver<Reply<f32>>) {
        let (tx_reply, rx_reply) = mpsc::channel(64);
        let model = AspModel::new(
            0,
            0,
            0,
            "/tmp".into(),
            workers,
            Storage::Map(MapStorage::new(1)),
            tx_reply,
        );
        (model, rx_reply)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_never_wait() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);

        // worker 1 races far ahead of worker 2; reads still serve instantly
        for _ in 0..10 {
            model.clock(1).await?;
        }
        model.add(1, 10, vec![0], vec![2.5], false)?;
        model.get(1, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![2.5]
            }
        );
        assert_eq!(model.min_clock(), 0);
        assert_eq!(model.progress_of(1), Some(10));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_observe_other_workers_updates() -> Result<(), ParasolError>
    {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);
        model.add(2, 0, vec![3], vec![1.0], false)?;
        model.add(1, 0, vec![3], vec![2.0], false)?;
        model.get(2, vec![3], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![3],
                vals: vec![3.0]
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reset_worker_acks() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);
        model.reset_worker(2).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::ResetWorker
        );
        assert_eq!(model.progress_of(2), None);
        Ok(())
    }
}
