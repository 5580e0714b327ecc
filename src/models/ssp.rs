//! Consistency model: stale-synchronous parallel.
//!
//! A read may run up to `staleness` rounds ahead of the slowest worker;
//! beyond that it is parked at the min-clock level that will make it
//! serveable. Updates accumulate into storage eagerly, trading bounded
//! staleness for throughput.

use std::path::{Path, PathBuf};

use crate::models::{
    dump_if_due, send_read_reply, send_reset_ack, snapshot_path,
};
use crate::server::{
    ClockVal, Key, PendingBuffer, PendingGet, ProgressTracker, Reply,
    ServerId, SlotVal, Storage, TableId, WorkerId,
};
use crate::utils::ParasolError;

use tokio::sync::mpsc;

/// Ssp model instance.
pub struct SspModel<V: SlotVal> {
    /// Table ID of this model instance.
    table_id: TableId,

    /// Hosting server thread's ID.
    server_id: ServerId,

    /// Max rounds a read may lead the slowest worker by.
    staleness: ClockVal,

    /// Snapshot every this many min-clock advances; 0 means never.
    dump_interval: ClockVal,

    /// Directory snapshots are written into.
    dump_dir: PathBuf,

    /// Storage shard owned by this instance.
    storage: Storage<V>,

    /// Per-worker logical clocks.
    tracker: ProgressTracker,

    /// Reads parked beyond the staleness bound, keyed by the min-clock
    /// level that releases them.
    pending: PendingBuffer,

    /// Shared reply queue of the hosting server thread.
    tx_reply: mpsc::Sender<Reply<V>>,
}

impl<V: SlotVal> SspModel<V> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        table_id: TableId,
        server_id: ServerId,
        staleness: ClockVal,
        dump_interval: ClockVal,
        dump_dir: PathBuf,
        workers: &[WorkerId],
        storage: Storage<V>,
        tx_reply: mpsc::Sender<Reply<V>>,
    ) -> Self {
        let mut tracker = ProgressTracker::new();
        tracker.init(workers);
        SspModel {
            table_id,
            server_id,
            staleness,
            dump_interval,
            dump_dir,
            storage,
            tracker,
            pending: PendingBuffer::new(),
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

    /// Serves a read within the staleness bound immediately; otherwise
    /// parks it at level `clock - staleness`, the min clock at which it
    /// becomes serveable.
    pub async fn get(
        &mut self,
        sender: WorkerId,
        clock: ClockVal,
        keys: Vec<Key>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        let min_clock = self.tracker.min_clock();
        if clock < min_clock {
            pf_warn!(
                "table {} stale get from worker {}: clock {} < min {}",
                self.table_id,
                sender,
                clock,
                min_clock
            );
        }
        if clock <= min_clock + self.staleness {
            send_read_reply(
                &self.tx_reply,
                &self.storage,
                self.table_id,
                sender,
                keys,
                chunked,
            )
            .await
        } else {
            self.pending.push(
                clock - self.staleness,
                PendingGet {
                    sender,
                    keys,
                    chunked,
                },
            );
            Ok(())
        }
    }

    /// Advances the sender's clock; each min-clock increment releases the
    /// bucket at the new level.
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
        let updated_min = self.tracker.advance(sender)?;
        let progress = self.tracker.progress_of(sender).unwrap_or(0);
        if progress > self.tracker.min_clock() + self.staleness + 1 {
            return logged_err!(
                "table {} worker {} clocked to {} past staleness bound ({} + {})",
                self.table_id,
                sender,
                progress,
                self.tracker.min_clock(),
                self.staleness
            );
        }
        if let Some(new_min) = updated_min {
            self.release_level(new_min).await?;
        }
        Ok(())
    }

    /// Removes a departed worker, releasing any levels its lag was holding
    /// back.
    pub async fn reset_worker(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        let dropped = self.pending.drop_worker(sender);
        if dropped > 0 {
            pf_debug!(
                "table {} dropped {} pending gets of worker {}",
                self.table_id,
                dropped,
                sender
            );
        }
        let old_min = self.tracker.min_clock();
        if let Some(new_min) = self.tracker.remove(sender) {
            for level in (old_min + 1)..=new_min {
                self.release_level(level).await?;
            }
        }
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

    /// Number of reads parked at a release level.
    #[inline]
    pub fn pending_len_at(&self, level: ClockVal) -> usize {
        self.pending.len_at(level)
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

    /// Releases the bucket at a freshly reached min-clock level, then
    /// snapshots if due.
    async fn release_level(
        &mut self,
        new_min: ClockVal,
    ) -> Result<(), ParasolError> {
        for get in self.pending.pop(new_min) {
            send_read_reply(
                &self.tx_reply,
                &self.storage,
                self.table_id,
                get.sender,
                get.keys,
                get.chunked,
            )
            .await?;
        }
        dump_if_due(
            &self.storage,
            self.dump_interval,
            new_min,
            &self.dump_dir,
            self.table_id,
            self.server_id,
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod ssp_tests {
    use super::*;
    use crate::server::{MapStorage, ReplyOp};

    fn new_model(
        staleness: ClockVal,
        workers: &[WorkerId],
    ) -> (SspModel<f32>, mpsc::Receiver<Reply<f32>>) {
        let (tx_reply, rx_reply) = mpsc::channel(64);
        let model = SspModel::new(
            0,
            0,
            staleness,
            0,
            "/tmp".into(),
            workers,
            Storage::Map(MapStorage::new(1)),
            tx_reply,
        );
        (model, rx_reply)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn staleness_two_release() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(2, &[1, 2, 3]);

        // worker 1 runs to clock 3 while the others sit at 0
        model.clock(1).await?;
        model.clock(1).await?;
        model.clock(1).await?;
        model.add(1, 3, vec![5], vec![1.0], false)?;

        // 3 > 0 + 2: the read is parked at level 3 - 2 = 1
        model.get(1, 3, vec![5], false).await?;
        assert!(rx_reply.try_recv().is_err());
        assert_eq!(model.pending_len_at(1), 1);

        model.clock(2).await?;
        assert!(rx_reply.try_recv().is_err());
        model.clock(3).await?;

        // min clock 1: 3 <= 1 + 2, so the read is released
        let reply = rx_reply.try_recv().unwrap();
        assert_eq!(reply.recipient, 1);
        assert_eq!(
            reply.op,
            ReplyOp::Get {
                keys: vec![5],
                vals: vec![1.0]
            }
        );
        assert_eq!(model.min_clock(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_within_bound_are_immediate() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(2, &[1, 2]);
        model.add(1, 0, vec![0], vec![4.0], false)?;

        model.clock(1).await?;
        model.clock(1).await?;
        // worker 1 at clock 2, min 0: 2 <= 0 + 2 serves immediately and
        // observes worker-ahead updates (bounded staleness, not isolation)
        model.get(1, 2, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![4.0]
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn clock_past_staleness_bound_is_fatal() -> Result<(), ParasolError>
    {
        let (mut model, _rx_reply) = new_model(1, &[1, 2]);
        model.clock(1).await?;
        model.clock(1).await?;
        // a third advance puts worker 1 at 3 > 0 + 1 + 1
        assert!(model.clock(1).await.is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reset_worker_releases_levels() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(2, &[1, 2]);

        model.clock(1).await?;
        model.clock(1).await?;
        model.clock(1).await?;
        model.get(1, 3, vec![0], false).await?;
        assert_eq!(model.pending_len_at(1), 1);

        // worker 2 departs at clock 0; min jumps 0 -> 3 and level 1 fires
        model.reset_worker(2).await?;
        let reply = rx_reply.try_recv().unwrap();
        assert_eq!(reply.recipient, 1);
        let ack = rx_reply.try_recv().unwrap();
        assert_eq!(ack.op, ReplyOp::ResetWorker);
        assert_eq!(model.min_clock(), 3);
        Ok(())
    }
}
