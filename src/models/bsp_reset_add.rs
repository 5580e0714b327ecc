//! Consistency model: bulk-synchronous with reset-then-accumulate rounds.
//!
//! A Bsp variant for per-round reductions (e.g. all-reduce of a full
//! gradient). Updates are staged in a per-round buffer instead of storage;
//! when the barrier fires, storage is cleared and the buffer is drained
//! into it in arrival order, so storage holds exactly one round's sum.

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

/// An update staged for the current round.
struct BufferedAdd<V> {
    sender: WorkerId,
    keys: Vec<Key>,
    vals: Vec<V>,
    chunked: bool,
}

/// BspResetAdd model instance: Bsp composed with an add-staging stage.
pub struct BspResetAddModel<V: SlotVal> {
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

    /// Reads parked until their round's barrier.
    pending: PendingBuffer,

    /// Updates staged for the current round, in arrival order.
    add_buffer: Vec<BufferedAdd<V>>,

    /// Shared reply queue of the hosting server thread.
    tx_reply: mpsc::Sender<Reply<V>>,
}

impl<V: SlotVal> BspResetAddModel<V> {
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
        BspResetAddModel {
            table_id,
            server_id,
            dump_interval,
            dump_dir,
            storage,
            tracker,
            pending: PendingBuffer::new(),
            add_buffer: Vec::new(),
            tx_reply,
        }
    }

    /// Stages an update for the current round. The sender must still be in
    /// the round the barrier will close, or the round's sum would be
    /// polluted.
    pub fn add(
        &mut self,
        sender: WorkerId,
        _clock: ClockVal,
        keys: Vec<Key>,
        vals: Vec<V>,
        chunked: bool,
    ) -> Result<(), ParasolError> {
        let progress = match self.tracker.progress_of(sender) {
            Some(progress) => progress,
            None => {
                return logged_err!(
                    "table {} add from unregistered worker {}",
                    self.table_id,
                    sender
                );
            }
        };
        if progress != self.tracker.min_clock() {
            return logged_err!(
                "table {} worker {} added at clock {} past barrier {}",
                self.table_id,
                sender,
                progress,
                self.tracker.min_clock()
            );
        }
        self.add_buffer.push(BufferedAdd {
            sender,
            keys,
            vals,
            chunked,
        });
        Ok(())
    }

    /// Serves a read at or below the barrier immediately; parks it at its
    /// clock level otherwise.
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
        if clock <= min_clock {
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
                clock,
                PendingGet {
                    sender,
                    keys,
                    chunked,
                },
            );
            Ok(())
        }
    }

    /// Advances the sender's clock; a min-clock increase closes the round.
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
        if progress > self.tracker.min_clock() + 1 {
            return logged_err!(
                "table {} worker {} clocked to {} past barrier {}",
                self.table_id,
                sender,
                progress,
                self.tracker.min_clock()
            );
        }
        if let Some(new_min) = updated_min {
            self.fire_barrier(new_min).await?;
        }
        Ok(())
    }

    /// Removes a departed worker along with its staged updates; if it was
    /// holding the barrier back, the stalled rounds fire now.
    pub async fn reset_worker(
        &mut self,
        sender: WorkerId,
    ) -> Result<(), ParasolError> {
        let dropped = self.pending.drop_worker(sender);
        let staged = self.add_buffer.len();
        self.add_buffer.retain(|add| add.sender != sender);
        if dropped > 0 || staged > self.add_buffer.len() {
            pf_debug!(
                "table {} dropped {} pending gets and {} staged adds of worker {}",
                self.table_id,
                dropped,
                staged - self.add_buffer.len(),
                sender
            );
        }
        let old_min = self.tracker.min_clock();
        if let Some(new_min) = self.tracker.remove(sender) {
            for level in (old_min + 1)..=new_min {
                self.fire_barrier(level).await?;
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

    /// Number of reads parked at a clock level.
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

    /// Barrier routine: reset storage, drain the round's staged updates
    /// into it in arrival order, run the post-iteration hook, snapshot if
    /// due, then release the round's parked reads.
    async fn fire_barrier(
        &mut self,
        new_min: ClockVal,
    ) -> Result<(), ParasolError> {
        self.storage.clear();
        for add in std::mem::take(&mut self.add_buffer) {
            if add.chunked {
                self.storage.add_chunk(&add.keys, &add.vals)?;
            } else {
                self.storage.add(&add.keys, &add.vals)?;
            }
        }
        self.storage.finish_iter();
        dump_if_due(
            &self.storage,
            self.dump_interval,
            new_min,
            &self.dump_dir,
            self.table_id,
            self.server_id,
        )
        .await;
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
        Ok(())
    }
}

#[cfg(test)]
mod bsp_reset_add_tests {
    use super::*;
    use crate::server::{MapStorage, ReplyOp};

    fn new_model(
        workers: &[WorkerId],
    ) -> (BspResetAddModel<f32>, mpsc::Receiver<Reply<f32>>) {
        let (tx_reply, rx_reply) = mpsc::channel(64);
        let model = BspResetAddModel::new(
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
    async fn round_sums_then_resets() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);

        // round 0: both workers contribute to key 0
        model.add(1, 0, vec![0], vec![10.0], false)?;
        model.add(2, 0, vec![0], vec![20.0], false)?;
        model.clock(1).await?;
        model.clock(2).await?;

        model.get(1, 1, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![30.0]
            }
        );

        // round 1: storage resets before the new sum lands
        model.add(1, 1, vec![0], vec![1.0], false)?;
        model.clock(1).await?;
        model.clock(2).await?;
        model.get(1, 2, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![1.0]
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn staged_adds_invisible_before_barrier() -> Result<(), ParasolError>
    {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);
        model.add(1, 0, vec![0], vec![10.0], false)?;
        // a read at the current round sees untouched storage
        model.get(2, 0, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![0.0]
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn parked_reads_release_at_barrier() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);
        model.add(1, 0, vec![3], vec![7.0], false)?;
        model.get(1, 1, vec![3], false).await?;
        model.clock(1).await?;
        assert!(rx_reply.try_recv().is_err());

        model.add(2, 0, vec![3], vec![5.0], false)?;
        model.clock(2).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![3],
                vals: vec![12.0]
            }
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn add_past_barrier_is_fatal() -> Result<(), ParasolError> {
        let (mut model, _rx_reply) = new_model(&[1, 2]);
        model.clock(1).await?;
        // worker 1 is one round ahead; contributing now would pollute the
        // round worker 2 is still computing
        assert!(model.add(1, 1, vec![0], vec![1.0], false).is_err());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn add_from_unregistered_is_fatal() {
        let (mut model, _rx_reply) = new_model(&[1]);
        assert!(model.add(9, 0, vec![0], vec![1.0], false).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reset_worker_discards_staged_adds() -> Result<(), ParasolError> {
        let (mut model, mut rx_reply) = new_model(&[1, 2]);
        model.add(1, 0, vec![0], vec![10.0], false)?;
        model.add(2, 0, vec![0], vec![20.0], false)?;
        model.clock(1).await?;

        // worker 2 departs; its contribution must not survive into the sum
        model.reset_worker(2).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::ResetWorker
        );
        model.get(1, 1, vec![0], false).await?;
        assert_eq!(
            rx_reply.try_recv().unwrap().op,
            ReplyOp::Get {
                keys: vec![0],
                vals: vec![10.0]
            }
        );
        Ok(())
    }
}
