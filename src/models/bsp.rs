//! Consistency model: bulk-synchronous parallel.
//!
//! Workers proceed in lockstep rounds. Updates accumulate into storage
//! eagerly, but a read posted for a round ahead of the slowest worker is
//! parked until that round's barrier fires, so barrier-gated readers never
//! observe a round they have not reached.

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

/// Bsp model instance.
pub struct BspModel<V: SlotVal> {
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

    /// Shared reply queue of the hosting server thread.
    tx_reply: mpsc::Sender<Reply<V>>,
}

impl<V: SlotVal> BspModel<V> {
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
        BspModel {
            table_id,
            server_id,
            dump_interval,
            dump_dir,
            storage,
            tracker,
            pending: PendingBuffer::new(),
            tx_reply,
        }
    }

    /// Applies an update to storage. Accumulation is eager; visibility is
    /// gated on the reader side by the pending buffer.
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
            // stale read; indicates a client bug but is harmless to serve
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

    /// Advances the sender's clock; a min-clock increase fires the barrier.
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

    /// Removes a departed worker. If it was holding the barrier back, the
    /// rounds it was stalling fire now.
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

    /// Barrier routine: release the round's parked reads in FIFO order,
    /// run the storage post-iteration hook, then snapshot if due.
    async fn fire_barrier(
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
        Ok(())
    }
}
