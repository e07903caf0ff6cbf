use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use walb_device::BlockDevice;
use walb_index::{OverlapHandle, OverlapTable, PendingIndex};
use walb_wire::{Lsid, Pbs, SuperBlock, SUPER_BLOCK_MAGIC, SUPER_BLOCK_OFFSET_BYTES};

use crate::bio::BioWrapper;
use crate::completion::complete_wrapper;
use crate::data_submitter::DataSubmitter;
use crate::error::{Result, WalbError};
use crate::log_submitter::LogSubmitter;
use crate::lsid_state::LsidState;
use crate::pack::{Pack, PackBuilder, LBS};
use crate::params::{DiscardPolicy, WalbParams};
use crate::permanence::PermanenceGate;
use crate::queue::WorkQueue;
use crate::state::DeviceState;
use crate::watch::LsidWatch;

const WALB_VERSION: u32 = 1;
/// Default runtime-settable checkpoint interval (spec.md §6,
/// `{get,set}_checkpoint_interval`), unrelated to the creation-time
/// `flush_interval_mb`/`flush_interval_ms`.
const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

enum SubmitItem {
    Write(Arc<BioWrapper>),
    Shutdown,
}

enum DataItem {
    Pack(Arc<Pack>),
    Shutdown,
}

/// One wrapper's data-stage work, carried alongside the pack it belongs
/// to so whichever data-submit worker finishes it can run the
/// completion/GC bookkeeping for that pack (spec.md §4.6, §4.7).
#[derive(Clone)]
struct DataJob {
    pack: Arc<Pack>,
    wrapper: Arc<BioWrapper>,
}

/// Work handed to the data-submit worker pool (spec.md §4.5, §4.6,
/// §5's "Parallel workers on a shared pool").
///
/// `Tracked` carries the [`OverlapHandle`] a predecessor's completion
/// produced when this job's `n_overlapped` reached zero; the worker
/// that processes it must call [`OverlapTable::complete`] with that
/// same handle so its own successors, if any, are in turn discovered
/// and pushed back onto this queue. `Plain` is for discards, which
/// bypass the overlap table entirely (spec.md §4.6 commentary in
/// `DataSubmitter`: discards carry no payload to serialize).
enum ReadyItem {
    Plain(DataJob),
    Tracked(OverlapHandle<DataJob>),
    Shutdown,
}

/// Writes a fresh superblock to `ldev`'s fixed offset (spec.md §6,
/// "format" control operation). `ldev`'s physical block size determines
/// the block the superblock is written as.
///
/// # Errors
///
/// Propagates the device's I/O error, and [`WalbError::InvalidConfig`]
/// if `ldev`'s [`Pbs`] is too small to hold a superblock.
pub fn format_ldev<L: BlockDevice>(
    ldev: &L,
    salt: u32,
    ring_buffer_pb: u64,
    ring_buffer_offset_pb: u64,
    ddev_size_lb: u64,
    uuid: [u8; 16],
) -> Result<()> {
    let pbs = ldev.pbs();
    let sb = SuperBlock {
        magic: SUPER_BLOCK_MAGIC,
        checksum: 0,
        salt,
        physical_bs: pbs.value(),
        logical_bs: LBS,
        snapshot_metadata_size: 0,
        ring_buffer_pb,
        ring_buffer_offset_pb,
        ddev_size_lb,
        uuid,
    };
    let mut buf = vec![0u8; pbs.as_usize()];
    sb.encode(&mut buf)?;
    let block_index = SUPER_BLOCK_OFFSET_BYTES / u64::from(pbs.value());
    ldev.write_at(block_index, &buf)
        .map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
    ldev.flush().map_err(|e| WalbError::LogIo(std::io::Error::other(e)))
}

/// Reads back the superblock a prior [`format_ldev`] wrote.
///
/// # Errors
///
/// Propagates the device's I/O error or a [`WalbError::Wire`] decode
/// failure (bad magic, checksum mismatch).
pub fn read_superblock<L: BlockDevice>(ldev: &L) -> Result<SuperBlock> {
    let pbs = ldev.pbs();
    let mut buf = vec![0u8; pbs.as_usize()];
    let block_index = SUPER_BLOCK_OFFSET_BYTES / u64::from(pbs.value());
    ldev.read_at(block_index, &mut buf)
        .map_err(|e| WalbError::LogIo(std::io::Error::other(e)))?;
    Ok(SuperBlock::decode(&buf)?)
}

/// A running WalB device: the full pipeline of spec.md §4 wired onto a
/// concrete LDEV/DDEV pair, with its two consolidated worker threads
/// (see `SPEC_FULL.md`'s "Concurrency realization") spawned and running.
///
/// Dropping this value does not stop the worker threads; call
/// [`WalbDevice::delete_wdev`] to shut down cleanly, matching the
/// "delete_wdev" control operation of spec.md §6.
pub struct WalbDevice<L, D> {
    params: WalbParams,
    pbs: Pbs,
    ring_buffer_pb: u64,
    ring_buffer_off: u64,
    salt: u32,
    minor_id: u32,

    ldev: Arc<L>,
    ddev: Arc<D>,

    lsid_state: Arc<LsidState>,
    pending: Arc<Mutex<PendingIndex<BioWrapper>>>,
    overlap: Arc<Mutex<OverlapTable<DataJob>>>,
    state: Arc<DeviceState>,
    watch: Arc<LsidWatch>,
    checkpoint_interval: Mutex<Duration>,
    ddev_size_lb: Mutex<u64>,

    submit_queue: Arc<WorkQueue<SubmitItem>>,
    data_queue: Arc<WorkQueue<DataItem>>,
    ready_queue: Arc<WorkQueue<ReadyItem>>,

    threads: Mutex<Option<Threads>>,
}

struct Threads {
    log: JoinHandle<()>,
    dispatch: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<L, D> WalbDevice<L, D>
where
    L: BlockDevice + 'static,
    D: BlockDevice + 'static,
{
    /// Opens a WalB device over `ldev`/`ddev` and spawns its two worker
    /// threads (spec.md §6, "create_wdev").
    ///
    /// # Errors
    ///
    /// Returns [`WalbError::InvalidConfig`] if `params` fails
    /// [`WalbParams::validate`] or if `ldev` and `ddev` do not share a
    /// physical block size -- WalB assumes one PBS per device pair.
    #[allow(clippy::too_many_arguments)]
    pub fn create_wdev(
        params: WalbParams,
        ldev: L,
        ddev: D,
        salt: u32,
        ring_buffer_pb: u64,
        ring_buffer_off: u64,
        start_lsid: Lsid,
        minor_id: u32,
    ) -> Result<Arc<Self>> {
        params.validate()?;
        if ldev.pbs() != ddev.pbs() {
            return Err(WalbError::InvalidConfig("ldev and ddev must share a physical block size"));
        }
        let pbs = ldev.pbs();
        let spb = pbs.value() / LBS;
        let ddev_size_lb = ddev.num_blocks() * u64::from(spb);

        let dev = Arc::new(Self {
            params: params.clone(),
            pbs,
            ring_buffer_pb,
            ring_buffer_off,
            salt,
            minor_id,
            ldev: Arc::new(ldev),
            ddev: Arc::new(ddev),
            lsid_state: Arc::new(LsidState::new(start_lsid)),
            pending: Arc::new(Mutex::new(PendingIndex::new(LBS as usize))),
            overlap: Arc::new(Mutex::new(OverlapTable::new())),
            state: Arc::new(DeviceState::new(minor_id, params.exec_path_on_error.clone())),
            watch: Arc::new(LsidWatch::new()),
            checkpoint_interval: Mutex::new(DEFAULT_CHECKPOINT_INTERVAL),
            ddev_size_lb: Mutex::new(ddev_size_lb),
            submit_queue: Arc::new(WorkQueue::new()),
            data_queue: Arc::new(WorkQueue::new()),
            ready_queue: Arc::new(WorkQueue::new()),
            threads: Mutex::new(None),
        });

        let log_thread = dev.spawn_log_thread();
        let dispatch_thread = dev.spawn_dispatch_thread();
        let workers = (0..params.n_data_workers).map(|_| dev.spawn_data_worker()).collect();
        *dev.threads.lock().unwrap() = Some(Threads {
            log: log_thread,
            dispatch: dispatch_thread,
            workers,
        });

        Ok(dev)
    }

    fn spb(&self) -> u32 {
        self.pbs.value() / LBS
    }

    fn spawn_log_thread(self: &Arc<Self>) -> JoinHandle<()> {
        let submit_queue = Arc::clone(&self.submit_queue);
        let data_queue = Arc::clone(&self.data_queue);
        let lsid_state = Arc::clone(&self.lsid_state);
        let pending = Arc::clone(&self.pending);
        let state = Arc::clone(&self.state);
        let ldev = Arc::clone(&self.ldev);
        let pbs = self.pbs;
        let salt = self.salt;
        let ring_buffer_pb = self.ring_buffer_pb;
        let ring_buffer_off = self.ring_buffer_off;
        let max_logpack_kb = self.params.max_logpack_kb;
        let is_error_before_overflow = self.params.is_error_before_overflow;
        let flush_interval_pb = self.params.flush_interval_pb(pbs.as_usize());
        let flush_interval = self.params.flush_interval;
        let n_io_bulk = self.params.n_io_bulk;

        thread::spawn(move || {
            let mut builder = PackBuilder::new(
                pbs,
                ring_buffer_pb,
                max_logpack_kb,
                is_error_before_overflow,
                flush_interval_pb,
                flush_interval,
            );
            let submitter = LogSubmitter::new(pbs, salt, ring_buffer_pb, ring_buffer_off);

            'outer: loop {
                let items = submit_queue.pop_batch(n_io_bulk);
                let mut batch = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        SubmitItem::Write(w) => batch.push(w),
                        SubmitItem::Shutdown => break 'outer,
                    }
                }
                if batch.is_empty() {
                    continue;
                }
                if state.is_read_only() {
                    for w in batch {
                        w.complete(Err(WalbError::ReadOnly));
                    }
                    continue;
                }

                let (sealed, outcome) = builder.process_batch(batch, &lsid_state);
                if let Err(e) = outcome {
                    tracing::warn!(error = %e, "pack builder failed batch");
                    if matches!(e, WalbError::LogOverflow) {
                        state.handle_overflow();
                    }
                }

                for pack in sealed {
                    if let Err(e) = submitter.submit(&pack, ldev.as_ref()) {
                        tracing::error!(error = %e, "log submit failed, device going read-only");
                        state.set_read_only();
                        for w in &pack.wrappers {
                            w.complete(Err(WalbError::LogIo(std::io::Error::other(e.to_string()))));
                        }
                        continue;
                    }
                    let end = pack.header.logpack_lsid.add_pb(u32::try_from(pack.pack_pb_size()).unwrap());
                    lsid_state.advance_completed(end);

                    let mut pending_guard = pending.lock().unwrap();
                    for w in &pack.wrappers {
                        if !w.is_discard() {
                            pending_guard.insert(Arc::clone(w));
                        }
                    }
                    drop(pending_guard);

                    data_queue.push(DataItem::Pack(pack));
                }
            }
        })
    }

    /// Runs the permanence gate and hands each pack's wrappers off to
    /// the data-submit worker pool via `overlap`/`ready_queue` (spec.md
    /// §4.3, §4.5). Serial by construction, same as the log thread:
    /// the permanence gate's own forced-flush bookkeeping
    /// (`last_flush_at`) is only meaningful with one owner.
    fn spawn_dispatch_thread(self: &Arc<Self>) -> JoinHandle<()> {
        let data_queue = Arc::clone(&self.data_queue);
        let ready_queue = Arc::clone(&self.ready_queue);
        let lsid_state = Arc::clone(&self.lsid_state);
        let pending = Arc::clone(&self.pending);
        let overlap = Arc::clone(&self.overlap);
        let state = Arc::clone(&self.state);
        let watch = Arc::clone(&self.watch);
        let ldev = Arc::clone(&self.ldev);
        let pbs = self.pbs;
        let flush_interval_pb = self.params.flush_interval_pb(pbs.as_usize());
        let flush_interval = self.params.flush_interval;
        let n_pack_bulk = self.params.n_pack_bulk;

        thread::spawn(move || {
            let mut gate = PermanenceGate::new(flush_interval_pb, flush_interval);

            'outer: loop {
                let items = data_queue.pop_batch(n_pack_bulk);
                for item in items {
                    let pack = match item {
                        DataItem::Pack(p) => p,
                        DataItem::Shutdown => break 'outer,
                    };

                    state.begin_gc();
                    let end = pack.header.logpack_lsid.add_pb(u32::try_from(pack.pack_pb_size()).unwrap());
                    if let Err(e) = gate.ensure_permanent(end, &lsid_state, ldev.as_ref()) {
                        tracing::error!(error = %e, "permanence gate failed, device going read-only");
                        state.set_read_only();
                        let mut pending_guard = pending.lock().unwrap();
                        for w in &pack.wrappers {
                            complete_wrapper(
                                w,
                                &pack,
                                &mut pending_guard,
                                &lsid_state,
                                &state,
                                Err(WalbError::LogIo(std::io::Error::other(e.to_string()))),
                            );
                        }
                        continue;
                    }

                    let w = lsid_state.snapshot();
                    watch.notify(w.permanent, w.oldest);

                    for w in &pack.wrappers {
                        let job = DataJob {
                            pack: Arc::clone(&pack),
                            wrapper: Arc::clone(w),
                        };
                        // Discards never touch the overlap table or
                        // pending index: they carry no payload to
                        // serialize or to serve a racing read from.
                        if w.is_discard() {
                            ready_queue.push(ReadyItem::Plain(job));
                            continue;
                        }
                        let mut overlap_guard = overlap.lock().unwrap();
                        let (handle, ready) = overlap_guard.insert(w.pos_lb, w.len_lb, job);
                        drop(overlap_guard);
                        if ready {
                            ready_queue.push(ReadyItem::Tracked(handle));
                        }
                        // Otherwise `handle` stays parked in the overlap
                        // table; the worker that completes its last
                        // overlapping predecessor pushes it once
                        // `OverlapTable::complete` reports it ready.
                    }
                }
            }
        })
    }

    /// One of `n_data_workers` workers pulling overlap-cleared writes
    /// off `ready_queue` and submitting them to DDEV (spec.md §4.6).
    /// Running several of these concurrently is what makes the overlap
    /// table's delay-then-wake mechanism (spec.md §4.5) an actual
    /// concurrency primitive instead of a single-writer invariant that
    /// always holds trivially.
    fn spawn_data_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let ready_queue = Arc::clone(&self.ready_queue);
        let overlap = Arc::clone(&self.overlap);
        let pending = Arc::clone(&self.pending);
        let lsid_state = Arc::clone(&self.lsid_state);
        let state = Arc::clone(&self.state);
        let ddev = Arc::clone(&self.ddev);
        let is_sort_data_io = self.params.is_sort_data_io;

        thread::spawn(move || {
            let submitter = DataSubmitter::new(is_sort_data_io);

            loop {
                let Some(item) = ready_queue.pop_batch(1).into_iter().next() else {
                    continue;
                };
                let (job, handle) = match item {
                    ReadyItem::Shutdown => break,
                    ReadyItem::Plain(job) => (job, None),
                    ReadyItem::Tracked(handle) => (OverlapTable::entry(&handle).clone(), Some(handle)),
                };

                let result = submitter.submit_batch(vec![Arc::clone(&job.wrapper)], ddev.as_ref());
                if let Err(e) = &result {
                    tracing::error!(error = %e, "data write failed, device going read-only");
                    state.set_read_only();
                }

                if let Some(handle) = &handle {
                    let newly_ready = overlap.lock().unwrap().complete(handle);
                    for successor in newly_ready {
                        ready_queue.push(ReadyItem::Tracked(successor));
                    }
                }

                let mut pending_guard = pending.lock().unwrap();
                complete_wrapper(&job.wrapper, &job.pack, &mut pending_guard, &lsid_state, &state, result);
                drop(pending_guard);
            }
        })
    }

    /// Submits a write and blocks until it has landed on the data
    /// device (spec.md §4, full pipeline round trip).
    ///
    /// # Errors
    ///
    /// Returns [`WalbError::ReadOnly`] if the device is already
    /// read-only, [`WalbError::Frozen`] if frozen past
    /// `queue_stop_timeout`, or whatever pipeline error the write
    /// ultimately failed with.
    pub fn write(&self, pos_lb: u64, data: Vec<u8>, is_flush: bool) -> Result<()> {
        if self.state.is_read_only() {
            return Err(WalbError::ReadOnly);
        }
        self.state.wait_while_frozen();
        let len_lb = u32::try_from(data.len() / LBS as usize).expect("data length fits u32 logical blocks");
        self.wait_for_pending_capacity(u64::from(len_lb));
        let checksum = walb_wire::checksum::checksum(&data, self.salt);
        let w = Arc::new(BioWrapper::new_write(pos_lb, len_lb, data, is_flush, checksum));
        self.state.begin_write_bio();
        self.submit_queue.push(SubmitItem::Write(Arc::clone(&w)));
        let result = w.wait();
        self.state.end_write_bio();
        result
    }

    /// Blocks the submitting thread while `pending_sectors + new_len_lb`
    /// would exceed `max_pending_mb`, unfreezing once `pending_sectors`
    /// drops under `min_pending_mb` or `queue_stop_timeout` elapses,
    /// whichever comes first (spec.md §4.4 "Backpressure").
    fn wait_for_pending_capacity(&self, new_len_lb: u64) {
        let lbs = LBS as usize;
        let max = self.params.max_pending_sectors(lbs);
        let min = self.params.min_pending_sectors(lbs);
        let deadline = Instant::now() + self.params.queue_stop_timeout;
        loop {
            let current = self.pending.lock().unwrap().pending_sectors();
            if current + new_len_lb <= max || current < min || Instant::now() >= deadline {
                return;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Submits a zero-length flush, forcing whatever pack is open to
    /// seal and carry a flush-header (spec.md §4.1).
    ///
    /// # Errors
    ///
    /// See [`WalbDevice::write`].
    pub fn flush(&self) -> Result<()> {
        self.write(0, Vec::new(), true)
    }

    /// Submits a discard. Honors [`DiscardPolicy::Elide`] by completing
    /// immediately without entering the pipeline when `ddev` does not
    /// support discard (spec.md §9 open question).
    ///
    /// # Errors
    ///
    /// See [`WalbDevice::write`].
    pub fn discard(&self, pos_lb: u64, len_lb: u32) -> Result<()> {
        if self.state.is_read_only() {
            return Err(WalbError::ReadOnly);
        }
        if matches!(self.params.discard_policy, DiscardPolicy::Elide) && !self.ddev.supports_discard() {
            return Ok(());
        }
        self.state.wait_while_frozen();
        self.wait_for_pending_capacity(1);
        let w = Arc::new(BioWrapper::new_discard(pos_lb, len_lb));
        self.state.begin_write_bio();
        self.submit_queue.push(SubmitItem::Write(Arc::clone(&w)));
        let result = w.wait();
        self.state.end_write_bio();
        result
    }

    /// Reads `[pos_lb, pos_lb + len_lb)`, patching in any bytes from
    /// writes still in flight through the pipeline (spec.md §4.4).
    ///
    /// The pending-index lock is held across both the DDEV read and
    /// the `check_and_copy` patch, not just the latter: a write that
    /// completes and removes itself from the pending index between an
    /// unlocked disk read and a later patch step would let this read
    /// observe neither the pre-write nor the post-write bytes at that
    /// block, violating the read-after-write invariant (spec.md §1(b),
    /// §4.4). This is the one place in the pipeline where a lock spans
    /// disk I/O (normally short critical sections only, spec.md §5);
    /// the kernel driver avoids it by consulting the pending index
    /// while the DDEV read bio is merely enqueued, not yet complete --
    /// `BlockDevice::read_at` here is synchronous, so there is no
    /// "enqueued but not yet complete" window to exploit instead.
    ///
    /// # Errors
    ///
    /// Propagates the data device's read error.
    pub fn read(&self, pos_lb: u64, len_lb: u32) -> Result<Vec<u8>> {
        let spb = u64::from(self.spb());
        let mut buf = vec![0u8; len_lb as usize * LBS as usize];
        let block_index = pos_lb / spb;
        let n_blocks = u64::from(len_lb).div_ceil(spb).max(1);

        let pending_guard = self.pending.lock().unwrap();
        for i in 0..n_blocks {
            let mut block = vec![0u8; self.pbs.as_usize()];
            self.ddev
                .read_at(block_index + i, &mut block)
                .map_err(|e| WalbError::DataIo(std::io::Error::other(e)))?;
            let start = i as usize * self.pbs.as_usize();
            let end = (start + self.pbs.as_usize()).min(buf.len());
            if start < buf.len() {
                buf[start..end].copy_from_slice(&block[..end - start]);
            }
        }
        pending_guard.check_and_copy(pos_lb, len_lb, &mut buf);
        drop(pending_guard);
        Ok(buf)
    }

    // -- Control surface (spec.md §6) --

    #[must_use]
    pub fn get_oldest_lsid(&self) -> Lsid {
        self.lsid_state.snapshot().oldest
    }

    #[must_use]
    pub fn get_written_lsid(&self) -> Lsid {
        self.lsid_state.snapshot().written
    }

    #[must_use]
    pub fn get_permanent_lsid(&self) -> Lsid {
        self.lsid_state.snapshot().permanent
    }

    #[must_use]
    pub fn get_completed_lsid(&self) -> Lsid {
        self.lsid_state.snapshot().completed
    }

    #[must_use]
    pub fn get_log_capacity(&self) -> u64 {
        self.ring_buffer_pb
    }

    #[must_use]
    pub fn get_log_usage(&self) -> u64 {
        self.lsid_state.snapshot().log_usage()
    }

    /// Advances the oldest retained lsid, reclaiming ring-buffer space
    /// (spec.md §6, "set_oldest_lsid"; typically driven by an external
    /// GC tool after it has copied data out of the WAL region).
    ///
    /// # Panics
    ///
    /// Panics (via [`LsidState::set_oldest`]) if `oldest` would move
    /// past `written`.
    pub fn set_oldest_lsid(&self, oldest: Lsid) {
        self.lsid_state.set_oldest(oldest);
        if !self.lsid_state.is_overflowing(self.ring_buffer_pb) {
            self.state.clear_log_overflow();
        }
        let w = self.lsid_state.snapshot();
        self.watch.notify(w.permanent, w.oldest);
    }

    #[must_use]
    pub fn is_log_overflow(&self) -> bool {
        self.state.is_log_overflow()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.is_read_only()
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.state.is_frozen()
    }

    /// Matches spec.md §6's "freeze": blocks new writes from entering
    /// the pipeline and waits for in-flight ones to drain.
    pub fn freeze(&self) {
        self.state.freeze();
    }

    pub fn melt(&self) {
        self.state.melt();
    }

    #[must_use]
    pub fn is_flush_capable(&self) -> bool {
        !PermanenceGate::new(self.params.flush_interval_pb(self.pbs.as_usize()), self.params.flush_interval).is_noop()
    }

    #[must_use]
    pub fn get_version(&self) -> u32 {
        WALB_VERSION
    }

    #[must_use]
    pub fn watch(&self) -> &LsidWatch {
        &self.watch
    }

    /// Clears the log entirely, resetting every watermark to `lsid`
    /// (spec.md §6, "reset_wal"). Callers must [`WalbDevice::freeze`]
    /// first to guarantee no write is mid-flight.
    pub fn reset_wal(&self, lsid: Lsid) {
        debug_assert!(self.state.is_frozen(), "reset_wal requires the device to be frozen");
        self.lsid_state.set_oldest(lsid.min(self.lsid_state.snapshot().written));
        let w = self.lsid_state.snapshot();
        self.watch.notify(w.permanent, w.oldest);
    }

    /// Shuts down the log, dispatch, and every data-submit worker thread
    /// cleanly (spec.md §6, "delete_wdev"). Blocks until all have
    /// drained their queues.
    pub fn delete_wdev(&self) {
        self.submit_queue.push(SubmitItem::Shutdown);
        self.data_queue.push(DataItem::Shutdown);
        for _ in 0..self.params.n_data_workers {
            self.ready_queue.push(ReadyItem::Shutdown);
        }
        if let Some(threads) = self.threads.lock().unwrap().take() {
            let _ = threads.log.join();
            let _ = threads.dispatch.join();
            for worker in threads.workers {
                let _ = worker.join();
            }
        }
    }

    /// Current runtime-settable checkpoint interval (spec.md §6,
    /// "get_checkpoint_interval"). Distinct from the creation-time
    /// `flush_interval_mb`/`flush_interval_ms`, which forces a pack to
    /// become permanent once enough bytes accumulate; this value is
    /// advisory metadata for a superblock checkpoint writer and, like
    /// `is_sync_superblock`, is not relied on by the pipeline for
    /// correctness -- no thread in this crate currently reads it back.
    #[must_use]
    pub fn get_checkpoint_interval(&self) -> Duration {
        *self.checkpoint_interval.lock().unwrap()
    }

    /// Sets the checkpoint interval reported by
    /// [`WalbDevice::get_checkpoint_interval`] (spec.md §6,
    /// "set_checkpoint_interval").
    pub fn set_checkpoint_interval(&self, interval: Duration) {
        *self.checkpoint_interval.lock().unwrap() = interval;
    }

    /// Current logical size of the data device as WalB understands it
    /// (spec.md §6, queried alongside "resize").
    #[must_use]
    pub fn get_ddev_size_lb(&self) -> u64 {
        *self.ddev_size_lb.lock().unwrap()
    }

    /// Updates the logical size WalB reports for the data device
    /// (spec.md §6, "resize"). Only grows the stored value -- shrinking
    /// would strand already-acknowledged writes above the new bound --
    /// and never past the data device's actual capacity.
    ///
    /// # Errors
    ///
    /// Returns [`WalbError::InvalidConfig`] if `new_ddev_size_lb` is
    /// smaller than the current size or exceeds `ddev`'s real capacity.
    pub fn resize(&self, new_ddev_size_lb: u64) -> Result<()> {
        let capacity_lb = self.ddev.num_blocks() * u64::from(self.spb());
        if new_ddev_size_lb > capacity_lb {
            return Err(WalbError::InvalidConfig("resize target exceeds data device capacity"));
        }
        let mut size = self.ddev_size_lb.lock().unwrap();
        if new_ddev_size_lb < *size {
            return Err(WalbError::InvalidConfig("resize cannot shrink the data device"));
        }
        *size = new_ddev_size_lb;
        Ok(())
    }
}

static NEXT_MINOR_ID: AtomicU32 = AtomicU32::new(0);

/// Allocates a fresh minor id for a new device, the way the real driver
/// hands out block-device minor numbers (spec.md §6).
#[must_use]
pub fn next_minor_id() -> u32 {
    NEXT_MINOR_ID.fetch_add(1, Ordering::Relaxed)
}
