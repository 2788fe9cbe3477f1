//! Main Scanner Module
//!
//! Orchestrates multi-volume scans. Each volume gets its own worker that
//! enumerates the USN data, resolves paths and filters; survivors from every
//! worker are merged into one bounded channel that the caller drains as an
//! iterator.

use crate::error::{MftScanError, Result, VolumeFailure};
use crate::filter::ScanFilter;
use crate::ntfs::structs::DEFAULT_ENUM_BUFFER_SIZE;
use crate::ntfs::{EnumerationStats, UsnDevice, UsnEntry, UsnEnumerator};
use crate::resolver::{resolve_paths, ResolveStats};
use crate::volume::VolumeId;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ============================================================================
// Scanner Configuration
// ============================================================================

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Output buffer size for each FSCTL_ENUM_USN_DATA request
    pub buffer_size: usize,
    /// Capacity of the merged result channel
    pub channel_capacity: usize,
    /// Upper bound on volumes scanned at once (None = one worker per volume)
    pub max_parallel_volumes: Option<usize>,
    /// How often a blocked worker or consumer re-checks cancellation
    pub poll_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_ENUM_BUFFER_SIZE,
            channel_capacity: 10_000,
            max_parallel_volumes: None,
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ScanConfig {
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_max_parallel_volumes(mut self, cap: Option<usize>) -> Self {
        self.max_parallel_volumes = cap.map(|c| c.max(1));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between the caller and the workers.
///
/// A token made with [`CancelToken::child`] also reports cancellation when
/// its parent is cancelled; cancelling the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|parent| parent.is_cancelled())
    }
}

// ============================================================================
// Volume access
// ============================================================================

/// Source of raw volume handles
pub trait VolumeProvider: Send + Sync {
    type Device: UsnDevice;

    /// Open a volume for bulk enumeration. The device is dropped (and its
    /// handle closed) by the worker that opened it.
    fn open(&self, volume: &VolumeId) -> Result<Self::Device>;

    /// Every ready, fixed volume on the host
    fn ready_fixed_volumes(&self) -> Result<Vec<VolumeId>>;
}

// ============================================================================
// Per-volume reports
// ============================================================================

/// Counters of a volume that was scanned to the end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStats {
    pub enumeration: EnumerationStats,
    pub resolve: ResolveStats,
    /// Entries that passed the filter and were pushed to the channel
    pub emitted: u64,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum VolumeOutcome {
    Completed(VolumeStats),
    Cancelled,
    Failed(MftScanError),
}

/// What one worker reports once it stops
#[derive(Debug)]
pub struct VolumeReport {
    pub volume: VolumeId,
    pub outcome: VolumeOutcome,
}

impl VolumeReport {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, VolumeOutcome::Failed(_))
    }
}

/// Result of a finished scan with no failed volumes
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub completed: Vec<(VolumeId, VolumeStats)>,
    pub cancelled: Vec<VolumeId>,
}

impl ScanSummary {
    pub fn emitted(&self) -> u64 {
        self.completed.iter().map(|(_, stats)| stats.emitted).sum()
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Streams the files of one or more NTFS volumes
pub struct Scanner<P> {
    provider: Arc<P>,
    config: ScanConfig,
}

impl<P: VolumeProvider + 'static> Scanner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            config: ScanConfig::default(),
        }
    }

    /// Configure the scanner
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Scan every ready fixed volume without folder or extension filters
    pub fn scan_full(&self, cancel: CancelToken) -> Result<ScanStream> {
        let volumes = self.provider.ready_fixed_volumes()?;
        tracing::info!("full scan of {} volume(s)", volumes.len());
        self.scan(volumes, ScanFilter::new(), cancel)
    }

    /// Scan the volume containing `folder`, restricted to that subtree and,
    /// if `extensions` is non-empty, to those extensions
    pub fn scan_folder<I, S>(
        &self,
        folder: &str,
        extensions: I,
        cancel: CancelToken,
    ) -> Result<ScanStream>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let volume = VolumeId::containing(folder)?;
        let filter = ScanFilter::new()
            .with_folder(folder)
            .with_extensions(extensions);
        tracing::info!(
            volume = %volume,
            prefix = filter.folder_prefix().unwrap_or_default(),
            extensions = ?filter.extensions(),
            "folder scan"
        );
        self.scan(vec![volume], filter, cancel)
    }

    /// Start one worker per volume and return the merged stream.
    ///
    /// Workers stop when `cancel` is raised or when the returned stream is
    /// dropped; dropping the stream does not cancel `cancel` itself.
    pub fn scan(
        &self,
        volumes: Vec<VolumeId>,
        filter: ScanFilter,
        cancel: CancelToken,
    ) -> Result<ScanStream> {
        let (sender, receiver) = crossbeam_channel::bounded(self.config.channel_capacity.max(1));
        let provider = Arc::clone(&self.provider);
        let config = self.config.clone();
        let stop = cancel.child();
        let worker_stop = stop.clone();

        let coordinator = std::thread::Builder::new()
            .name("mftscan-coordinator".to_string())
            .spawn(move || {
                run_workers(&*provider, volumes, &filter, &config, sender, &worker_stop)
            })?;

        Ok(ScanStream {
            receiver,
            stop,
            poll_interval: self.config.poll_interval,
            coordinator: Some(coordinator),
            reports: Vec::new(),
            panicked: false,
            exhausted: false,
        })
    }
}

/// Run every volume on a dedicated pool; returns once all workers stopped.
/// The sender is dropped on return, which completes the channel.
fn run_workers<P: VolumeProvider>(
    provider: &P,
    volumes: Vec<VolumeId>,
    filter: &ScanFilter,
    config: &ScanConfig,
    sender: Sender<UsnEntry>,
    cancel: &CancelToken,
) -> Vec<VolumeReport> {
    if volumes.is_empty() {
        return Vec::new();
    }

    let threads = config
        .max_parallel_volumes
        .map_or(volumes.len(), |cap| cap.min(volumes.len()))
        .max(1);

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("mftscan-volume-{}", i))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("failed to start volume workers: {}", e);
            return volumes
                .into_iter()
                .map(|volume| VolumeReport {
                    volume,
                    outcome: VolumeOutcome::Failed(MftScanError::IoError(std::io::Error::other(
                        e.to_string(),
                    ))),
                })
                .collect();
        }
    };

    pool.install(|| {
        volumes
            .par_iter()
            .map(|volume| scan_volume(provider, volume, filter, config, &sender, cancel))
            .collect()
    })
}

fn scan_volume<P: VolumeProvider>(
    provider: &P,
    volume: &VolumeId,
    filter: &ScanFilter,
    config: &ScanConfig,
    sender: &Sender<UsnEntry>,
    cancel: &CancelToken,
) -> VolumeReport {
    let outcome = match scan_volume_inner(provider, volume, filter, config, sender, cancel) {
        Ok(stats) => {
            tracing::info!(
                volume = %volume,
                records = stats.enumeration.records,
                skipped = stats.enumeration.skipped,
                dangling = stats.resolve.dangling,
                cyclic = stats.resolve.cyclic,
                emitted = stats.emitted,
                "volume scan complete in {:.2}s",
                stats.elapsed.as_secs_f64()
            );
            VolumeOutcome::Completed(stats)
        }
        Err(MftScanError::Cancelled) => {
            tracing::info!(volume = %volume, "volume scan cancelled");
            VolumeOutcome::Cancelled
        }
        Err(e) => {
            tracing::warn!(volume = %volume, "volume scan failed: {}", e);
            VolumeOutcome::Failed(e)
        }
    };

    VolumeReport {
        volume: volume.clone(),
        outcome,
    }
}

fn scan_volume_inner<P: VolumeProvider>(
    provider: &P,
    volume: &VolumeId,
    filter: &ScanFilter,
    config: &ScanConfig,
    sender: &Sender<UsnEntry>,
    cancel: &CancelToken,
) -> Result<VolumeStats> {
    if cancel.is_cancelled() {
        return Err(MftScanError::Cancelled);
    }

    let start = Instant::now();
    let device = provider.open(volume)?;
    tracing::debug!(volume = %volume, "volume opened");

    // Phase 1: enumerate the whole volume; the device is released at the end of this block
    let (raw, enumeration) = {
        let mut enumerator =
            UsnEnumerator::with_buffer_size(volume.clone(), device, config.buffer_size);
        let mut raw = Vec::new();
        for entry in enumerator.by_ref() {
            if cancel.is_cancelled() {
                return Err(MftScanError::Cancelled);
            }
            raw.push(entry?);
        }
        (raw, enumerator.stats())
    };

    // Phase 2: resolve paths against the complete snapshot
    let (entries, resolve) = resolve_paths(raw, volume, cancel)?;

    // Phase 3: filter and push
    let mut emitted = 0u64;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(MftScanError::Cancelled);
        }
        if !filter.matches(&entry) {
            continue;
        }
        send_with_backpressure(sender, entry, cancel, config.poll_interval)?;
        emitted += 1;
    }

    Ok(VolumeStats {
        enumeration,
        resolve,
        emitted,
        elapsed: start.elapsed(),
    })
}

/// Block while the channel is full, re-checking cancellation every `poll`.
/// A dropped consumer counts as cancellation.
fn send_with_backpressure(
    sender: &Sender<UsnEntry>,
    mut entry: UsnEntry,
    cancel: &CancelToken,
    poll: Duration,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(MftScanError::Cancelled);
        }
        match sender.send_timeout(entry, poll) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(back)) => entry = back,
            Err(SendTimeoutError::Disconnected(_)) => return Err(MftScanError::Cancelled),
        }
    }
}

// ============================================================================
// Merged stream
// ============================================================================

/// Lazy, unordered sequence of entries from every scanned volume.
///
/// Iteration ends once all workers have stopped and the channel is drained,
/// or right after cancellation once already-buffered entries are delivered.
/// Per-volume failures are available from [`ScanStream::reports`] and
/// [`ScanStream::finish`] after that point. Dropping the stream stops the
/// workers without waiting for them.
pub struct ScanStream {
    receiver: Receiver<UsnEntry>,
    /// Child of the caller's token, raised on drop
    stop: CancelToken,
    poll_interval: Duration,
    coordinator: Option<JoinHandle<Vec<VolumeReport>>>,
    reports: Vec<VolumeReport>,
    panicked: bool,
    exhausted: bool,
}

impl ScanStream {
    /// Per-volume reports; empty until the stream is exhausted
    pub fn reports(&self) -> &[VolumeReport] {
        &self.reports
    }

    /// Volumes whose worker failed
    pub fn failures(&self) -> impl Iterator<Item = &VolumeReport> {
        self.reports.iter().filter(|r| r.is_failure())
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Discard any unconsumed entries, wait for every worker and report.
    ///
    /// Returns `VolumesFailed` if at least one volume failed, even though
    /// entries from the other volumes were already delivered.
    pub fn finish(mut self) -> Result<ScanSummary> {
        for _ in self.by_ref() {}

        if self.panicked {
            return Err(MftScanError::WorkerPanicked);
        }

        let mut summary = ScanSummary::default();
        let mut failures = Vec::new();
        for report in std::mem::take(&mut self.reports) {
            match report.outcome {
                VolumeOutcome::Completed(stats) => summary.completed.push((report.volume, stats)),
                VolumeOutcome::Cancelled => summary.cancelled.push(report.volume),
                VolumeOutcome::Failed(error) => failures.push(VolumeFailure {
                    volume: report.volume,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(MftScanError::VolumesFailed(failures))
        }
    }

    fn complete(&mut self) {
        self.exhausted = true;
        if let Some(handle) = self.coordinator.take() {
            match handle.join() {
                Ok(reports) => self.reports = reports,
                Err(_) => {
                    tracing::error!("scan coordinator panicked");
                    self.panicked = true;
                }
            }
        }
    }
}

impl Iterator for ScanStream {
    type Item = UsnEntry;

    fn next(&mut self) -> Option<UsnEntry> {
        if self.exhausted {
            return None;
        }

        loop {
            if self.stop.is_cancelled() {
                return match self.receiver.try_recv() {
                    Ok(entry) => Some(entry),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                        self.complete();
                        None
                    }
                };
            }

            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(entry) => return Some(entry),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.complete();
                    return None;
                }
            }
        }
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        if !self.exhausted {
            tracing::debug!("scan stream dropped early, stopping workers");
        }
        self.stop.cancel();
    }
}
