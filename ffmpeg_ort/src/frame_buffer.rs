//! Latest-frame slot shared between the camera, the inference job and the
//! stream clients.
//!
//! Every write publishes a frame immediately: the most recent annotated
//! frame when one exists, else the raw frame itself. At most one inference
//! job runs at a time, frames arriving while it runs are published but not
//! inferred. Readers track the sequence number of the last frame they saw
//! and block on a condition variable until a newer one is published.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ffmpeg_common::camera::FrameSink;
use inference_common::detector::{Inference, Profile};
use inference_common::frame_times::{AggregatedTimes, FrameTimes};
use inference_common::jpeg;
use tracing::{debug, error, info, warn};

use crate::config::StreamSettings;

/// Log a timing summary every this many completed jobs.
const SUMMARY_EVERY: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStats {
    pub frames_written: u64,
    pub frames_skipped: u64,
    pub jobs_launched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub sequence: u64,
    pub avg_times: FrameTimes,
    pub max_times: FrameTimes,
}

struct Slot {
    published: Option<PublishedFrame>,
    annotated: Option<Bytes>,
    job: JobState,
    closed: bool,
    stats: BufferStats,
    times: AggregatedTimes,
}

impl Slot {
    fn sequence(&self) -> u64 {
        self.published.as_ref().map_or(0, |f| f.sequence)
    }

    fn publish(&mut self, data: Bytes) {
        let sequence = self.sequence() + 1;
        self.published = Some(PublishedFrame { sequence, data });
    }

    fn newer_than(&self, last_seen: u64) -> Option<PublishedFrame> {
        self.published
            .as_ref()
            .filter(|f| f.sequence > last_seen)
            .cloned()
    }
}

struct Shared {
    slot: Mutex<Slot>,
    changed: Condvar,
    inference: Inference,
    jpeg_quality: u8,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct FrameBuffer {
    shared: Arc<Shared>,
}

impl FrameBuffer {
    pub fn new(inference: Inference, settings: &StreamSettings) -> Self {
        let slot = Slot {
            published: None,
            annotated: None,
            job: JobState::Idle,
            closed: false,
            stats: BufferStats::default(),
            times: AggregatedTimes::with_window(settings.stats_window),
        };
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(slot),
                changed: Condvar::new(),
                inference,
                jpeg_quality: settings.jpeg_quality,
            }),
        }
    }

    /// Publishes a frame and launches inference on it if no job is running.
    /// Never blocks on inference.
    pub fn write(&self, raw: Bytes) {
        let launch = {
            let mut slot = self.shared.lock();
            if slot.closed {
                return;
            }
            slot.stats.frames_written += 1;
            let launch = slot.job == JobState::Idle;
            if launch {
                slot.job = JobState::Running;
                slot.stats.jobs_launched += 1;
            } else {
                slot.stats.frames_skipped += 1;
            }
            let data = slot.annotated.clone().unwrap_or_else(|| raw.clone());
            slot.publish(data);
            self.shared.changed.notify_all();
            launch
        };

        if launch {
            let shared = self.shared.clone();
            let spawned = thread::Builder::new()
                .name("inference-job".into())
                .spawn(move || run_job(&shared, raw));
            if let Err(e) = spawned {
                error!("Failed to spawn inference job: {e}");
                let mut slot = self.shared.lock();
                slot.job = JobState::Idle;
                slot.stats.jobs_failed += 1;
                self.shared.changed.notify_all();
            }
        }
    }

    pub fn current_frame(&self) -> Option<PublishedFrame> {
        self.shared.lock().published.clone()
    }

    /// Sequence of the currently published frame, 0 before the first write.
    pub fn sequence(&self) -> u64 {
        self.shared.lock().sequence()
    }

    /// Blocks until a frame newer than `last_seen` is published. `None`
    /// once the buffer is closed.
    pub fn wait_for_next_frame(&self, last_seen: u64) -> Option<PublishedFrame> {
        let slot = self.shared.lock();
        let slot = self
            .shared
            .changed
            .wait_while(slot, |s| !s.closed && s.sequence() <= last_seen)
            .unwrap_or_else(PoisonError::into_inner);
        slot.newer_than(last_seen)
    }

    /// Like [`Self::wait_for_next_frame`], giving up after `timeout`.
    pub fn wait_for_next_frame_timeout(
        &self,
        last_seen: u64,
        timeout: Duration,
    ) -> Option<PublishedFrame> {
        let slot = self.shared.lock();
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| !s.closed && s.sequence() <= last_seen)
            .unwrap_or_else(PoisonError::into_inner);
        slot.newer_than(last_seen)
    }

    /// Stops accepting writes and wakes every waiter.
    pub fn close(&self) {
        let mut slot = self.shared.lock();
        slot.closed = true;
        self.shared.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Waits for the running inference job, if any. Returns whether the
    /// buffer went idle within `timeout`.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let slot = self.shared.lock();
        let (slot, _) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| s.job == JobState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        slot.job == JobState::Idle
    }

    pub fn stats(&self) -> BufferStats {
        let slot = self.shared.lock();
        BufferStats {
            sequence: slot.sequence(),
            avg_times: slot.times.avg(true),
            max_times: slot.times.max(true),
            ..slot.stats.clone()
        }
    }
}

impl FrameSink for FrameBuffer {
    fn write(&self, frame: Bytes) {
        FrameBuffer::write(self, frame)
    }
}

fn annotate_frame(
    inference: &Inference,
    raw: &[u8],
    quality: u8,
    times: &mut FrameTimes,
) -> anyhow::Result<Bytes> {
    let start = Instant::now();
    let image = jpeg::decode(raw)?;
    times.decode = start.elapsed();

    let annotated = inference.infer_on_image(image, Profile::Fast, times)?;

    let start = Instant::now();
    let encoded = jpeg::encode(&annotated.image, quality)?;
    times.encode = start.elapsed();
    Ok(Bytes::from(encoded))
}

fn run_job(shared: &Shared, raw: Bytes) {
    let mut times = FrameTimes::default();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        annotate_frame(&shared.inference, &raw, shared.jpeg_quality, &mut times)
    }));

    let mut slot = shared.lock();
    slot.job = JobState::Idle;
    match result {
        Ok(Ok(frame)) => {
            slot.annotated = Some(frame.clone());
            if !slot.closed {
                slot.publish(frame);
            }
            slot.stats.jobs_completed += 1;
            slot.times.push(times);
            debug!("Inference job done in {:?}: {times:?}", times.total());
            if slot.stats.jobs_completed % SUMMARY_EVERY == 0 {
                info!(
                    "{} jobs, {} frames skipped, avg {:?} (forward {:?}), max {:?}",
                    slot.stats.jobs_completed,
                    slot.stats.frames_skipped,
                    slot.times.avg(true).total(),
                    slot.times.avg(true).forward_pass,
                    slot.times.max(true).total(),
                );
            }
        }
        Ok(Err(e)) => {
            slot.stats.jobs_failed += 1;
            warn!("Inference job failed: {e:#}");
        }
        Err(panic) => {
            slot.stats.jobs_failed += 1;
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            error!("Inference job panicked: {reason}");
        }
    }
    shared.changed.notify_all();
}
