use std::time::Duration;

/// Time spent in each stage of processing one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTimes {
    pub decode: Duration,
    pub buffer_resize: Duration,
    pub buffer_to_tensor: Duration,
    pub forward_pass: Duration,
    pub bbox_extraction: Duration,
    pub nms: Duration,
    pub annotation: Duration,
    pub encode: Duration,
}

impl FrameTimes {
    pub fn total(&self) -> Duration {
        self.decode
            + self.buffer_resize
            + self.buffer_to_tensor
            + self.forward_pass
            + self.bbox_extraction
            + self.nms
            + self.annotation
            + self.encode
    }

    fn fields(&self) -> [Duration; 8] {
        [
            self.decode,
            self.buffer_resize,
            self.buffer_to_tensor,
            self.forward_pass,
            self.bbox_extraction,
            self.nms,
            self.annotation,
            self.encode,
        ]
    }

    fn from_fields(f: [Duration; 8]) -> Self {
        Self {
            decode: f[0],
            buffer_resize: f[1],
            buffer_to_tensor: f[2],
            forward_pass: f[3],
            bbox_extraction: f[4],
            nms: f[5],
            annotation: f[6],
            encode: f[7],
        }
    }
}

/// Collected `FrameTimes`, for summary stats at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct AggregatedTimes {
    frames: Vec<FrameTimes>,
    window: Option<usize>,
}

impl AggregatedTimes {
    /// Keeps the warmup frame plus at most `window` most recent samples,
    /// for runs that never end (the live stream).
    pub fn with_window(window: usize) -> Self {
        Self {
            frames: Vec::with_capacity(window + 1),
            window: Some(window.max(1)),
        }
    }

    pub fn push(&mut self, times: FrameTimes) {
        self.frames.push(times);
        if let Some(window) = self.window {
            if self.frames.len() > window + 1 {
                self.frames.remove(1);
            }
        }
    }

    /// The first frame pays for lazy runtime init, `skip_first` drops it.
    fn samples(&self, skip_first: bool) -> &[FrameTimes] {
        if skip_first && self.frames.len() > 1 {
            &self.frames[1..]
        } else {
            &self.frames
        }
    }

    pub fn avg(&self, skip_first: bool) -> FrameTimes {
        let samples = self.samples(skip_first);
        if samples.is_empty() {
            return FrameTimes::default();
        }
        let mut sum = [Duration::ZERO; 8];
        for times in samples {
            for (acc, value) in sum.iter_mut().zip(times.fields()) {
                *acc += value;
            }
        }
        let n = samples.len() as u32;
        FrameTimes::from_fields(sum.map(|total| total / n))
    }

    pub fn min(&self, skip_first: bool) -> FrameTimes {
        self.fold(skip_first, Duration::MAX, Duration::min)
    }

    pub fn max(&self, skip_first: bool) -> FrameTimes {
        self.fold(skip_first, Duration::ZERO, Duration::max)
    }

    fn fold(
        &self,
        skip_first: bool,
        init: Duration,
        pick: fn(Duration, Duration) -> Duration,
    ) -> FrameTimes {
        let samples = self.samples(skip_first);
        if samples.is_empty() {
            return FrameTimes::default();
        }
        let mut acc = [init; 8];
        for times in samples {
            for (slot, value) in acc.iter_mut().zip(times.fields()) {
                *slot = pick(*slot, value);
            }
        }
        FrameTimes::from_fields(acc)
    }
}
