//! The detection capability and the annotating wrapper used by every caller.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::annotate::Annotator;
use crate::detection::{count_class, Detection, DetectionCounts};
use crate::frame_times::FrameTimes;

/// Class counted in the live overlay.
pub const OVERLAY_CLASS: usize = 0;

/// Which flavour of the model to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Dynamic input size, best accuracy. Used for uploads.
    Full,
    /// Fixed input size, lowest latency. Used for the live stream.
    Fast,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Full => f.write_str("full"),
            Profile::Fast => f.write_str("fast"),
        }
    }
}

/// Object detector: image in, boxes out. Implementations must be callable
/// from several threads; they serialize internally if the backend needs it.
pub trait Detector: Send + Sync {
    fn detect(
        &self,
        image: &DynamicImage,
        profile: Profile,
        frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Detection>>;
}

/// Output of one annotated inference.
#[derive(Debug, Clone)]
pub struct Annotated {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

impl Annotated {
    pub fn counts(&self) -> DetectionCounts {
        DetectionCounts::from_detections(&self.detections)
    }
}

/// A detector together with the annotator that draws its results.
#[derive(Clone)]
pub struct Inference {
    detector: Arc<dyn Detector>,
    annotator: Annotator,
}

impl Inference {
    pub fn new(detector: Arc<dyn Detector>, annotator: Annotator) -> Self {
        Self {
            detector,
            annotator,
        }
    }

    /// Runs the detector and burns the result into a copy of `image`.
    /// The fast profile additionally gets the overlay class count.
    pub fn infer_on_image(
        &self,
        image: DynamicImage,
        profile: Profile,
        frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Annotated> {
        let detections = self.detector.detect(&image, profile, frame_times)?;

        let start = Instant::now();
        let mut annotated = image.into_rgb8();
        self.annotator.draw_detections(&mut annotated, &detections);
        if profile == Profile::Fast {
            let count = count_class(&detections, OVERLAY_CLASS);
            self.annotator.draw_overlay_text(
                &mut annotated,
                &format!("Class {OVERLAY_CLASS} Count: {count}"),
                10,
                50,
            );
        }
        frame_times.annotation = start.elapsed();

        Ok(Annotated {
            image: annotated,
            detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;

    struct Fixed(Vec<Detection>);

    impl Detector for Fixed {
        fn detect(
            &self,
            _image: &DynamicImage,
            _profile: Profile,
            _frame_times: &mut FrameTimes,
        ) -> anyhow::Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn infer_on_image_draws_and_counts() {
        let detections = vec![
            Detection::new(0, Bbox::new(1.0, 1.0, 10.0, 10.0, 0.8)),
            Detection::new(999, Bbox::new(2.0, 2.0, 12.0, 12.0, 0.7)),
        ];
        let inference = Inference::new(Arc::new(Fixed(detections)), Annotator::new());
        let mut times = FrameTimes::default();
        let out = inference
            .infer_on_image(
                DynamicImage::new_rgb8(16, 16),
                Profile::Full,
                &mut times,
            )
            .unwrap();

        assert_eq!(out.image.dimensions(), (16, 16));
        assert_ne!(*out.image.get_pixel(1, 1), image::Rgb([0, 0, 0]));
        let counts = out.counts();
        assert_eq!(counts.get("person"), 1);
        assert_eq!(counts.get("Class 999"), 1);
    }

    #[test]
    fn fast_profile_burns_in_the_class_count() {
        let inference = Inference::new(Arc::new(Fixed(Vec::new())), Annotator::new());
        let mut times = FrameTimes::default();
        let fast = inference
            .infer_on_image(DynamicImage::new_rgb8(320, 120), Profile::Fast, &mut times)
            .unwrap()
            .image;
        let full = inference
            .infer_on_image(DynamicImage::new_rgb8(320, 120), Profile::Full, &mut times)
            .unwrap()
            .image;

        let overlay = |img: &RgbImage| {
            (50..90)
                .flat_map(|y| (10..300).map(move |x| (x, y)))
                .filter(|&(x, y)| img.get_pixel(x, y)[1] > 0)
                .count()
        };
        assert!(overlay(&fast) > 100);
        assert_eq!(overlay(&full), 0);
    }

    #[test]
    fn profile_names() {
        assert_eq!(Profile::Full.to_string(), "full");
        assert_eq!(serde_json::to_string(&Profile::Fast).unwrap(), "\"fast\"");
    }
}
