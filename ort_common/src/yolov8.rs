use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, bail};
use image::DynamicImage;
use inference_common::bbox::{Bbox, non_maximum_suppression};
use inference_common::detection::Detection;
use inference_common::detector::{Detector, Profile};
use inference_common::frame_times::FrameTimes;
use ndarray::CowArray;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;

use crate::preprocess::{self, Prepared};

#[derive(Debug, Clone)]
pub struct YoloParams {
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Long side of the letterboxed input for [`Profile::Full`].
    pub full_input_size: u32,
    /// Square input size for [`Profile::Fast`].
    pub fast_input_size: u32,
    pub stride: u32,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            nms_threshold: 0.45,
            full_input_size: 640,
            fast_input_size: 640,
            stride: 32,
        }
    }
}

/// Yolov8 onnx detector. The full profile runs a dynamic-axes export; the
/// fast profile may run a separate fixed-size export, else it shares the
/// full session.
pub struct YoloV8 {
    full: Mutex<Session>,
    fast: Option<Mutex<Session>>,
    params: YoloParams,
}

fn load_session(path: &Path) -> anyhow::Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model {path:?}"))?;
    log::debug!("{session:?}");
    Ok(session)
}

impl YoloV8 {
    pub fn load(full_model: &Path, fast_model: Option<&Path>, params: YoloParams) -> anyhow::Result<Self> {
        let full = load_session(full_model)?;
        log::info!("Prepared full profile with model: {full_model:?}");
        let fast = match fast_model {
            Some(path) => {
                let session = load_session(path)?;
                log::info!("Prepared fast profile with model: {path:?}");
                Some(Mutex::new(session))
            }
            None => {
                log::info!("No fast model given, fast profile shares {full_model:?}");
                None
            }
        };
        log::info!(
            "Detection thresholds: confidence={:.2}, nms={:.2}",
            params.conf_threshold,
            params.nms_threshold
        );
        Ok(Self {
            full: Mutex::new(full),
            fast,
            params,
        })
    }

    fn session(&self, profile: Profile) -> &Mutex<Session> {
        match (profile, &self.fast) {
            (Profile::Fast, Some(fast)) => fast,
            _ => &self.full,
        }
    }

    fn prepare(&self, image: &DynamicImage, profile: Profile) -> Prepared {
        match profile {
            Profile::Full => {
                preprocess::letterbox(image, self.params.full_input_size, self.params.stride)
            }
            Profile::Fast => preprocess::stretch(image, self.params.fast_input_size),
        }
    }
}

impl Detector for YoloV8 {
    fn detect(
        &self,
        image: &DynamicImage,
        profile: Profile,
        frame_times: &mut FrameTimes,
    ) -> anyhow::Result<Vec<Detection>> {
        let start = Instant::now();
        let Prepared { tensor, transform } = self.prepare(image, profile);
        frame_times.buffer_resize = start.elapsed();

        let start = Instant::now();
        let input_array_dyn = CowArray::from(tensor).into_dyn();
        let input = ort::inputs![TensorRef::from_array_view(&input_array_dyn)?];
        frame_times.buffer_to_tensor = start.elapsed();

        let start = Instant::now();
        let mut session = self
            .session(profile)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(input)?;
        frame_times.forward_pass = start.elapsed();

        let start = Instant::now();
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let candidates = extract_candidates(shape, data, self.params.conf_threshold)?;
        drop(outputs);
        drop(session);
        frame_times.bbox_extraction = start.elapsed();

        let start = Instant::now();
        let detections = nms_per_class(candidates, self.params.nms_threshold)
            .into_iter()
            .map(|d| Detection::new(d.class_id, transform.to_source(d.bbox)))
            .filter(|d| d.bbox.area() > 0.0)
            .collect();
        frame_times.nms = start.elapsed();

        Ok(detections)
    }
}

/// Decodes a `[1, 4 + classes, proposals]` yolov8 output, rows are
/// cx, cy, w, h followed by one score per class.
fn extract_candidates(
    shape: &[i64],
    data: &[f32],
    conf_threshold: f32,
) -> anyhow::Result<Vec<Detection>> {
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= 4 {
        bail!("Unexpected yolov8 output shape: {shape:?}");
    }
    let rows = shape[1] as usize;
    let proposals = shape[2] as usize;
    if data.len() < rows * proposals {
        bail!("Output holds {} values, expected {}", data.len(), rows * proposals);
    }

    let at = |row: usize, i: usize| data[row * proposals + i];
    let mut candidates = Vec::new();
    for i in 0..proposals {
        let (class_id, score) = (4..rows)
            .map(|row| (row - 4, at(row, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < conf_threshold {
            continue;
        }
        let bbox = Bbox::from_center(at(0, i), at(1, i), at(2, i), at(3, i), score);
        candidates.push(Detection::new(class_id, bbox));
    }
    Ok(candidates)
}

fn nms_per_class(candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut by_class: Vec<Vec<Bbox>> = Vec::new();
    for candidate in candidates {
        if by_class.len() <= candidate.class_id {
            by_class.resize(candidate.class_id + 1, Vec::new());
        }
        by_class[candidate.class_id].push(candidate.bbox);
    }
    by_class
        .into_iter()
        .enumerate()
        .flat_map(|(class_id, bboxes)| {
            non_maximum_suppression(bboxes, iou_threshold)
                .into_iter()
                .map(move |bbox| Detection::new(class_id, bbox))
        })
        .collect()
}

/// Resolves the fast model: explicit path, else `<stem>_fixed.onnx` next to
/// the full model when present.
pub fn resolve_fast_model(full_model: &Path, fast_model: Option<PathBuf>) -> Option<PathBuf> {
    fast_model.or_else(|| {
        let stem = full_model.file_stem()?.to_str()?;
        let candidate = full_model.with_file_name(format!("{stem}_fixed.onnx"));
        candidate.exists().then_some(candidate)
    })
}
