use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImgDimensions {
    pub width: f32,
    pub height: f32,
}

impl ImgDimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Scales `self` to fit into `target` keeping the aspect ratio.
    /// Returns the scaled dimensions and the scale factor applied.
    pub fn fit_into(&self, target: ImgDimensions) -> (ImgDimensions, f32) {
        let scale = (target.width / self.width).min(target.height / self.height);
        (
            ImgDimensions::new(
                (self.width * scale).round().max(1.0),
                (self.height * scale).round().max(1.0),
            ),
            scale,
        )
    }

    /// Rounds both sides up to a multiple of `stride`.
    pub fn round_up_to(&self, stride: u32) -> ImgDimensions {
        let stride = stride.max(1) as f32;
        ImgDimensions::new(
            (self.width / stride).ceil() * stride,
            (self.height / stride).ceil() * stride,
        )
    }
}

impl From<(u32, u32)> for ImgDimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width as f32, height as f32)
    }
}
