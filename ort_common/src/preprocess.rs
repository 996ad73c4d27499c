//! Image → NCHW tensor conversion for yolo models.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use inference_common::bbox::Bbox;
use inference_common::img_dimensions::ImgDimensions;
use ndarray::Array4;

const PAD_VALUE: u8 = 114;

/// Maps model-space coordinates back onto the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source: ImgDimensions,
}

impl InputTransform {
    pub fn to_source(&self, bbox: Bbox) -> Bbox {
        Bbox::new(
            (bbox.xmin - self.pad_x) / self.scale_x,
            (bbox.ymin - self.pad_y) / self.scale_y,
            (bbox.xmax - self.pad_x) / self.scale_x,
            (bbox.ymax - self.pad_y) / self.scale_y,
            bbox.detector_confidence,
        )
        .clamp(self.source.width, self.source.height)
    }
}

pub struct Prepared {
    pub tensor: Array4<f32>,
    pub transform: InputTransform,
}

/// Plain resize to a fixed `size` x `size` input, aspect ratio is not kept.
pub fn stretch(image: &DynamicImage, size: u32) -> Prepared {
    let source = ImgDimensions::from((image.width(), image.height()));
    let resized = imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);
    Prepared {
        tensor: to_tensor(&resized),
        transform: InputTransform {
            scale_x: size as f32 / source.width,
            scale_y: size as f32 / source.height,
            pad_x: 0.0,
            pad_y: 0.0,
            source,
        },
    }
}

/// Aspect-preserving resize so the long side is `max_size`, padded up to the
/// next multiple of `stride`. Input dims follow the image, so the model must
/// have been exported with dynamic axes.
pub fn letterbox(image: &DynamicImage, max_size: u32, stride: u32) -> Prepared {
    let source = ImgDimensions::from((image.width(), image.height()));
    let (fitted, scale) = source.fit_into(ImgDimensions::new(max_size as f32, max_size as f32));
    let canvas_dims = fitted.round_up_to(stride);

    let resized = imageops::resize(
        &image.to_rgb8(),
        fitted.width as u32,
        fitted.height as u32,
        FilterType::Triangle,
    );
    let pad_x = ((canvas_dims.width - fitted.width) / 2.0).floor();
    let pad_y = ((canvas_dims.height - fitted.height) / 2.0).floor();
    let mut canvas = RgbImage::from_pixel(
        canvas_dims.width as u32,
        canvas_dims.height as u32,
        Rgb([PAD_VALUE; 3]),
    );
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    Prepared {
        tensor: to_tensor(&canvas),
        transform: InputTransform {
            scale_x: scale,
            scale_y: scale,
            pad_x,
            pad_y,
            source,
        },
    }
}

/// Packed RGB → [1, 3, H, W] normalised to [0, 1].
fn to_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stretch_has_fixed_shape() {
        let img = DynamicImage::new_rgb8(320, 240);
        let prepared = stretch(&img, 64);
        assert_eq!(prepared.tensor.shape(), &[1, 3, 64, 64]);
        assert_eq!(prepared.transform.scale_x, 0.2);
    }

    #[test]
    fn letterbox_pads_to_stride_and_maps_back() {
        let img = DynamicImage::new_rgb8(1280, 720);
        let prepared = letterbox(&img, 640, 32);
        // 640x360 fitted, padded to 640x384
        assert_eq!(prepared.tensor.shape(), &[1, 3, 384, 640]);
        assert_eq!(prepared.transform.pad_y, 12.0);
        // pad rows carry the pad value
        assert!((prepared.tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);

        let model_box = Bbox::new(0.0, 12.0, 320.0, 192.0, 0.5);
        let source_box = prepared.transform.to_source(model_box);
        assert_eq!(
            (source_box.xmin, source_box.ymin, source_box.xmax, source_box.ymax),
            (0.0, 0.0, 640.0, 360.0)
        );
    }
}
