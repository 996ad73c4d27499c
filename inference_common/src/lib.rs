pub mod annotate;
pub mod bbox;
pub mod coco_classes;
pub mod detection;
pub mod detector;
pub mod frame_times;
pub mod img_dimensions;
pub mod jpeg;
