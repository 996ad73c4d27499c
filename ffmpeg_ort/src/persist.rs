use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::RgbImage;
use inference_common::jpeg;
use tracing::warn;

/// Directory holding annotated upload results, `<stem>_annotated.<ext>`.
#[derive(Debug, Clone)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    /// Creates the directory (and parents) when missing.
    pub fn create(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create output directory {root:?}"))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn annotated_path(&self, stem: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{stem}_annotated.{extension}"))
    }

    /// Encodes `image` as JPEG under `<stem>_annotated.jpg` and returns the
    /// path together with the bytes written.
    pub fn save_image(
        &self,
        image: &RgbImage,
        stem: &str,
        quality: u8,
    ) -> anyhow::Result<(PathBuf, Vec<u8>)> {
        let path = self.annotated_path(stem, "jpg");
        let bytes = jpeg::encode(image, quality)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create output directory {:?}", self.root))?;
        fs::write(&path, &bytes).with_context(|| format!("Failed to write {path:?}"))?;
        Ok((path, bytes))
    }
}

/// Deletes a file when dropped, whatever happened in between.
#[derive(Debug)]
pub struct RemoveOnDrop(PathBuf);

impl RemoveOnDrop {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {:?}: {e}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        let out = OutputDir::create(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(out.annotated_path("clip", "mp4"), nested.join("clip_annotated.mp4"));
    }

    #[test]
    fn saved_image_matches_returned_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let out = OutputDir::create(tmp.path()).unwrap();
        let img = RgbImage::from_pixel(8, 6, image::Rgb([1, 2, 3]));
        let (path, bytes) = out.save_image(&img, "upload", 90).unwrap();
        assert_eq!(path, tmp.path().join("upload_annotated.jpg"));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn guard_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.mp4");
        fs::write(&path, b"x").unwrap();
        drop(RemoveOnDrop::new(&path));
        assert!(!path.exists());
        // already gone is fine
        drop(RemoveOnDrop::new(&path));
    }
}
