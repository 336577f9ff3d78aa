use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use sdgen_core::{GenerateRequest, ImageEngine};

use crate::output::OutputLayout;

/// Invokes the engine once per requested image with an identical request,
/// saving each result as it completes. Returns the saved paths.
pub fn generate_batch<E: ImageEngine>(
    engine: &E,
    request: &GenerateRequest,
    layout: &OutputLayout,
    num_images: usize,
) -> Result<Vec<PathBuf>> {
    let mut saved = Vec::with_capacity(num_images);
    for index in 1..=num_images {
        let image = engine.generate(request)?;
        let path = layout.image_path(Utc::now().timestamp(), index);
        image
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Saved {}", path.display());
        saved.push(path);
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use chrono::NaiveDate;
    use image::RgbImage;

    use super::*;

    struct CountingEngine {
        calls: Cell<usize>,
    }

    impl ImageEngine for CountingEngine {
        fn generate(&self, _request: &GenerateRequest) -> Result<RgbImage> {
            self.calls.set(self.calls.get() + 1);
            Ok(RgbImage::new(1, 1))
        }
    }

    struct FailingEngine;

    impl ImageEngine for FailingEngine {
        fn generate(&self, _request: &GenerateRequest) -> Result<RgbImage> {
            anyhow::bail!("inference failed")
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            prompt: "a watercolor fox".to_string(),
            init_image: None,
            mask: None,
            strength: 0.5,
            num_inference_steps: 32,
            guidance_scale: 7.5,
            eta: 0.0,
        }
    }

    fn layout(root: &std::path::Path) -> OutputLayout {
        let date = NaiveDate::from_ymd_opt(2023, 4, 5).unwrap();
        OutputLayout::create(root, date, "output.png").unwrap()
    }

    #[test]
    fn invokes_the_engine_once_per_image() {
        let root = tempfile::tempdir().unwrap();
        let engine = CountingEngine { calls: Cell::new(0) };

        let saved = generate_batch(&engine, &request(), &layout(root.path()), 3).unwrap();

        assert_eq!(engine.calls.get(), 3);
        assert_eq!(saved.len(), 3);
        for (i, path) in saved.iter().enumerate() {
            assert!(path.is_file());
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.ends_with(&format!("_{}.png", i + 1)), "bad name: {name}");
        }
    }

    #[test]
    fn zero_images_never_touches_the_engine() {
        let root = tempfile::tempdir().unwrap();
        let engine = CountingEngine { calls: Cell::new(0) };

        let saved = generate_batch(&engine, &request(), &layout(root.path()), 0).unwrap();

        assert_eq!(engine.calls.get(), 0);
        assert!(saved.is_empty());
    }

    #[test]
    fn engine_failure_propagates_before_any_write() {
        let root = tempfile::tempdir().unwrap();
        let dir = layout(root.path());

        assert!(generate_batch(&FailingEngine, &request(), &dir, 2).is_err());
        let entries = std::fs::read_dir(root.path().join("20230405")).unwrap().count();
        assert_eq!(entries, 0);
    }
}
