//! Engine bindings for sdgen.
//!
//! This crate wires together the external pieces of a Stable Diffusion run:
//! weight file resolution (`hf-hub`), tokenization (`tokenizers`), and the
//! CLIP/UNet/VAE models plus the noise schedules (`diffusers` on `tch`). It
//! owns no scheduler math and no network math of its own.
//!
//! ```no_run
//! use sdgen_core::{
//!     BetaCurve, BetaScheduleKind, GenerateRequest, ImageEngine, ModelSource,
//!     NoiseSchedule, StableDiffusionEngine, TokenSource,
//! };
//!
//! let curve = BetaCurve {
//!     beta_start: 0.00085,
//!     beta_end: 0.012,
//!     beta_schedule: BetaScheduleKind::ScaledLinear,
//! };
//! let engine = StableDiffusionEngine::new(
//!     ModelSource::from_flag("lmz/rust-stable-diffusion-v1-5"),
//!     "openai/clip-vit-large-patch14",
//!     NoiseSchedule::for_mode(curve, false),
//!     tch::Device::Cpu,
//!     TokenSource::CacheToken,
//!     false,
//! )?;
//!
//! let image = engine.generate(&GenerateRequest {
//!     prompt: "a watercolor fox".to_string(),
//!     init_image: None,
//!     mask: None,
//!     strength: 0.5,
//!     num_inference_steps: 32,
//!     guidance_scale: 7.5,
//!     eta: 0.0,
//! })?;
//! image.save("fox.png")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod device;
mod engine;
mod image_io;
mod model_source;
mod schedule;
mod tokens;

pub use device::DeviceRequest;
pub use engine::{GenerateRequest, ImageEngine, StableDiffusionEngine};
pub use image_io::{load_init_image, load_mask};
pub use model_source::{FileLoader, ModelComponents, ModelSource};
pub use schedule::{BetaCurve, BetaScheduleKind, NoiseSchedule, Sampler};
pub use tokens::TokenSource;
