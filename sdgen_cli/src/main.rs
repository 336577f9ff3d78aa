mod output;
mod runner;

use std::path::PathBuf;

use clap::Parser;
use rand::Rng;
use sdgen_core::{
    load_init_image, load_mask, BetaCurve, BetaScheduleKind, DeviceRequest, GenerateRequest,
    ModelSource, NoiseSchedule, StableDiffusionEngine, TokenSource,
};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::output::OutputLayout;

const DEFAULT_PROMPT: &str =
    "Street-art painting of Emilia Clarke in style of Banksy, photorealism";

/// Batch Stable Diffusion image generation.
#[derive(Parser)]
struct Args {
    /// Model weights source: Hugging Face model ID or local directory.
    #[arg(long, default_value = "lmz/rust-stable-diffusion-v1-5")]
    model: String,

    /// Compute device: `cpu`, `cuda`, `cuda:<index>` or `mps`.
    #[arg(long, default_value = "CPU")]
    device: DeviceRequest,

    /// Random seed; a fresh one is drawn when omitted.
    #[arg(long)]
    seed: Option<i64>,

    /// Noise curve start.
    #[arg(long, default_value_t = 0.00085)]
    beta_start: f64,

    /// Noise curve end.
    #[arg(long, default_value_t = 0.012)]
    beta_end: f64,

    /// Noise curve shape.
    #[arg(long, value_enum, default_value = "scaled_linear")]
    beta_schedule: BetaScheduleKind,

    /// Number of denoising steps.
    #[arg(long, default_value_t = 32)]
    num_inference_steps: usize,

    /// Classifier-free guidance weight.
    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,

    /// Stochasticity parameter for schedules with random steps.
    #[arg(long, default_value_t = 0.0)]
    eta: f64,

    /// Tokenizer source: Hugging Face model ID or path to a `tokenizer.json`.
    #[arg(long, default_value = "openai/clip-vit-large-patch14")]
    tokenizer: String,

    /// Generation prompt.
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// Initial image; supplying one switches to image-to-image mode.
    #[arg(long)]
    init_image: Option<PathBuf>,

    /// How strongly the initial image is noised, in [0.0, 1.0].
    #[arg(long, default_value_t = 0.5)]
    strength: f64,

    /// Grayscale inpainting mask; white regions are regenerated.
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Output image base name; a timestamp and an index are appended.
    #[arg(long, default_value = "output.png")]
    output: String,

    /// Number of images to generate.
    #[arg(long, default_value_t = 1)]
    num_images: usize,

    /// Hugging Face token for gated repositories. By default, the token
    /// cached at ~/.cache/huggingface/token is used.
    #[arg(long)]
    token: Option<String>,
}

/// An explicit seed is used verbatim; an omitted seed draws a fresh one from
/// `[0, 2^30)`.
fn resolve_seed(seed: Option<i64>) -> i64 {
    seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..1 << 30))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let seed = resolve_seed(args.seed);
    tch::manual_seed(seed);
    info!(seed, "seeded the torch RNG");

    let curve = BetaCurve {
        beta_start: args.beta_start,
        beta_end: args.beta_end,
        beta_schedule: args.beta_schedule,
    };
    let schedule = NoiseSchedule::for_mode(curve, args.init_image.is_some());

    let token = args
        .token
        .map(TokenSource::Literal)
        .unwrap_or(TokenSource::CacheToken);
    let engine = StableDiffusionEngine::new(
        ModelSource::from_flag(&args.model),
        &args.tokenizer,
        schedule,
        args.device.device(),
        token,
        false,
    )?;

    let (width, height) = engine.image_size();
    let init_image = args
        .init_image
        .as_deref()
        .map(|path| load_init_image(path, width, height))
        .transpose()?;
    let (latent_width, latent_height) = engine.latent_size();
    let mask = args
        .mask
        .as_deref()
        .map(|path| load_mask(path, latent_width, latent_height))
        .transpose()?;

    let request = GenerateRequest {
        prompt: args.prompt,
        init_image,
        mask,
        strength: args.strength,
        num_inference_steps: args.num_inference_steps,
        guidance_scale: args.guidance_scale,
        eta: args.eta,
    };

    let layout = OutputLayout::for_today(&args.output)?;
    runner::generate_batch(&engine, &request, &layout, args.num_images)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_seed_is_used_verbatim() {
        assert_eq!(resolve_seed(Some(7)), 7);
        assert_eq!(resolve_seed(Some(0)), 0);
    }

    #[test]
    fn omitted_seed_draws_below_two_to_the_thirtieth() {
        for _ in 0..64 {
            let seed = resolve_seed(None);
            assert!((0..1 << 30).contains(&seed));
        }
    }

    #[test]
    fn flag_defaults_match_the_documented_surface() {
        let args = Args::parse_from(["sdgen"]);
        assert_eq!(args.model, "lmz/rust-stable-diffusion-v1-5");
        assert_eq!(args.device, DeviceRequest::Cpu);
        assert_eq!(args.seed, None);
        assert_eq!(args.beta_start, 0.00085);
        assert_eq!(args.beta_end, 0.012);
        assert_eq!(args.beta_schedule, BetaScheduleKind::ScaledLinear);
        assert_eq!(args.num_inference_steps, 32);
        assert_eq!(args.guidance_scale, 7.5);
        assert_eq!(args.eta, 0.0);
        assert_eq!(args.tokenizer, "openai/clip-vit-large-patch14");
        assert_eq!(args.prompt, DEFAULT_PROMPT);
        assert_eq!(args.init_image, None);
        assert_eq!(args.strength, 0.5);
        assert_eq!(args.mask, None);
        assert_eq!(args.output, "output.png");
        assert_eq!(args.num_images, 1);
        assert_eq!(args.token, None);
    }
}
