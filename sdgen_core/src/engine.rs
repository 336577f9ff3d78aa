use std::path::Path;

use anyhow::{Context, Result};
use diffusers::models::{unet_2d::UNet2DConditionModel, vae::AutoEncoderKL};
use diffusers::pipelines::stable_diffusion::StableDiffusionConfig;
use diffusers::transformers::clip::ClipTextTransformer;
use image::{GrayImage, RgbImage};
use tch::nn::Module;
use tch::{Device, Kind, Tensor};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::image_io::{image_to_tensor, mask_to_keep_tensor, tensor_to_image};
use crate::model_source::{resolve_tokenizer_file, FileLoader, ModelSource};
use crate::schedule::NoiseSchedule;
use crate::tokens::TokenSource;

/// Classifier-free guidance kicks in above this scale.
const GUIDANCE_THRESHOLD: f64 = 1.0;
/// VAE latent scaling factor for Stable Diffusion v1.x.
const LATENT_SCALE: f64 = 0.18215;
/// Context length of the v1.x CLIP text encoder.
const CLIP_CONTEXT_LENGTH: usize = 77;
const PAD_TOKEN: &str = "<|endoftext|>";

/// One generation request. The orchestrator passes the same request for every
/// image in a run; only the global RNG state differs between invocations.
///
/// `eta` is carried for schedules with stochastic steps; neither shipped
/// schedule variant consumes it.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub init_image: Option<RgbImage>,
    pub mask: Option<GrayImage>,
    pub strength: f64,
    pub num_inference_steps: usize,
    pub guidance_scale: f64,
    pub eta: f64,
}

/// Seam between the generation loop and the real engine, so the loop can be
/// exercised with a stub.
pub trait ImageEngine {
    fn generate(&self, request: &GenerateRequest) -> Result<RgbImage>;
}

/// The Stable Diffusion inference pipeline: CLIP tokenizer and text encoder,
/// UNet and VAE, wired to a noise schedule. Constructed once per run and
/// invoked synchronously.
pub struct StableDiffusionEngine {
    tokenizer: Tokenizer,
    pad_token_id: u32,
    clip: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    schedule: NoiseSchedule,
    sd_config: StableDiffusionConfig,
    device: Device,
}

/// Latents blended back toward the noised original after every scheduler
/// step when inpainting.
struct LatentBlend {
    keep: Tensor,
    regen: Tensor,
    init_latents: Tensor,
    noise: Tensor,
}

impl StableDiffusionEngine {
    pub fn new(
        source: ModelSource,
        tokenizer: &str,
        schedule: NoiseSchedule,
        device: Device,
        token: TokenSource,
        silent: bool,
    ) -> Result<Self> {
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);

        let tokenizer_file = resolve_tokenizer_file(tokenizer, silent, &token)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_file).map_err(anyhow::Error::msg)?;
        let pad_token_id = tokenizer
            .token_to_id(PAD_TOKEN)
            .context("tokenizer has no end-of-text token")?;

        let loader = FileLoader::from_model_source(&source, silent, &token, None)?;
        let components = loader.model_components()?;

        info!("loading CLIP text encoder");
        let clip = sd_config.build_clip_transformer(utf8_path(&components.clip)?, device)?;
        info!("loading UNet");
        let unet = sd_config.build_unet(utf8_path(&components.unet)?, device, 4)?;
        info!("loading VAE");
        let vae = sd_config.build_vae(utf8_path(&components.vae)?, device)?;

        Ok(Self {
            tokenizer,
            pad_token_id,
            clip,
            unet,
            vae,
            schedule,
            sd_config,
            device,
        })
    }

    /// Generation resolution in pixels.
    pub fn image_size(&self) -> (u32, u32) {
        (self.sd_config.width as u32, self.sd_config.height as u32)
    }

    /// Latent-space resolution, one eighth of the pixel resolution.
    pub fn latent_size(&self) -> (u32, u32) {
        let (width, height) = self.image_size();
        (width / 8, height / 8)
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?;
        let tokens = pad_tokens(encoding.get_ids().to_vec(), self.pad_token_id);
        let tokens = Tensor::from_slice(&tokens).view((1, -1)).to_device(self.device);
        Ok(self.clip.forward(&tokens))
    }

    /// Encodes the prompt, prepending the unconditional embedding when
    /// classifier-free guidance is active.
    fn text_embeddings(&self, prompt: &str, guided: bool) -> Result<Tensor> {
        let cond = self.encode_prompt(prompt)?;
        if !guided {
            return Ok(cond);
        }
        let uncond = self.encode_prompt("")?;
        Ok(Tensor::cat(&[uncond, cond], 0))
    }

    fn generate_impl(&self, request: &GenerateRequest) -> Result<RgbImage> {
        let steps = request.num_inference_steps;
        let mut sampler = self.schedule.sampler(steps);
        let timesteps = sampler.timesteps();

        let guided = request.guidance_scale > GUIDANCE_THRESHOLD;
        let text_embeddings = self.text_embeddings(&request.prompt, guided)?;

        let (latent_width, latent_height) = self.latent_size();
        let (mut latents, t_start, blend) = match &request.init_image {
            None => {
                let latents = Tensor::randn(
                    [1, 4, latent_height as i64, latent_width as i64],
                    (Kind::Float, self.device),
                ) * sampler.init_noise_sigma();
                (latents, 0, None)
            }
            Some(image) => {
                let image = image_to_tensor(image, self.device);
                let init_latents = self.vae.encode(&image).sample() * LATENT_SCALE;
                let noise = init_latents.randn_like();
                let t_start =
                    steps.saturating_sub((steps as f64 * request.strength).round() as usize);
                let latents = sampler.add_noise(&init_latents, noise.copy(), timesteps[t_start]);
                let blend = request.mask.as_ref().map(|mask| {
                    let keep = mask_to_keep_tensor(mask, self.device);
                    let regen = keep.ones_like() - &keep;
                    LatentBlend {
                        keep,
                        regen,
                        init_latents,
                        noise,
                    }
                });
                (latents, t_start, blend)
            }
        };

        for (index, &timestep) in timesteps.iter().enumerate() {
            if index < t_start {
                continue;
            }
            let latent_model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)
            } else {
                latents.shallow_clone()
            };
            let latent_model_input = sampler.scale_model_input(latent_model_input, timestep);
            let noise_pred = self
                .unet
                .forward(&latent_model_input, timestep, &text_embeddings);
            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0);
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                uncond + (cond - uncond) * request.guidance_scale
            } else {
                noise_pred
            };
            latents = sampler.step(&noise_pred, timestep, &latents);
            if let Some(blend) = &blend {
                let noised = sampler.add_noise(&blend.init_latents, blend.noise.copy(), timestep);
                latents = noised * &blend.keep + latents * &blend.regen;
            }
            debug!(step = index + 1, timestep, "denoising step complete");
        }

        let image = self.vae.decode(&(&latents / LATENT_SCALE));
        tensor_to_image(&image)
    }
}

impl ImageEngine for StableDiffusionEngine {
    fn generate(&self, request: &GenerateRequest) -> Result<RgbImage> {
        tch::no_grad(|| self.generate_impl(request))
    }
}

fn utf8_path(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("weight path {} is not valid UTF-8", path.display()))
}

/// Truncates or pads a token sequence to the CLIP context length.
fn pad_tokens(mut tokens: Vec<u32>, pad_token_id: u32) -> Vec<i64> {
    tokens.truncate(CLIP_CONTEXT_LENGTH);
    while tokens.len() < CLIP_CONTEXT_LENGTH {
        tokens.push(pad_token_id);
    }
    tokens.into_iter().map(i64::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prompts_are_padded_to_the_context_length() {
        let tokens = pad_tokens(vec![49406, 320, 49407], 49407);
        assert_eq!(tokens.len(), CLIP_CONTEXT_LENGTH);
        assert_eq!(&tokens[..3], &[49406, 320, 49407]);
        assert!(tokens[3..].iter().all(|&t| t == 49407));
    }

    #[test]
    fn overlong_prompts_are_truncated_to_the_context_length() {
        let tokens = pad_tokens(vec![7; 200], 0);
        assert_eq!(tokens.len(), CLIP_CONTEXT_LENGTH);
        assert!(tokens.iter().all(|&t| t == 7));
    }
}
