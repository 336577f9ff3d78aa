use diffusers::schedulers::lms_discrete::{LMSDiscreteScheduler, LMSDiscreteSchedulerConfig};
use diffusers::schedulers::pndm::{PNDMScheduler, PNDMSchedulerConfig};
use diffusers::schedulers::BetaSchedule;
use tch::Tensor;

/// Shape of the `--beta-schedule` noise curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum BetaScheduleKind {
    Linear,
    ScaledLinear,
    SquaredcosCapV2,
}

impl BetaScheduleKind {
    fn to_external(self) -> BetaSchedule {
        match self {
            Self::Linear => BetaSchedule::Linear,
            Self::ScaledLinear => BetaSchedule::ScaledLinear,
            Self::SquaredcosCapV2 => BetaSchedule::SquaredcosCapV2,
        }
    }
}

/// Noise-curve parameters shared by both schedule variants.
#[derive(Debug, Clone, Copy)]
pub struct BetaCurve {
    pub beta_start: f64,
    pub beta_end: f64,
    pub beta_schedule: BetaScheduleKind,
}

/// The noise schedule selected for a run. Built once at startup; the external
/// scheduler's per-invocation stepping state is materialized through
/// [`NoiseSchedule::sampler`].
#[derive(Debug, Clone, Copy)]
pub enum NoiseSchedule {
    /// Linear multistep, used for pure text-to-image runs.
    LinearMultistep(BetaCurve),
    /// Pseudo-numerical with the initial Runge-Kutta steps skipped, used
    /// whenever an initial image is supplied.
    PseudoNumerical(BetaCurve),
}

impl NoiseSchedule {
    /// Selects the schedule variant. The presence of an initial image alone
    /// decides: image-to-image always gets the step-skipping variant.
    pub fn for_mode(curve: BetaCurve, image_to_image: bool) -> Self {
        if image_to_image {
            Self::PseudoNumerical(curve)
        } else {
            Self::LinearMultistep(curve)
        }
    }

    /// Builds the external scheduler for one invocation at the given step
    /// count.
    pub fn sampler(&self, inference_steps: usize) -> Sampler {
        match self {
            Self::LinearMultistep(curve) => Sampler::LinearMultistep(LMSDiscreteScheduler::new(
                inference_steps,
                LMSDiscreteSchedulerConfig {
                    beta_start: curve.beta_start,
                    beta_end: curve.beta_end,
                    beta_schedule: curve.beta_schedule.to_external(),
                    ..Default::default()
                },
            )),
            Self::PseudoNumerical(curve) => Sampler::PseudoNumerical(PNDMScheduler::new(
                inference_steps,
                PNDMSchedulerConfig {
                    beta_start: curve.beta_start,
                    beta_end: curve.beta_end,
                    beta_schedule: curve.beta_schedule.to_external(),
                    ..Default::default()
                },
            )),
        }
    }
}

/// Materialized scheduler state for one engine invocation. Forwards every
/// call to the external implementation.
pub enum Sampler {
    LinearMultistep(LMSDiscreteScheduler),
    PseudoNumerical(PNDMScheduler),
}

impl Sampler {
    pub fn timesteps(&self) -> Vec<f64> {
        match self {
            Self::LinearMultistep(s) => s.timesteps().iter().map(|&t| t as f64).collect(),
            Self::PseudoNumerical(s) => s.timesteps().iter().map(|&t| t as f64).collect(),
        }
    }

    pub fn init_noise_sigma(&self) -> f64 {
        match self {
            Self::LinearMultistep(s) => s.init_noise_sigma(),
            Self::PseudoNumerical(s) => s.init_noise_sigma(),
        }
    }

    pub fn scale_model_input(&self, sample: Tensor, timestep: f64) -> Tensor {
        match self {
            Self::LinearMultistep(s) => s.scale_model_input(sample, timestep),
            Self::PseudoNumerical(_) => sample,
        }
    }

    // Linear-multistep timesteps are fractional; pseudo-numerical ones are
    // whole-numbered and cast back down at the seam.
    pub fn step(&mut self, model_output: &Tensor, timestep: f64, sample: &Tensor) -> Tensor {
        match self {
            Self::LinearMultistep(s) => s.step(model_output, timestep, sample),
            Self::PseudoNumerical(s) => s.step(model_output, timestep as usize, sample),
        }
    }

    pub fn add_noise(&self, original: &Tensor, noise: Tensor, timestep: f64) -> Tensor {
        match self {
            Self::LinearMultistep(s) => s.add_noise(original, noise, timestep),
            Self::PseudoNumerical(s) => s.add_noise(original, noise, timestep as usize),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> BetaCurve {
        BetaCurve {
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaScheduleKind::ScaledLinear,
        }
    }

    #[test]
    fn text_to_image_selects_linear_multistep() {
        assert!(matches!(
            NoiseSchedule::for_mode(curve(), false),
            NoiseSchedule::LinearMultistep(_)
        ));
    }

    #[test]
    fn image_to_image_selects_step_skipping_variant() {
        assert!(matches!(
            NoiseSchedule::for_mode(curve(), true),
            NoiseSchedule::PseudoNumerical(_)
        ));
    }

    #[test]
    fn pseudo_numerical_sampler_noises_and_steps_latents() {
        use tch::{Device, Kind};

        let mut sampler = NoiseSchedule::for_mode(curve(), true).sampler(8);
        let timesteps = sampler.timesteps();
        assert!(!timesteps.is_empty());

        let latents = Tensor::zeros([1, 4, 8, 8], (Kind::Float, Device::Cpu));
        let noise = latents.randn_like();
        let noised = sampler.add_noise(&latents, noise, timesteps[timesteps.len() / 2]);
        assert_eq!(noised.size(), latents.size());

        let stepped = sampler.step(&noised.randn_like(), timesteps[0], &noised);
        assert_eq!(stepped.size(), latents.size());
    }

    #[test]
    fn pseudo_numerical_initial_noise_is_unscaled() {
        let sampler = NoiseSchedule::for_mode(curve(), true).sampler(8);
        assert_eq!(sampler.init_noise_sigma(), 1.0);
    }
}
