use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use tracing::info;

use crate::tokens::{get_token, TokenSource};

/// Relative paths of the component weight files within a model source, in the
/// converted-weights layout used by `lmz/rust-stable-diffusion-v1-5`.
pub const CLIP_WEIGHTS: &str = "weights/clip_v1.5.safetensors";
pub const UNET_WEIGHTS: &str = "weights/unet_v1.5.safetensors";
pub const VAE_WEIGHTS: &str = "weights/vae_v1.5.safetensors";

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Source from which to load the model weights.
pub enum ModelSource {
    ModelId(String),
    LocalDir(PathBuf),
}

impl ModelSource {
    /// Interprets `--model`: an existing local directory is loaded from disk,
    /// anything else is treated as a Hugging Face model ID.
    pub fn from_flag(model: &str) -> Self {
        let path = PathBuf::from(model);
        if path.is_dir() {
            Self::LocalDir(path)
        } else {
            Self::ModelId(model.to_string())
        }
    }
}

impl Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelId(model_id) => write!(f, "model id: {model_id}"),
            Self::LocalDir(dir) => write!(f, "local dir: {}", dir.display()),
        }
    }
}

/// Resolves files within a [`ModelSource`] to local paths, downloading from
/// the Hub when the source is a model ID.
pub enum FileLoader {
    Api(Box<ApiRepo>),
    Local(PathBuf),
}

impl FileLoader {
    pub fn from_model_source(
        source: &ModelSource,
        silent: bool,
        token: &TokenSource,
        revision: Option<String>,
    ) -> anyhow::Result<Self> {
        info!("loading from source: {source}");
        match source {
            ModelSource::ModelId(model_id) => {
                let api = ApiBuilder::new()
                    .with_progress(!silent)
                    .with_token(get_token(token)?)
                    .build()?;
                let revision = revision.unwrap_or_else(|| "main".to_string());
                let repo = api.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision,
                ));
                Ok(Self::Api(Box::new(repo)))
            }
            ModelSource::LocalDir(dir) => Ok(Self::Local(dir.clone())),
        }
    }

    /// Resolves one file to a local path.
    pub fn get(&self, name: &str) -> anyhow::Result<PathBuf> {
        match self {
            Self::Api(api) => api
                .get(name)
                .map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(dir) => {
                let path = dir.join(name);
                if !path.is_file() {
                    anyhow::bail!("missing `{name}` under {}", dir.display());
                }
                Ok(path)
            }
        }
    }

    /// Resolves the CLIP, UNet and VAE weight files.
    pub fn model_components(&self) -> anyhow::Result<ModelComponents> {
        Ok(ModelComponents {
            clip: self.get(CLIP_WEIGHTS)?,
            unet: self.get(UNET_WEIGHTS)?,
            vae: self.get(VAE_WEIGHTS)?,
        })
    }
}

/// Local paths of the three component weight files.
pub struct ModelComponents {
    pub clip: PathBuf,
    pub unet: PathBuf,
    pub vae: PathBuf,
}

/// Resolves `--tokenizer` to a local `tokenizer.json`: a path to an existing
/// file is used as-is, anything else is a model ID on the Hub.
pub(crate) fn resolve_tokenizer_file(
    tokenizer: &str,
    silent: bool,
    token: &TokenSource,
) -> anyhow::Result<PathBuf> {
    let path = Path::new(tokenizer);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    let source = ModelSource::ModelId(tokenizer.to_string());
    let loader = FileLoader::from_model_source(&source, silent, token, None)?;
    loader.get(TOKENIZER_FILE)
}
