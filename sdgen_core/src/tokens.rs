use std::fs;

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

/// Where to find the Hugging Face access token used for gated repositories.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A token passed directly on the command line.
    Literal(String),
    /// The token cached at `~/.cache/huggingface/token`.
    CacheToken,
    /// Make unauthenticated requests.
    None,
}

#[derive(Error, Debug)]
enum TokenRetrievalError {
    #[error("no home directory")]
    HomeDirectoryMissing,
}

/// Reads a token from the given source. A source that cannot be read logs a
/// warning and resolves to no token rather than failing the run.
pub(crate) fn get_token(source: &TokenSource) -> Result<Option<String>> {
    let token = match source {
        TokenSource::Literal(data) => Some(data.clone()),
        TokenSource::CacheToken => {
            let path = dirs::home_dir()
                .ok_or(TokenRetrievalError::HomeDirectoryMissing)?
                .join(".cache/huggingface/token");
            fs::read_to_string(&path).ok().or_else(|| {
                warn!("could not read token at {}, using no HF token", path.display());
                None
            })
        }
        TokenSource::None => None,
    };

    Ok(token.map(|t| t.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_token_is_used_verbatim() {
        let token = get_token(&TokenSource::Literal("hf_abc".to_string())).unwrap();
        assert_eq!(token.as_deref(), Some("hf_abc"));
    }

    #[test]
    fn literal_token_is_trimmed() {
        let token = get_token(&TokenSource::Literal("hf_abc\n".to_string())).unwrap();
        assert_eq!(token.as_deref(), Some("hf_abc"));
    }

    #[test]
    fn none_source_yields_no_token() {
        assert!(get_token(&TokenSource::None).unwrap().is_none());
    }
}
