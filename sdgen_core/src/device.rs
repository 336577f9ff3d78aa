use std::str::FromStr;

use tch::Device;
use thiserror::Error;

/// A parsed `--device` flag, resolved to a torch device lazily so that flag
/// parsing never touches the torch runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    Cpu,
    Cuda(usize),
    Mps,
}

#[derive(Error, Debug)]
pub enum DeviceParseError {
    #[error("unknown device `{0}`, expected `cpu`, `cuda`, `cuda:<index>` or `mps`")]
    Unknown(String),
    #[error("invalid cuda device index `{0}`")]
    BadIndex(String),
}

impl FromStr for DeviceRequest {
    type Err = DeviceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case-insensitive: the conventional spelling of the default is `CPU`.
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            "mps" => Ok(Self::Mps),
            other => match other.strip_prefix("cuda:") {
                Some(index) => index
                    .parse::<usize>()
                    .map(Self::Cuda)
                    .map_err(|_| DeviceParseError::BadIndex(index.to_string())),
                None => Err(DeviceParseError::Unknown(s.to_string())),
            },
        }
    }
}

impl DeviceRequest {
    pub fn device(self) -> Device {
        match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda(index) => Device::Cuda(index),
            Self::Mps => Device::Mps,
        }
    }
}
