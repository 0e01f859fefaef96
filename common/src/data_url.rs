//! `data:` URLs as produced by `canvas.toDataURL()` in the browser.
//!
use base64::{prelude::BASE64_STANDARD, Engine};
use thiserror::Error;

const IMAGE_PREFIX: &str = "data:image";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("not an image data URL")]
    NotAnImage,
    #[error("data URL has no ',' between header and payload")]
    MissingComma,
    #[error("data URL payload is not base64 encoded")]
    NotBase64,
    #[error("data URL payload is empty")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),
}

/// Decoded image data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub data: Vec<u8>,
}

impl DataUrl {
    /// Parse an image data URL, e.g. `data:image/png;base64,iVBORw0KGgo...`.
    pub fn parse(input: &str) -> Result<Self, DataUrlError> {
        let input = input.trim();
        if !input.starts_with(IMAGE_PREFIX) {
            return Err(DataUrlError::NotAnImage);
        }

        // Header and payload are separated by the first comma
        let (header, payload) = input.split_once(',').ok_or(DataUrlError::MissingComma)?;

        let mut params = header["data:".len()..].split(';');
        let mime = params.next().unwrap_or_default().to_owned();
        if !params.any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(DataUrlError::NotBase64);
        }

        let payload = payload.trim();
        if payload.is_empty() {
            return Err(DataUrlError::Empty);
        }

        let data = BASE64_STANDARD
            .decode(payload)
            .map_err(|e| DataUrlError::InvalidBase64(e.to_string()))?;

        Ok(Self { mime, data })
    }

    /// Encode bytes as a base64 data URL.
    pub fn encode(mime: &str, data: &[u8]) -> String {
        format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(data))
    }
}
