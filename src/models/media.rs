use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const VIDEO_PREFIX: &str = "video://";
const DATA_PREFIX: &str = "data:";

/// Classification of a story's media reference string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef<'a> {
    /// Plain remote image URL; the only kind the prefetch cache accepts.
    Remote(&'a str),
    /// `video://`-prefixed URL, prefix stripped.
    Video(&'a str),
    /// Base64 payload of a `data:image;base64,...` reference.
    Inline(&'a str),
}

impl<'a> MediaRef<'a> {
    pub fn parse(raw: &'a str) -> Self {
        if let Some(url) = raw.strip_prefix(VIDEO_PREFIX) {
            MediaRef::Video(url)
        } else if raw.starts_with(DATA_PREFIX) {
            let payload = raw.split_once(',').map(|(_, data)| data).unwrap_or("");
            MediaRef::Inline(payload)
        } else {
            MediaRef::Remote(raw)
        }
    }

    pub fn is_prefetchable(&self) -> bool {
        matches!(self, MediaRef::Remote(_))
    }

    pub fn decode_inline(&self) -> Result<Vec<u8>> {
        match self {
            MediaRef::Inline(payload) => STANDARD
                .decode(payload.trim())
                .context("inline media payload is not valid base64"),
            _ => Err(anyhow!("media reference is not an inline payload")),
        }
    }
}
