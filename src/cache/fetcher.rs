use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        RwLock,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Media download seam consumed by the prefetch cache.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// Serves a fixed set of payloads, optionally with artificial latency.
/// Unknown URLs get the fallback payload if one is set, otherwise a 404.
#[derive(Default)]
pub struct StaticFetcher {
    assets: RwLock<HashMap<String, Vec<u8>>>,
    fallback: Option<Vec<u8>>,
    latency: Duration,
    requests: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fallback(mut self, body: Vec<u8>) -> Self {
        self.fallback = Some(body);
        self
    }

    pub fn insert(&self, url: impl Into<String>, body: Vec<u8>) {
        let mut assets = match self.assets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        assets.insert(url.into(), body);
    }

    /// Number of fetches issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let body = {
            let assets = match self.assets.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            assets.get(url).cloned()
        };

        Ok(match body.or_else(|| self.fallback.clone()) {
            Some(body) => FetchResponse::ok(body),
            None => FetchResponse::not_found(),
        })
    }
}

/// Encodes a small solid-color PNG, used as demo and test media.
pub fn placeholder_png(red: u8, green: u8, blue: u8) -> Result<Vec<u8>> {
    let image = RgbImage::from_pixel(4, 4, Rgb([red, green, blue]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .context("failed to encode placeholder PNG")?;
    Ok(bytes.into_inner())
}
