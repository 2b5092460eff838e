//! Gravitational-wave skymaps: fetching, decoding and pointing selection.

pub mod coords;
pub mod fits;
pub mod healpix;
pub mod pointings;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use tracet_core::errors::SkymapError;
use tracet_core::traits::SkymapSource;

use self::healpix::MultiOrderMap;
use self::pointings::{derive_pointings, Pointing, Spot};

/// Decode a multi-order FITS skymap.
pub fn load_map(bytes: &[u8]) -> Result<MultiOrderMap, SkymapError> {
    let table = fits::read_bintable(bytes)?;
    let uniq = table.column_i64("UNIQ")?;
    let density = table.column_f64("PROBDENSITY")?;
    MultiOrderMap::from_columns(&uniq, &density)
}

/// Fetch, decode and rank the pointings of one skymap over `spots`.
pub fn pointings_for(
    source: &dyn SkymapSource,
    reference: &str,
    spots: &[Spot],
) -> Result<Vec<Pointing>, SkymapError> {
    let bytes = source.fetch(reference)?;
    let map = load_map(&bytes)?;
    debug!(reference, pixels = map.len(), "decoded skymap");
    derive_pointings(&map, spots)
}

/// Reads skymaps from `http(s)://` URLs or local paths, caching the raw bytes
/// for the life of the process.
pub struct DefaultSkymapSource {
    http: Client,
    cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl std::fmt::Debug for DefaultSkymapSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultSkymapSource").finish_non_exhaustive()
    }
}

impl DefaultSkymapSource {
    pub fn new(timeout: Duration) -> Result<Self, SkymapError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SkymapError::Fetch {
                reference: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, SkymapError> {
        let fail = |reason: String| SkymapError::Fetch {
            reference: url.to_string(),
            reason,
        };
        let resp = self.http.get(url).send().map_err(|e| fail(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fail(format!("HTTP {}", resp.status())));
        }
        let bytes = resp.bytes().map_err(|e| fail(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl SkymapSource for DefaultSkymapSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, SkymapError> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(reference) {
                return Ok(hit.clone());
            }
        }

        let bytes = if reference.starts_with("http://") || reference.starts_with("https://") {
            self.download(reference)?
        } else {
            std::fs::read(reference).map_err(|e| SkymapError::Fetch {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(reference.to_string(), bytes.clone());
        }
        Ok(bytes)
    }
}
