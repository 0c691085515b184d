use beatmapbot_core::{CoreError, MapKind, OsuApiError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

const OSU_API_BASE: &str = "https://osu.ppy.sh/api";

/// One beatmap record from the osu! v1 `get_beatmaps` endpoint.
/// The v1 API sends every field as a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatmapInfo {
    pub beatmap_id: String,
    pub beatmapset_id: String,
    pub artist: String,
    pub title: String,
    pub creator: String,
    pub version: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub approved: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub bpm: String,
    #[serde(default)]
    pub difficultyrating: String,
    #[serde(default)]
    pub hit_length: String,
    #[serde(default)]
    pub total_length: String,
    #[serde(default)]
    pub max_combo: Option<String>,
}

/// Seam between the comment composer and the osu! API, so composition
/// can be tested against a fake lookup.
pub trait BeatmapSource {
    fn lookup(
        &self,
        kind: MapKind,
        id: u64,
    ) -> impl std::future::Future<Output = Result<Vec<BeatmapInfo>, CoreError>>;
}

/// osu! v1 API client with a bounded in-memory response cache.
///
/// A lookup that succeeds is cached, including the empty result for an
/// unknown map; transport and API errors are not. Eviction is by
/// insertion order once the configured capacity is reached.
#[derive(Debug)]
pub struct OsuClient {
    http_client: Client,
    api_key: String,
    cache: Mutex<ResponseCache>,
}

#[derive(Debug)]
struct ResponseCache {
    entries: HashMap<(MapKind, u64), Vec<BeatmapInfo>>,
    order: VecDeque<(MapKind, u64)>,
    capacity: usize,
}

impl ResponseCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, key: &(MapKind, u64)) -> Option<Vec<BeatmapInfo>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: (MapKind, u64), value: Vec<BeatmapInfo>) {
        if self.capacity == 0 || self.entries.contains_key(&key) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.entries.insert(key, value);
    }
}

impl OsuClient {
    pub fn new(api_key: String, user_agent: &str, cache_size: usize) -> Self {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            api_key,
            cache: Mutex::new(ResponseCache::new(cache_size)),
        }
    }

    async fn fetch(&self, kind: MapKind, id: u64) -> Result<Vec<BeatmapInfo>, CoreError> {
        let url = format!("{OSU_API_BASE}/get_beatmaps");
        let id_str = id.to_string();
        let params = [("k", self.api_key.as_str()), (kind.as_param(), &id_str)];

        debug!("Fetching beatmap info for {}={}", kind.as_param(), id);
        let response = self.http_client.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!("osu! API request failed with status {} for id {}", status, id);
            return Err(CoreError::OsuApi(OsuApiError::InvalidResponse {
                details: format!("status {status}"),
            }));
        }

        let payload: serde_json::Value = response.json().await?;
        if let Some(message) = payload.get("error").and_then(|e| e.as_str()) {
            return Err(CoreError::OsuApi(OsuApiError::Api {
                message: message.to_string(),
            }));
        }

        let maps: Vec<BeatmapInfo> = serde_json::from_value(payload).map_err(|e| {
            error!("Failed to parse osu! API response: {}", e);
            CoreError::OsuApi(OsuApiError::InvalidResponse {
                details: e.to_string(),
            })
        })?;

        info!(
            "Retrieved {} record(s) for {}={}",
            maps.len(),
            kind.as_param(),
            id
        );
        Ok(maps)
    }
}

impl BeatmapSource for OsuClient {
    async fn lookup(&self, kind: MapKind, id: u64) -> Result<Vec<BeatmapInfo>, CoreError> {
        let key = (kind, id);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            debug!("Cache hit for {}={}", kind.as_param(), id);
            return Ok(cached);
        }

        let maps = self.fetch(kind, id).await?;
        self.cache.lock().unwrap().insert(key, maps.clone());
        Ok(maps)
    }
}
