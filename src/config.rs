use serde::{Deserialize, Serialize};

/// Retrieval parameters for the chunk store and lexical scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Characters per chunk when splitting document text
    pub chunk_size: usize,
    /// Maximum number of search results returned per query
    pub top_k: usize,
    /// Search excerpts longer than this are truncated with an ellipsis
    pub excerpt_chars: usize,
    /// Overview chunks longer than this are truncated with an ellipsis
    pub overview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            top_k: 5,
            excerpt_chars: 500,
            overview_chars: 400,
        }
    }
}

/// Endpoints and query parameters for the live-data providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Visual Crossing timeline endpoint for current conditions
    pub weather_url: String,
    /// MBTA v3 predictions endpoint
    pub transit_url: String,
    /// Route label attached to transit records
    pub transit_route: String,
    /// Census ACS 5-year endpoint (population + median income)
    pub demographics_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            weather_url:
                "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline/Revere,MA/today"
                    .to_string(),
            transit_url:
                "https://api-v3.mbta.com/predictions?filter[route]=Blue&filter[stop]=place-wondl,place-rbmnl&limit=5"
                    .to_string(),
            transit_route: "Blue Line".to_string(),
            demographics_url:
                "https://api.census.gov/data/2022/acs/acs5?get=B01003_001E,B19013_001E&for=place:57130&in=state:25"
                    .to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Voice capture parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Recording sessions longer than this are stopped automatically
    pub max_recording_secs: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_recording_secs: 120,
        }
    }
}

/// Transcription channel parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Outbound frames buffered before the channel applies backpressure
    pub pending_frames: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { pending_frames: 400 }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub retrieval: RetrievalConfig,
    pub providers: ProviderConfig,
    pub voice: VoiceConfig,
    pub channel: ChannelConfig,
}

pub fn read_app_config() -> AppConfig {
    read_app_config_from("config.toml")
}

pub fn read_app_config_from(path: &str) -> AppConfig {
    match std::fs::read_to_string(path) {
        Ok(config_str) => match toml::from_str(&config_str) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using default configuration.", path, e);
                AppConfig::default()
            }
        },
        Err(e) => {
            log::warn!("Failed to read {}: {}. Using default configuration.", path, e);
            AppConfig::default()
        }
    }
}
