//! Live municipal data providers
//!
//! Uniform async gateway over the external weather, transit and
//! demographics APIs. Every provider failure is recovered to `None` here;
//! callers never see a network error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join3, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;

/// Current conditions, cited to the weather API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub temperature_f: i32,
    pub humidity_pct: u32,
    pub condition: String,
    pub source: String,
}

/// Upcoming arrival predictions, cited to the transit API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitRecord {
    pub prediction_count: usize,
    pub route: String,
    pub source: String,
}

/// Population and income figures, cited to the census API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemographicsRecord {
    pub population: u64,
    pub median_income: u64,
    pub source: String,
}

/// Which live-data categories a query asked for
///
/// Keyword classification on the lowercased query; several categories may
/// fire in one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryIntent {
    pub weather: bool,
    pub transit: bool,
    pub demographics: bool,
}

impl QueryIntent {
    pub fn detect(query: &str) -> Self {
        let lower = query.to_lowercase();
        Self {
            weather: lower.contains("weather") || lower.contains("temperature"),
            transit: lower.contains("mbta")
                || lower.contains("transit")
                || lower.contains("blue line")
                || lower.contains("train"),
            demographics: lower.contains("population")
                || lower.contains("census")
                || lower.contains("demographics"),
        }
    }

    pub fn any(&self) -> bool {
        self.weather || self.transit || self.demographics
    }

    /// Citation labels for the providers this intent will call
    pub fn api_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.weather {
            labels.push(WEATHER_SOURCE.to_string());
        }
        if self.transit {
            labels.push(TRANSIT_SOURCE.to_string());
        }
        if self.demographics {
            labels.push(DEMOGRAPHICS_SOURCE.to_string());
        }
        labels
    }
}

/// Settled results of one turn's provider calls
///
/// A provider that was not called, or that failed, is simply absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveDataSet {
    pub weather: Option<WeatherRecord>,
    pub transit: Option<TransitRecord>,
    pub demographics: Option<DemographicsRecord>,
}

impl LiveDataSet {
    pub fn is_empty(&self) -> bool {
        self.weather.is_none() && self.transit.is_none() && self.demographics.is_none()
    }
}

pub const WEATHER_SOURCE: &str = "Visual Crossing Weather API";
pub const TRANSIT_SOURCE: &str = "MBTA API v3";
pub const DEMOGRAPHICS_SOURCE: &str = "US Census Bureau API";

/// Seam between the gateway and the concrete providers
///
/// Implementations may fail; the gateway owns the recovery policy.
pub trait DataSource: Send + Sync {
    fn fetch_weather(&self) -> BoxFuture<'_, anyhow::Result<WeatherRecord>>;
    fn fetch_transit(&self) -> BoxFuture<'_, anyhow::Result<TransitRecord>>;
    fn fetch_demographics(&self) -> BoxFuture<'_, anyhow::Result<DemographicsRecord>>;
}

/// HTTP implementation of [`DataSource`] against the real municipal APIs
pub struct HttpDataSource {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct VcResponse {
    #[serde(rename = "currentConditions")]
    current_conditions: VcConditions,
}

#[derive(Deserialize)]
struct VcConditions {
    temp: f64,
    humidity: f64,
    conditions: String,
}

#[derive(Deserialize)]
struct MbtaPredictions {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

impl HttpDataSource {
    pub fn new(config: ProviderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

impl DataSource for HttpDataSource {
    fn fetch_weather(&self) -> BoxFuture<'_, anyhow::Result<WeatherRecord>> {
        Box::pin(async {
            let body: VcResponse = self
                .client
                .get(&self.config.weather_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(WeatherRecord {
                temperature_f: body.current_conditions.temp.round() as i32,
                humidity_pct: body.current_conditions.humidity.round() as u32,
                condition: body.current_conditions.conditions,
                source: WEATHER_SOURCE.to_string(),
            })
        })
    }

    fn fetch_transit(&self) -> BoxFuture<'_, anyhow::Result<TransitRecord>> {
        Box::pin(async {
            let body: MbtaPredictions = self
                .client
                .get(&self.config.transit_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(TransitRecord {
                prediction_count: body.data.len(),
                route: self.config.transit_route.clone(),
                source: TRANSIT_SOURCE.to_string(),
            })
        })
    }

    fn fetch_demographics(&self) -> BoxFuture<'_, anyhow::Result<DemographicsRecord>> {
        Box::pin(async {
            // Census ACS answers as a positional table: header row, then one
            // row per geography
            let rows: Vec<Vec<String>> = self
                .client
                .get(&self.config.demographics_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            let row = rows
                .get(1)
                .ok_or_else(|| anyhow::anyhow!("census response missing data row"))?;
            Ok(DemographicsRecord {
                population: row
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("census row missing population"))?
                    .parse()?,
                median_income: row
                    .get(1)
                    .ok_or_else(|| anyhow::anyhow!("census row missing income"))?
                    .parse()?,
                source: DEMOGRAPHICS_SOURCE.to_string(),
            })
        })
    }
}

/// Gateway that turns provider failures into absent records
#[derive(Clone)]
pub struct LiveDataGateway {
    source: Arc<dyn DataSource>,
}

impl LiveDataGateway {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    pub fn over_http(config: ProviderConfig) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(HttpDataSource::new(config)?)))
    }

    pub async fn fetch_weather(&self) -> Option<WeatherRecord> {
        match self.source.fetch_weather().await {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Weather provider unavailable: {}", e);
                None
            }
        }
    }

    pub async fn fetch_transit(&self) -> Option<TransitRecord> {
        match self.source.fetch_transit().await {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Transit provider unavailable: {}", e);
                None
            }
        }
    }

    pub async fn fetch_demographics(&self) -> Option<DemographicsRecord> {
        match self.source.fetch_demographics().await {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Demographics provider unavailable: {}", e);
                None
            }
        }
    }

    /// Fire the intended fetches in parallel and wait for all to settle
    ///
    /// Providers outside the intent are never called.
    pub async fn fetch(&self, intent: QueryIntent) -> LiveDataSet {
        let weather = async {
            if intent.weather {
                self.fetch_weather().await
            } else {
                None
            }
        };
        let transit = async {
            if intent.transit {
                self.fetch_transit().await
            } else {
                None
            }
        };
        let demographics = async {
            if intent.demographics {
                self.fetch_demographics().await
            } else {
                None
            }
        };

        let (weather, transit, demographics) = join3(weather, transit, demographics).await;
        LiveDataSet {
            weather,
            transit,
            demographics,
        }
    }
}
