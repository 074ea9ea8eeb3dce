use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::api::ApiError;
use crate::config::StaticVenueConfig;

use super::types::{ChainId, RawVenue, VenueCategory, VenueKey};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("venue source `{source_name}` api error: {error}")]
    Api {
        source_name: String,
        #[source]
        error: ApiError,
    },
    #[error("venue source `{source_name}` timed out after {timeout_ms} ms")]
    Timeout { source_name: String, timeout_ms: u64 },
    #[error("venue source `{source_name}` returned unexpected payload: {reason}")]
    Schema { source_name: String, reason: String },
    #[error("venue source `{source_name}` unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },
}

impl SourceError {
    pub fn api(source_name: &str, error: ApiError) -> Self {
        SourceError::Api {
            source_name: source_name.to_string(),
            error,
        }
    }

    pub fn timeout(source_name: &str, timeout: Duration) -> Self {
        SourceError::Timeout {
            source_name: source_name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SourceError::Api { .. } => "source_api",
            SourceError::Timeout { .. } => "source_timeout",
            SourceError::Schema { .. } => "source_schema",
            SourceError::Unavailable { .. } => "source_unavailable",
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

/// 扫描过滤条件，各数据源在本地先行过滤。
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFilter {
    pub chains: Vec<ChainId>,
    pub min_apy: f64,
    pub min_tvl: Decimal,
}

impl ScanFilter {
    pub fn allows_chain(&self, chain: &ChainId) -> bool {
        self.chains.is_empty() || self.chains.contains(chain)
    }

    pub fn admits(&self, raw: &RawVenue) -> bool {
        self.allows_chain(&raw.key.chain)
            && raw.apy.is_finite()
            && raw.apy >= self.min_apy
            && raw.tvl >= self.min_tvl
    }
}

/// 场所数据源：通用注册表或协议专属探针。
#[async_trait]
pub trait VenueSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>>;
}

/// 配置里写死的场所（例如原生质押），不依赖网络。
#[derive(Debug, Clone)]
pub struct StaticSource {
    name: String,
    venues: Vec<RawVenue>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, venues: Vec<RawVenue>) -> Self {
        Self {
            name: name.into(),
            venues,
        }
    }

    pub fn from_config(entries: &[StaticVenueConfig]) -> Self {
        let venues = entries
            .iter()
            .map(|entry| {
                let key = VenueKey::new(&entry.protocol, entry.chain.as_str(), &entry.token);
                let category = entry
                    .category
                    .unwrap_or_else(|| VenueCategory::classify(&entry.protocol, &entry.symbol));
                RawVenue {
                    key,
                    symbol: entry.symbol.clone(),
                    apy: entry.apy,
                    tvl: entry.tvl_usd,
                    category,
                    audited: entry.audited,
                    launched_at: entry.launched_at,
                    source_ref: None,
                }
            })
            .collect();
        Self::new("static", venues)
    }
}

#[async_trait]
impl VenueSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        Ok(self
            .venues
            .iter()
            .filter(|venue| filter.admits(venue))
            .cloned()
            .collect())
    }
}
