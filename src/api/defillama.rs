use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::venue::{RawVenue, ScanFilter, SourceError, SourceResult, VenueCategory, VenueKey, VenueSource};

use super::{ApiResult, JsonHttp, value_as_f64};

pub const DEFAULT_BASE_URL: &str = "https://yields.llama.fi";
const SOURCE_NAME: &str = "defillama";

#[derive(Debug, Deserialize)]
struct PoolsEnvelope {
    #[serde(default)]
    data: Vec<PoolEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolEntry {
    #[serde(default)]
    chain: String,
    #[serde(default)]
    project: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    tvl_usd: Value,
    #[serde(default)]
    apy: Value,
    #[serde(default)]
    pool: String,
    #[serde(default)]
    exposure: Option<String>,
    #[serde(default)]
    underlying_tokens: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    #[serde(default)]
    data: Vec<ChartPoint>,
}

#[derive(Debug, Deserialize)]
struct ChartPoint {
    #[serde(default)]
    apy: Value,
}

/// DefiLlama 收益注册表：既是通用场所来源，也提供单池历史 APY。
#[derive(Debug, Clone)]
pub struct DefiLlamaClient {
    http: JsonHttp,
    limit: usize,
}

impl DefiLlamaClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
        limit: usize,
    ) -> ApiResult<Self> {
        Ok(Self {
            http: JsonHttp::new(SOURCE_NAME, client, base_url, timeout)?,
            limit,
        })
    }

    /// 按时间升序返回最近 `days` 天的 APY 序列。
    pub async fn pool_history(&self, pool_id: &str, days: usize) -> ApiResult<Vec<f64>> {
        let envelope: ChartEnvelope = self.http.get_json(&format!("chart/{pool_id}")).await?;
        let series: Vec<f64> = envelope
            .data
            .iter()
            .filter_map(|point| value_as_f64(&point.apy))
            .collect();
        let skip = series.len().saturating_sub(days);
        Ok(series.into_iter().skip(skip).collect())
    }

    fn convert(entry: PoolEntry) -> Option<RawVenue> {
        if entry.project.is_empty() || entry.chain.is_empty() {
            return None;
        }
        if entry.exposure.as_deref() == Some("multi") {
            return None;
        }
        let apy = value_as_f64(&entry.apy)?;
        let tvl = value_as_f64(&entry.tvl_usd).and_then(Decimal::from_f64)?;
        let token = entry
            .underlying_tokens
            .as_ref()
            .and_then(|tokens| tokens.first().cloned())
            .unwrap_or_else(|| entry.pool.clone());
        if token.is_empty() {
            return None;
        }

        Some(RawVenue {
            key: VenueKey::new(&entry.project, entry.chain.as_str(), &token),
            category: VenueCategory::classify(&entry.project, &entry.symbol),
            symbol: entry.symbol,
            apy,
            tvl: tvl.round_dp(2),
            audited: None,
            launched_at: None,
            source_ref: Some(entry.pool).filter(|pool| !pool.is_empty()),
        })
    }
}

#[async_trait]
impl VenueSource for DefiLlamaClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        let envelope: PoolsEnvelope = self
            .http
            .get_json("pools")
            .await
            .map_err(|err| SourceError::api(SOURCE_NAME, err))?;
        let total = envelope.data.len();

        let mut venues: Vec<RawVenue> = envelope
            .data
            .into_iter()
            .filter_map(Self::convert)
            .filter(|venue| filter.admits(venue))
            .collect();
        venues.sort_by(|a, b| b.tvl.cmp(&a.tvl));
        venues.truncate(self.limit);

        debug!(
            target: "api::defillama",
            total,
            kept = venues.len(),
            "DefiLlama 池子过滤完成"
        );
        Ok(venues)
    }
}
