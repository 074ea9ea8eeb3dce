use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::{ApiError, DefiLlamaClient};
use crate::retry::{RetryPolicy, retry_async};
use crate::venue::{VenueDirectory, VenueKey};

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("venue `{0}` is unknown to the market data provider")]
    UnknownVenue(VenueKey),
    #[error("no APY history available for `{0}`")]
    NoHistory(VenueKey),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl MarketError {
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::UnknownVenue(_) => "market_unknown_venue",
            MarketError::NoHistory(_) => "market_no_history",
            MarketError::Api(_) => "market_api",
        }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;

/// 行情数据：当前 APY 与按日历史序列（时间升序，百分比）。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn current_apy(&self, venue: &VenueKey) -> MarketResult<f64>;

    async fn historical_apy(&self, venue: &VenueKey, days: usize) -> MarketResult<Vec<f64>>;
}

/// 当前 APY 取自场所目录，历史序列取自 DefiLlama 的单池图表。
pub struct CatalogMarketData {
    directory: Arc<dyn VenueDirectory>,
    history: Option<DefiLlamaClient>,
    retry: RetryPolicy,
}

impl CatalogMarketData {
    pub fn new(
        directory: Arc<dyn VenueDirectory>,
        history: Option<DefiLlamaClient>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            directory,
            history,
            retry,
        }
    }
}

#[async_trait]
impl MarketDataProvider for CatalogMarketData {
    async fn current_apy(&self, venue: &VenueKey) -> MarketResult<f64> {
        self.directory
            .venue(venue)
            .await
            .map(|found| found.current_apy)
            .ok_or_else(|| MarketError::UnknownVenue(venue.clone()))
    }

    async fn historical_apy(&self, venue: &VenueKey, days: usize) -> MarketResult<Vec<f64>> {
        let Some(client) = &self.history else {
            return Err(MarketError::NoHistory(venue.clone()));
        };
        let found = self
            .directory
            .venue(venue)
            .await
            .ok_or_else(|| MarketError::UnknownVenue(venue.clone()))?;
        let pool_id = match (found.source.as_str(), found.source_ref.as_deref()) {
            ("defillama", Some(pool_id)) => pool_id.to_string(),
            _ => return Err(MarketError::NoHistory(venue.clone())),
        };

        let series = retry_async(&self.retry, "defillama.chart", |_| {
            client.pool_history(&pool_id, days)
        })
        .await?;
        Ok(series)
    }
}
