use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use crate::cache::{Cache, InMemoryBackend, TtlPolicy};
use crate::config::YieldConfig;
use crate::monitoring::events;
use crate::rebalance::Allocation;
use crate::venue::{Venue, VenueDirectory, VenueKey};

use super::market::{MarketDataProvider, MarketError};
use super::optimizer::{self, OptimizerSettings};
use super::quote::YieldQuote;
use super::trend;
use super::{YieldError, YieldResult};

pub type QuoteCache = Cache<InMemoryBackend<VenueKey, YieldQuote>>;

#[derive(Debug, Clone)]
pub struct YieldSettings {
    pub cache_ttl: Duration,
    pub history_days: usize,
    pub min_history_samples: usize,
    pub optimizer: OptimizerSettings,
}

impl Default for YieldSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            history_days: 30,
            min_history_samples: 7,
            optimizer: OptimizerSettings::default(),
        }
    }
}

impl YieldSettings {
    pub fn from_config(config: &YieldConfig) -> Self {
        Self {
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            history_days: config.history_days,
            min_history_samples: config.min_history_samples,
            optimizer: OptimizerSettings::from_config(config),
        }
    }
}

/// 场所目录之上的收益聚合：带 TTL 的报价缓存、趋势预测与候选配置。
pub struct YieldAggregator {
    directory: Arc<dyn VenueDirectory>,
    market: Arc<dyn MarketDataProvider>,
    quotes: QuoteCache,
    settings: YieldSettings,
}

impl YieldAggregator {
    pub fn new(
        directory: Arc<dyn VenueDirectory>,
        market: Arc<dyn MarketDataProvider>,
        settings: YieldSettings,
    ) -> Self {
        let quotes = Cache::new(InMemoryBackend::default(), TtlPolicy::new(settings.cache_ttl));
        Self {
            directory,
            market,
            quotes,
            settings,
        }
    }

    pub fn settings(&self) -> &YieldSettings {
        &self.settings
    }

    /// 新鲜则直接返回缓存，否则回源并写入。并发回源同一 key 时后写覆盖先写。
    pub async fn quote(&self, venue: &VenueKey) -> YieldResult<YieldQuote> {
        let market = &self.market;
        let lookup = self
            .quotes
            .load_or_fetch(venue.clone(), |key| {
                let key = key.clone();
                async move {
                    let apy = market.current_apy(&key).await?;
                    Ok::<_, MarketError>(YieldQuote::new(key, apy))
                }
            })
            .await
            .map_err(|err| match err {
                MarketError::UnknownVenue(key) => YieldError::UnknownVenue(key),
                other => YieldError::Market(other),
            })?;
        events::quote_cache(venue, lookup.is_hit());
        Ok(lookup.into_value().as_ref().clone())
    }

    /// `horizon_days` 天后的预测 APY；历史不足时退化为当前 APY。
    pub async fn projected_yield(&self, venue: &VenueKey, horizon_days: u32) -> YieldResult<f64> {
        let quote = self.quote(venue).await?;
        let history = match self
            .market
            .historical_apy(venue, self.settings.history_days)
            .await
        {
            Ok(series) => series,
            Err(err) => {
                debug!(
                    target: "yields::aggregator",
                    venue = %venue,
                    error = %err,
                    "历史 APY 不可用，使用当前值"
                );
                Vec::new()
            }
        };
        Ok(trend::project(
            &history,
            quote.current_apy,
            horizon_days,
            self.settings.min_history_samples,
        ))
    }

    /// 扫描场所并生成候选配置，金额基于 `total - liquidity_reserve`。
    pub async fn optimal_allocation(
        &self,
        total: Decimal,
        risk_tolerance: u8,
        liquidity_reserve: Decimal,
    ) -> YieldResult<Allocation> {
        let deployable = total - liquidity_reserve;
        if deployable <= Decimal::ZERO {
            return Err(YieldError::InsufficientCapital { deployable });
        }
        let venues = self.directory.scan(None).await;
        self.prime(&venues).await;
        optimizer::allocate(&venues, deployable, risk_tolerance, &self.settings.optimizer)
    }

    /// 扫描结果本身就是新鲜读数，直接写入报价缓存。
    async fn prime(&self, venues: &[Venue]) {
        let purged = self.quotes.purge_expired().await;
        if purged > 0 {
            debug!(target: "yields::aggregator", purged, "清理过期报价");
        }
        for venue in venues {
            self.quotes
                .insert(
                    venue.key.clone(),
                    YieldQuote::new(venue.key.clone(), venue.current_apy),
                )
                .await;
        }
    }
}
