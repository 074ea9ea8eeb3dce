//! 收益聚合：报价缓存、趋势预测与候选配置优化。

pub mod aggregator;
pub mod market;
pub mod optimizer;
pub mod quote;
pub mod trend;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::venue::VenueKey;

pub use aggregator::{QuoteCache, YieldAggregator, YieldSettings};
pub use market::{CatalogMarketData, MarketDataProvider, MarketError, MarketResult};
pub use optimizer::{OptimizerSettings, allocate};
pub use quote::YieldQuote;

#[derive(Debug, Error)]
pub enum YieldError {
    #[error("no venue passes risk tolerance {risk_tolerance}")]
    InsufficientVenues { risk_tolerance: u8 },
    #[error("deployable amount {deployable} is not positive")]
    InsufficientCapital { deployable: Decimal },
    #[error("venue `{0}` not found")]
    UnknownVenue(VenueKey),
    #[error(transparent)]
    Market(#[from] MarketError),
}

impl YieldError {
    pub fn code(&self) -> &'static str {
        match self {
            YieldError::InsufficientVenues { .. } => "insufficient_venues",
            YieldError::InsufficientCapital { .. } => "insufficient_capital",
            YieldError::UnknownVenue(_) => "unknown_venue",
            YieldError::Market(err) => err.code(),
        }
    }
}

pub type YieldResult<T> = Result<T, YieldError>;
