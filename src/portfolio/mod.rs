//! 组合存储：读取当前配置、记录调仓计划。同一组合内保证一致，组合之间互不影响。

pub mod json;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::rebalance::{Allocation, RebalancePlan};

pub use json::JsonPortfolioStore;
pub use memory::MemoryPortfolioStore;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("portfolio `{0}` not found")]
    NotFound(String),
    #[error("invalid portfolio id `{0}`")]
    InvalidId(String),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt portfolio file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PortfolioError {
    pub fn code(&self) -> &'static str {
        match self {
            PortfolioError::NotFound(_) => "portfolio_not_found",
            PortfolioError::InvalidId(_) => "portfolio_invalid_id",
            PortfolioError::Io { .. } => "portfolio_io",
            PortfolioError::Corrupt { .. } => "portfolio_corrupt",
        }
    }
}

pub type PortfolioResult<T> = Result<T, PortfolioError>;

#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn current_allocation(&self, portfolio_id: &str) -> PortfolioResult<Allocation>;

    async fn record_plan(&self, portfolio_id: &str, plan: &RebalancePlan) -> PortfolioResult<()>;
}

/// 组合 id 只允许字母、数字、`-` 与 `_`，避免路径穿越。
pub fn validate_id(portfolio_id: &str) -> PortfolioResult<()> {
    let valid = !portfolio_id.is_empty()
        && portfolio_id.len() <= 128
        && portfolio_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PortfolioError::InvalidId(portfolio_id.to_string()))
    }
}
