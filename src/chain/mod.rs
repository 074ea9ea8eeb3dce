//! 链与跨链桥执行器：成本估算与操作执行。本模块只描述操作，不签名不广播。

pub mod cost_model;

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;

use crate::rebalance::RebalanceOperation;
use crate::venue::ChainId;

pub use cost_model::CostModelExecutor;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain `{0}` is not supported by this executor")]
    UnsupportedChain(ChainId),
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[error("operation rejected by {chain}: {reason}")]
    Rejected { chain: ChainId, reason: String },
    #[error("executor unavailable: {0}")]
    Unavailable(String),
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::UnsupportedChain(_) => "chain_unsupported",
            ChainError::Timeout { .. } => "chain_timeout",
            ChainError::Rejected { .. } => "chain_rejected",
            ChainError::Unavailable(_) => "chain_unavailable",
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// 单笔链上操作的成本（美元）与确认时长。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub chain: ChainId,
    pub cost_usd: Decimal,
    pub confirmation_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeQuote {
    pub from: ChainId,
    pub to: ChainId,
    pub amount: Decimal,
    pub fee_usd: Decimal,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Submitted,
    Confirmed,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_ref: String,
    pub status: ExecutionStatus,
}

/// 链与桥的能力提供方。每次调用都应自带超时，失败返回带类型的错误。
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    async fn estimate_cost(&self, chain: &ChainId) -> ChainResult<GasEstimate>;

    async fn estimate_bridge_cost(
        &self,
        from: &ChainId,
        to: &ChainId,
        amount: Decimal,
    ) -> ChainResult<BridgeQuote>;

    async fn execute(&self, operation: &RebalanceOperation) -> ChainResult<ExecutionReceipt>;
}

/// 为任意执行器的每次调用套上统一超时。
pub struct TimeoutExecutor<E> {
    inner: E,
    limit: Duration,
}

impl<E> TimeoutExecutor<E> {
    pub fn new(inner: E, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn guard<T, F>(&self, operation: &'static str, fut: F) -> ChainResult<T>
    where
        F: std::future::Future<Output = ChainResult<T>>,
    {
        match timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout {
                operation,
                timeout_ms: self.limit.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<E> ChainExecutor for TimeoutExecutor<E>
where
    E: ChainExecutor,
{
    async fn estimate_cost(&self, chain: &ChainId) -> ChainResult<GasEstimate> {
        self.guard("estimate_cost", self.inner.estimate_cost(chain))
            .await
    }

    async fn estimate_bridge_cost(
        &self,
        from: &ChainId,
        to: &ChainId,
        amount: Decimal,
    ) -> ChainResult<BridgeQuote> {
        self.guard(
            "estimate_bridge_cost",
            self.inner.estimate_bridge_cost(from, to, amount),
        )
        .await
    }

    async fn execute(&self, operation: &RebalanceOperation) -> ChainResult<ExecutionReceipt> {
        self.guard("execute", self.inner.execute(operation)).await
    }
}
