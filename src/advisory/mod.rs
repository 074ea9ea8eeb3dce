//! 顾问服务：外部生成的候选配置属于不可信输入，先限流、再严格解析，之后仍需风控校验。

pub mod limiter;
pub mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::monitoring::events;
use crate::rebalance::Allocation;
use crate::venue::Venue;

pub use limiter::RateLimiter;
pub use schema::{AdvisoryProposal, ProposedEntry, extract_json_object, parse_proposal};

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("advisory service is not configured")]
    NotConfigured,
    #[error("advisory rate limit exceeded for user `{user}` ({limit} requests/minute)")]
    RateLimited { user: String, limit: usize },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("advisory output rejected: {0}")]
    Malformed(String),
}

impl AdvisoryError {
    pub fn code(&self) -> &'static str {
        match self {
            AdvisoryError::NotConfigured => "advisory_not_configured",
            AdvisoryError::RateLimited { .. } => "advisory_rate_limited",
            AdvisoryError::Api(_) => "advisory_api",
            AdvisoryError::Malformed(_) => "advisory_malformed",
        }
    }
}

pub type AdvisoryResult<T> = Result<T, AdvisoryError>;

/// 发送给顾问服务的组合上下文。
#[derive(Debug, Clone, Serialize)]
pub struct AdvisoryContext {
    pub portfolio_id: String,
    pub user_id: String,
    pub risk_tolerance: u8,
    pub liquidity_reserve: Decimal,
    pub current: Allocation,
    pub candidates: Vec<Venue>,
}

/// 顾问服务只返回原始文本，解析与校验由调用方负责。
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    async fn propose(&self, context: &AdvisoryContext) -> AdvisoryResult<String>;
}

/// 顾问网关：按用户限流后调用服务，输出不合格即失败关闭。
pub struct AdvisoryGateway {
    service: Arc<dyn AdvisoryService>,
    limiter: RateLimiter,
}

impl AdvisoryGateway {
    pub fn new(service: Arc<dyn AdvisoryService>, limiter: RateLimiter) -> Self {
        Self { service, limiter }
    }

    pub async fn proposal(&self, context: &AdvisoryContext) -> AdvisoryResult<AdvisoryProposal> {
        if !self.limiter.try_acquire(&context.user_id) {
            warn!(
                target: "advisory",
                user = %context.user_id,
                limit = self.limiter.limit(),
                "顾问请求超出限额"
            );
            events::advisory_rate_limited(&context.user_id);
            return Err(AdvisoryError::RateLimited {
                user: context.user_id.clone(),
                limit: self.limiter.limit(),
            });
        }

        let raw = self.service.propose(context).await?;
        let proposal = parse_proposal(&raw).inspect_err(|err| {
            warn!(
                target: "advisory",
                portfolio = %context.portfolio_id,
                error = %err,
                "顾问输出不合格，已拒收"
            );
        })?;
        debug!(
            target: "advisory",
            portfolio = %context.portfolio_id,
            entries = proposal.entries.len(),
            confidence = ?proposal.confidence,
            "顾问提案解析完成"
        );
        Ok(proposal)
    }
}
