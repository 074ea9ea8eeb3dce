use rust_decimal::Decimal;
use thiserror::Error;

use crate::advisory::AdvisoryError;
use crate::portfolio::PortfolioError;
use crate::yields::YieldError;

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("没有场所满足风险容忍度 {risk_tolerance}")]
    InsufficientVenues { risk_tolerance: u8 },
    #[error("可部署资金不足: {deployable}")]
    InsufficientCapital { deployable: Decimal },
    #[error("成本/时长估算不可用: {0}")]
    PlanningFailure(String),
    #[error("组合存储失败: {0}")]
    Portfolio(#[from] PortfolioError),
    #[error("顾问服务失败: {0}")]
    Advisory(#[from] AdvisoryError),
    #[error("输入不合法: {0}")]
    MalformedInput(String),
    #[error("调仓在 {stage} 阶段被取消")]
    Cancelled { stage: &'static str },
}

impl RebalanceError {
    pub fn code(&self) -> &'static str {
        match self {
            RebalanceError::InsufficientVenues { .. } => "insufficient_venues",
            RebalanceError::InsufficientCapital { .. } => "insufficient_capital",
            RebalanceError::PlanningFailure(_) => "planning_failure",
            RebalanceError::Portfolio(err) => err.code(),
            RebalanceError::Advisory(err) => err.code(),
            RebalanceError::MalformedInput(_) => "malformed_input",
            RebalanceError::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<YieldError> for RebalanceError {
    fn from(err: YieldError) -> Self {
        match err {
            YieldError::InsufficientVenues { risk_tolerance } => {
                RebalanceError::InsufficientVenues { risk_tolerance }
            }
            YieldError::InsufficientCapital { deployable } => {
                RebalanceError::InsufficientCapital { deployable }
            }
            YieldError::UnknownVenue(key) => {
                RebalanceError::MalformedInput(format!("unknown venue {key}"))
            }
            YieldError::Market(err) => RebalanceError::PlanningFailure(err.to_string()),
        }
    }
}

pub type RebalanceResult<T> = Result<T, RebalanceError>;
