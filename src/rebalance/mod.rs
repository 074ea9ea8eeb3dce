//! 调仓核心：配置对账、操作规划、风控校验与状态机编排。

pub mod diff;
pub mod error;
pub mod execution;
pub mod orchestrator;
pub mod planner;
pub mod risk;
pub mod types;

pub use diff::DiffEngine;
pub use error::{RebalanceError, RebalanceResult};
pub use execution::{ExecutionReport, OperationOutcome, OperationReport, execute_plan};
pub use orchestrator::{
    ExecutedRebalance, NoActionReason, OrchestratorSettings, RebalanceOrchestrator,
    RebalanceOutcome, RebalanceRequest, RebalanceResponse, RebalanceState, ResponseStatus,
    TargetSource, TargetWeight,
};
pub use planner::{OperationPlanner, PlanDraft, PlannerSettings};
pub use risk::{RejectionReason, RiskLimits, RiskValidator, ValidatedAllocation};
pub use types::{
    Allocation, AllocationEntry, OperationAction, PERCENTAGE_TOLERANCE, RebalanceOperation,
    RebalancePlan, percent_of,
};
