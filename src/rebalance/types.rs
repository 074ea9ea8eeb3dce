use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::venue::{ChainId, VenueKey};

/// 目标配置百分比之和允许的误差。
pub const PERCENTAGE_TOLERANCE: f64 = 0.01;

pub const WITHDRAW_PRIORITY: u8 = 1;
pub const DEPOSIT_PRIORITY: u8 = 2;
pub const MIGRATE_PRIORITY: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub venue: VenueKey,
    pub chain: ChainId,
    pub amount: Decimal,
    pub percentage: f64,
}

impl AllocationEntry {
    pub fn new(venue: VenueKey, amount: Decimal, percentage: f64) -> Self {
        let chain = venue.chain.clone();
        Self {
            venue,
            chain,
            amount,
            percentage,
        }
    }
}

/// 资金在各场所上的分布。作为目标时百分比合计 100；作为当前状态时可以小于 100，
/// 差额视为未部署的储备。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub total_capital: Decimal,
    #[serde(default)]
    pub entries: Vec<AllocationEntry>,
}

impl Allocation {
    pub fn new(total_capital: Decimal, entries: Vec<AllocationEntry>) -> Self {
        Self {
            total_capital,
            entries,
        }
    }

    pub fn empty(total_capital: Decimal) -> Self {
        Self::new(total_capital, Vec::new())
    }

    /// 按百分比在 `capital` 上生成配置，金额保留两位小数。
    pub fn from_percentages<I>(capital: Decimal, weights: I) -> Self
    where
        I: IntoIterator<Item = (VenueKey, f64)>,
    {
        let entries = weights
            .into_iter()
            .map(|(venue, percentage)| {
                let amount = percent_of(capital, percentage);
                AllocationEntry::new(venue, amount, percentage)
            })
            .collect();
        Self::new(capital, entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn percentage_sum(&self) -> f64 {
        self.entries.iter().map(|entry| entry.percentage).sum()
    }

    pub fn allocated_amount(&self) -> Decimal {
        self.entries.iter().map(|entry| entry.amount).sum()
    }

    pub fn unallocated(&self) -> Decimal {
        (self.total_capital - self.allocated_amount()).max(Decimal::ZERO)
    }

    /// 百分比合计是否为 100（在误差内）。
    pub fn is_complete(&self, tolerance: f64) -> bool {
        (self.percentage_sum() - 100.0).abs() <= tolerance
    }

    pub fn entry(&self, venue: &VenueKey) -> Option<&AllocationEntry> {
        self.entries.iter().find(|entry| &entry.venue == venue)
    }

    /// 以 (场所, 链) 为键合并金额。
    pub fn amounts_by_key(&self) -> BTreeMap<(VenueKey, ChainId), Decimal> {
        let mut amounts = BTreeMap::new();
        for entry in &self.entries {
            *amounts
                .entry((entry.venue.clone(), entry.chain.clone()))
                .or_insert(Decimal::ZERO) += entry.amount;
        }
        amounts
    }

    /// 以 `total_capital` 为分母的加权 APY，未部署部分收益为零。
    pub fn weighted_apy<F>(&self, apy_of: F) -> f64
    where
        F: Fn(&VenueKey) -> Option<f64>,
    {
        let total = self.total_capital.to_f64().unwrap_or(0.0);
        if total <= 0.0 {
            return 0.0;
        }
        self.entries
            .iter()
            .filter_map(|entry| {
                let apy = apy_of(&entry.venue)?;
                Some(entry.amount.to_f64().unwrap_or(0.0) * apy)
            })
            .sum::<f64>()
            / total
    }
}

pub fn percent_of(capital: Decimal, percentage: f64) -> Decimal {
    let share = Decimal::from_f64(percentage).unwrap_or(Decimal::ZERO) / Decimal::ONE_HUNDRED;
    (capital * share).round_dp(2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Withdraw,
    Deposit,
    Migrate,
}

impl OperationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationAction::Withdraw => "withdraw",
            OperationAction::Deposit => "deposit",
            OperationAction::Migrate => "migrate",
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            OperationAction::Withdraw => WITHDRAW_PRIORITY,
            OperationAction::Deposit => DEPOSIT_PRIORITY,
            OperationAction::Migrate => MIGRATE_PRIORITY,
        }
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个调仓操作。priority 越小越先执行：先取出，再存入，迁移最后。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceOperation {
    pub venue: VenueKey,
    pub action: OperationAction,
    pub amount: Decimal,
    pub chain: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_chain: Option<ChainId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_venue: Option<VenueKey>,
    pub priority: u8,
}

impl RebalanceOperation {
    pub fn withdraw(venue: VenueKey, amount: Decimal) -> Self {
        Self::simple(venue, OperationAction::Withdraw, amount)
    }

    pub fn deposit(venue: VenueKey, amount: Decimal) -> Self {
        Self::simple(venue, OperationAction::Deposit, amount)
    }

    pub fn migrate(from: VenueKey, to: VenueKey, amount: Decimal) -> Self {
        let chain = from.chain.clone();
        let target_chain = Some(to.chain.clone());
        Self {
            venue: from,
            action: OperationAction::Migrate,
            amount,
            chain,
            target_chain,
            target_venue: Some(to),
            priority: MIGRATE_PRIORITY,
        }
    }

    fn simple(venue: VenueKey, action: OperationAction, amount: Decimal) -> Self {
        let chain = venue.chain.clone();
        Self {
            venue,
            action,
            amount,
            chain,
            target_chain: None,
            target_venue: None,
            priority: action.priority(),
        }
    }

    pub fn is_cross_chain(&self) -> bool {
        self.target_chain
            .as_ref()
            .is_some_and(|target| target != &self.chain)
    }
}

/// 一次调仓请求的执行计划。构造后不可变，调用方要么执行要么丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    id: Uuid,
    operations: Vec<RebalanceOperation>,
    estimated_cost: Decimal,
    estimated_duration_secs: u64,
    estimated_improvement_percent: f64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl RebalancePlan {
    pub fn new(
        operations: Vec<RebalanceOperation>,
        estimated_cost: Decimal,
        estimated_duration_secs: u64,
        estimated_improvement_percent: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operations,
            estimated_cost,
            estimated_duration_secs,
            estimated_improvement_percent,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Decimal::ZERO, 0, 0.0)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operations(&self) -> &[RebalanceOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn estimated_cost(&self) -> Decimal {
        self.estimated_cost
    }

    pub fn estimated_duration_secs(&self) -> u64 {
        self.estimated_duration_secs
    }

    pub fn estimated_improvement_percent(&self) -> f64 {
        self.estimated_improvement_percent
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}
