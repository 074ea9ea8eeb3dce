use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::rebalance::{Allocation, RebalancePlan};

use super::{PortfolioError, PortfolioResult, PortfolioStore, validate_id};

#[derive(Debug, Default)]
struct PortfolioRecord {
    allocation: Option<Allocation>,
    plans: Vec<RebalancePlan>,
}

/// 进程内组合存储，测试与演练使用。
#[derive(Debug, Default)]
pub struct MemoryPortfolioStore {
    records: RwLock<HashMap<String, PortfolioRecord>>,
}

impl MemoryPortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allocation(self, portfolio_id: &str, allocation: Allocation) -> Self {
        self.set_allocation(portfolio_id, allocation);
        self
    }

    pub fn set_allocation(&self, portfolio_id: &str, allocation: Allocation) {
        self.records
            .write()
            .entry(portfolio_id.to_string())
            .or_default()
            .allocation = Some(allocation);
    }

    pub fn plans(&self, portfolio_id: &str) -> Vec<RebalancePlan> {
        self.records
            .read()
            .get(portfolio_id)
            .map(|record| record.plans.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PortfolioStore for MemoryPortfolioStore {
    async fn current_allocation(&self, portfolio_id: &str) -> PortfolioResult<Allocation> {
        validate_id(portfolio_id)?;
        self.records
            .read()
            .get(portfolio_id)
            .and_then(|record| record.allocation.clone())
            .ok_or_else(|| PortfolioError::NotFound(portfolio_id.to_string()))
    }

    async fn record_plan(&self, portfolio_id: &str, plan: &RebalancePlan) -> PortfolioResult<()> {
        validate_id(portfolio_id)?;
        self.records
            .write()
            .entry(portfolio_id.to_string())
            .or_default()
            .plans
            .push(plan.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn unknown_portfolio_is_not_found() {
        let store = MemoryPortfolioStore::new();
        let err = store.current_allocation("nobody").await.unwrap_err();
        assert_eq!(err.code(), "portfolio_not_found");
    }

    #[tokio::test]
    async fn records_plans_in_order() {
        let store = MemoryPortfolioStore::new()
            .with_allocation("p1", Allocation::empty(Decimal::from(100)));
        let first = RebalancePlan::empty();
        let second = RebalancePlan::empty();
        store.record_plan("p1", &first).await.expect("record");
        store.record_plan("p1", &second).await.expect("record");

        let plans = store.plans("p1");
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].id(), first.id());
        assert_eq!(
            store.current_allocation("p1").await.expect("allocation").total_capital,
            Decimal::from(100)
        );
    }
}
