use std::collections::BTreeSet;

use rust_decimal::Decimal;

use super::types::{Allocation, RebalanceOperation};

/// 当前与目标配置的集合对账：每个 (场所, 链) 多则取出，少则存入。
/// 不做场所间的直接划转，跨链迁移交给规划器。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffEngine {
    tolerance: Decimal,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Decimal::new(1, 2))
    }
}

impl DiffEngine {
    pub fn new(tolerance: Decimal) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> Decimal {
        self.tolerance
    }

    pub fn diff(&self, current: &Allocation, target: &Allocation) -> Vec<RebalanceOperation> {
        let current_amounts = current.amounts_by_key();
        let target_amounts = target.amounts_by_key();
        let keys: BTreeSet<_> = current_amounts.keys().chain(target_amounts.keys()).collect();

        let mut withdrawals = Vec::new();
        let mut deposits = Vec::new();
        for key in keys {
            let have = current_amounts.get(key).copied().unwrap_or(Decimal::ZERO);
            let want = target_amounts.get(key).copied().unwrap_or(Decimal::ZERO);
            let delta = want - have;
            if delta.abs() <= self.tolerance {
                continue;
            }
            let (venue, chain) = key;
            let mut op = if delta < Decimal::ZERO {
                RebalanceOperation::withdraw(venue.clone(), -delta)
            } else {
                RebalanceOperation::deposit(venue.clone(), delta)
            };
            op.chain = chain.clone();
            if delta < Decimal::ZERO {
                withdrawals.push(op);
            } else {
                deposits.push(op);
            }
        }

        withdrawals.extend(deposits);
        withdrawals
    }

    pub fn is_noop(&self, current: &Allocation, target: &Allocation) -> bool {
        self.diff(current, target).is_empty()
    }
}
