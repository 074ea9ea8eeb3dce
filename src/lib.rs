//! 跨链收益调仓核心：场所发现、收益聚合、配置对账、操作规划与风控校验。

pub mod advisory;
pub mod api;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod monitoring;
pub mod portfolio;
pub mod rebalance;
pub mod retry;
pub mod venue;
pub mod yields;
