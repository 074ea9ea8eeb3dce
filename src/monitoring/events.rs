use std::time::Duration;

use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, info, warn};

use crate::rebalance::RebalancePlan;
use crate::venue::VenueKey;

use super::metrics::prometheus_enabled;

pub fn venue_source_failed(source: &str, code: &'static str) {
    if prometheus_enabled() {
        counter!(
            "meridian_venue_source_failures_total",
            "source" => source.to_string(),
            "code" => code
        )
        .increment(1);
    }
}

pub fn venue_scan_finished(venues: usize, failed_sources: usize, elapsed: Duration) {
    info!(
        target: "monitoring::catalog",
        event = "scan_finished",
        venues,
        failed_sources,
        elapsed_ms = elapsed.as_millis() as u64,
        "venue scan finished"
    );

    if prometheus_enabled() {
        counter!("meridian_venue_scans_total").increment(1);
        histogram!("meridian_venue_scan_venues").record(venues as f64);
        histogram!("meridian_venue_scan_latency_ms").record(elapsed.as_secs_f64() * 1000.0);
    }
}

pub fn quote_cache(venue: &VenueKey, hit: bool) {
    debug!(
        target: "monitoring::quotes",
        event = "quote_cache",
        venue = %venue,
        hit,
        "收益报价缓存"
    );

    if prometheus_enabled() {
        let result = if hit { "hit" } else { "miss" };
        counter!("meridian_quote_cache_total", "result" => result).increment(1);
    }
}

pub fn advisory_rate_limited(user: &str) {
    if prometheus_enabled() {
        counter!("meridian_advisory_rate_limited_total").increment(1);
    }
    debug!(target: "monitoring::advisory", user, "advisory rate limited");
}

pub fn plan_ready(portfolio: &str, plan: &RebalancePlan) {
    let cost = plan.estimated_cost().to_f64().unwrap_or_default();
    info!(
        target: "monitoring::rebalance",
        event = "plan_ready",
        portfolio,
        plan_id = %plan.id(),
        operations = plan.operations().len(),
        estimated_cost = cost,
        estimated_duration_secs = plan.estimated_duration_secs(),
        improvement_pct = plan.estimated_improvement_percent(),
        "rebalance plan ready"
    );

    if prometheus_enabled() {
        counter!("meridian_rebalance_outcomes_total", "outcome" => "plan_ready").increment(1);
        histogram!("meridian_plan_operations").record(plan.operations().len() as f64);
        histogram!("meridian_plan_cost_usd").record(cost);
    }
}

pub fn rebalance_no_action(portfolio: &str, reason: &'static str) {
    info!(
        target: "monitoring::rebalance",
        event = "no_action_needed",
        portfolio,
        reason,
        "no rebalance needed"
    );

    if prometheus_enabled() {
        counter!(
            "meridian_rebalance_outcomes_total",
            "outcome" => "no_action_needed",
            "reason" => reason
        )
        .increment(1);
    }
}

pub fn rebalance_rejected(portfolio: &str, reason: &'static str, detail: &str) {
    warn!(
        target: "monitoring::rebalance",
        event = "rejected",
        portfolio,
        reason,
        detail,
        "target allocation rejected"
    );

    if prometheus_enabled() {
        counter!(
            "meridian_rebalance_outcomes_total",
            "outcome" => "rejected",
            "reason" => reason
        )
        .increment(1);
    }
}

pub fn rebalance_failed(portfolio: &str, code: &'static str, detail: &str) {
    warn!(
        target: "monitoring::rebalance",
        event = "failed",
        portfolio,
        code,
        detail,
        "rebalance failed"
    );

    if prometheus_enabled() {
        counter!(
            "meridian_rebalance_outcomes_total",
            "outcome" => "failed",
            "reason" => code
        )
        .increment(1);
    }
}

pub fn execution_finished(plan_id: &str, executed: usize, failed: usize, skipped: usize) {
    info!(
        target: "monitoring::execution",
        event = "execution_finished",
        plan_id,
        executed,
        failed,
        skipped,
        "plan execution finished"
    );

    if prometheus_enabled() {
        counter!("meridian_operations_total", "result" => "executed").increment(executed as u64);
        counter!("meridian_operations_total", "result" => "failed").increment(failed as u64);
        counter!("meridian_operations_total", "result" => "skipped").increment(skipped as u64);
    }
}
