use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cli::args::{Cli, Command, InitCmd, OptimizeCmd, QuoteCmd, RebalanceCmd, ScanCmd};
use crate::cli::context::AppContext;
use crate::config::{MeridianConfig, write_template};
use crate::rebalance::{RebalanceRequest, RebalanceResponse, TargetSource, TargetWeight};
use crate::venue::ChainId;

pub async fn run(cli: Cli, config: MeridianConfig) -> Result<()> {
    let command = match cli.command {
        Command::Init(args) => return init_config(args),
        command => command,
    };

    crate::monitoring::init_from_config(&config.metrics)?;
    let context = AppContext::build(&config)?;

    match command {
        Command::Scan(args) => scan(&context, args).await,
        Command::Quote(args) => quote(&context, args).await,
        Command::Optimize(args) => optimize(&context, args).await,
        Command::Rebalance(args) => rebalance(&context, args).await,
        Command::Init(_) => Ok(()),
    }
}

async fn scan(context: &AppContext, args: ScanCmd) -> Result<()> {
    let chains: Vec<ChainId> = args.chains.iter().map(ChainId::new).collect();
    let filter = (!chains.is_empty()).then_some(chains.as_slice());
    let mut report = context.catalog.scan_report(filter).await;
    if let Some(limit) = args.limit {
        report.venues.truncate(limit);
    }
    print_json(&report)
}

async fn quote(context: &AppContext, args: QuoteCmd) -> Result<()> {
    let quote = context.aggregator.quote(&args.venue).await?;
    let projected = context
        .aggregator
        .projected_yield(&args.venue, args.horizon_days)
        .await?;
    let details = if args.details {
        Some(context.catalog.details(&args.venue).await?)
    } else {
        None
    };
    print_json(&json!({
        "quote": quote,
        "horizon_days": args.horizon_days,
        "projected_apy": projected,
        "details": details,
    }))
}

async fn optimize(context: &AppContext, args: OptimizeCmd) -> Result<()> {
    let allocation = context
        .aggregator
        .optimal_allocation(args.total, args.risk_tolerance, args.reserve)
        .await?;
    print_json(&allocation)
}

async fn rebalance(context: &AppContext, args: RebalanceCmd) -> Result<()> {
    let target = if args.advisory {
        TargetSource::Advisory
    } else if !args.target.is_empty() {
        TargetSource::Supplied(
            args.target
                .into_iter()
                .map(|(venue, pct)| TargetWeight::new(venue, pct))
                .collect(),
        )
    } else {
        TargetSource::Optimizer
    };
    let request = RebalanceRequest {
        user_id: args.user.unwrap_or_else(|| args.portfolio.clone()),
        portfolio_id: args.portfolio,
        risk_tolerance: args.risk_tolerance,
        liquidity_reserve: args.reserve,
        force_rebalance: args.force,
        target,
        deadline: args.deadline_ms.map(Duration::from_millis),
    };

    if !args.execute {
        return print_json(&context.orchestrator.run_traced(&request).await);
    }

    let executed = context
        .orchestrator
        .run_with_executor(&request, context.executor.as_ref())
        .await;
    match executed {
        Ok(executed) => {
            let response = RebalanceResponse::from_result(Ok(executed.outcome));
            print_json(&json!({
                "response": response,
                "execution": executed.execution,
            }))
        }
        Err(err) => print_json(&RebalanceResponse::from_result(Err(err))),
    }
}

fn init_config(args: InitCmd) -> Result<()> {
    let output_dir = match args.output {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let path: PathBuf = output_dir.join("meridian.toml");
    if args.force && path.exists() {
        std::fs::remove_file(&path)?;
    }
    write_template(&path)?;
    info!(target: "cli", path = %path.display(), "已写出配置模板");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
