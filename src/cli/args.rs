use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use crate::venue::VenueKey;

#[derive(Parser, Debug)]
#[command(name = "meridian", version, about = "跨链收益调仓规划工具")]
pub struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 meridian.toml 或 config/meridian.toml）"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 扫描各数据源的收益场所
    Scan(ScanCmd),
    /// 查询单个场所的收益报价与趋势预测
    Quote(QuoteCmd),
    /// 按风险容忍度生成候选配置
    Optimize(OptimizeCmd),
    /// 为组合生成调仓计划
    Rebalance(RebalanceCmd),
    /// 初始化配置模版文件
    Init(InitCmd),
}

#[derive(Args, Debug)]
pub struct ScanCmd {
    #[arg(long, value_delimiter = ',', help = "链过滤，逗号分隔；默认使用配置中的 chains")]
    pub chains: Vec<String>,
    #[arg(long, help = "最多输出的场所数量")]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct QuoteCmd {
    #[arg(long, help = "场所键，格式 protocol:chain:token")]
    pub venue: VenueKey,
    #[arg(long, default_value_t = 30u32, help = "趋势预测的天数")]
    pub horizon_days: u32,
    #[arg(long, help = "同时输出风险拆解、费率与审计信息")]
    pub details: bool,
}

#[derive(Args, Debug)]
pub struct OptimizeCmd {
    #[arg(long, help = "总资金（美元）")]
    pub total: Decimal,
    #[arg(long, default_value_t = 5u8, help = "风险容忍度 1-10")]
    pub risk_tolerance: u8,
    #[arg(long, default_value_t = Decimal::ZERO, help = "保留的流动性（美元）")]
    pub reserve: Decimal,
}

#[derive(Args, Debug)]
pub struct RebalanceCmd {
    #[arg(long, help = "组合 id")]
    pub portfolio: String,
    #[arg(long, help = "用户 id，默认与组合 id 相同")]
    pub user: Option<String>,
    #[arg(long, default_value_t = 5u8, help = "风险容忍度 1-10")]
    pub risk_tolerance: u8,
    #[arg(long, default_value_t = Decimal::ZERO, help = "保留的流动性（美元）")]
    pub reserve: Decimal,
    #[arg(long, help = "忽略收益提升门槛")]
    pub force: bool,
    #[arg(long, conflicts_with = "target", help = "使用顾问服务给出的目标配置")]
    pub advisory: bool,
    #[arg(
        long = "target",
        value_parser = parse_target,
        value_name = "VENUE=PCT",
        help = "显式目标配置，可重复，例如 aave-v3:ethereum:0xa0b8=60"
    )]
    pub target: Vec<(VenueKey, f64)>,
    #[arg(long, help = "整体截止时间（毫秒），覆盖配置")]
    pub deadline_ms: Option<u64>,
    #[arg(long, help = "计划就绪后用成本模型执行器演练执行")]
    pub execute: bool,
}

#[derive(Args, Debug)]
pub struct InitCmd {
    #[arg(long, value_name = "DIR", help = "可选输出目录（默认当前目录）")]
    pub output: Option<PathBuf>,
    #[arg(long, help = "若文件存在则覆盖")]
    pub force: bool,
}

fn parse_target(raw: &str) -> Result<(VenueKey, f64), String> {
    let (venue, pct) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("invalid target `{raw}`, expected VENUE=PCT"))?;
    let venue = venue.parse::<VenueKey>().map_err(|err| err.to_string())?;
    let pct = pct
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("invalid percentage in `{raw}`: {err}"))?;
    Ok((venue, pct))
}
