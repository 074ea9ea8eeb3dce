use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::venue::{
    ChainId, RawVenue, ScanFilter, SourceError, SourceResult, VenueCategory, VenueKey, VenueSource,
};

use super::{ApiResult, JsonHttp, value_as_f64};

pub const DEFAULT_BASE_URL: &str = "https://api.yearn.finance/v1";
const SOURCE_NAME: &str = "yearn";

/// Yearn 部署的链及其数字 chain id。
const YEARN_CHAINS: &[(&str, u64)] = &[
    ("ethereum", 1),
    ("optimism", 10),
    ("polygon", 137),
    ("base", 8453),
    ("arbitrum", 42161),
];

#[derive(Debug, Deserialize)]
struct VaultEntry {
    #[serde(default)]
    address: String,
    #[serde(default)]
    token: Option<VaultToken>,
    #[serde(default)]
    tvl: Option<VaultTvl>,
    #[serde(default)]
    apy: Option<VaultApy>,
}

#[derive(Debug, Deserialize)]
struct VaultToken {
    #[serde(default)]
    address: String,
    #[serde(default)]
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct VaultTvl {
    #[serde(default)]
    tvl: Value,
}

#[derive(Debug, Deserialize)]
struct VaultApy {
    #[serde(default)]
    net_apy: Value,
}

#[derive(Debug, Clone)]
pub struct YearnSource {
    http: JsonHttp,
}

impl YearnSource {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> ApiResult<Self> {
        Ok(Self {
            http: JsonHttp::new(SOURCE_NAME, client, base_url, timeout)?,
        })
    }

    async fn fetch_chain(&self, chain: &str, chain_id: u64) -> ApiResult<Vec<RawVenue>> {
        let vaults: Vec<VaultEntry> = self
            .http
            .get_json(&format!("chains/{chain_id}/vaults/all"))
            .await?;
        Ok(vaults
            .into_iter()
            .filter_map(|vault| Self::convert(chain, vault))
            .collect())
    }

    fn convert(chain: &str, vault: VaultEntry) -> Option<RawVenue> {
        let token = vault.token?;
        // net_apy 为小数形式，0.05 表示 5%
        let apy = vault.apy.and_then(|apy| value_as_f64(&apy.net_apy))? * 100.0;
        let tvl = vault
            .tvl
            .and_then(|tvl| value_as_f64(&tvl.tvl))
            .and_then(Decimal::from_f64)?;
        let address = if token.address.is_empty() {
            vault.address
        } else {
            token.address
        };
        if address.is_empty() {
            return None;
        }

        Some(RawVenue {
            key: VenueKey::new("yearn", chain, &address),
            symbol: token.symbol,
            apy,
            tvl: tvl.round_dp(2),
            category: VenueCategory::YieldFarming,
            audited: None,
            launched_at: None,
            source_ref: None,
        })
    }
}

#[async_trait]
impl VenueSource for YearnSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        let targets: Vec<(&str, u64)> = YEARN_CHAINS
            .iter()
            .copied()
            .filter(|(chain, _)| filter.allows_chain(&ChainId::new(chain)))
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let results = join_all(
            targets
                .iter()
                .map(|(chain, chain_id)| self.fetch_chain(chain, *chain_id)),
        )
        .await;

        let mut venues = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;
        for ((chain, _), result) in targets.iter().zip(results) {
            match result {
                Ok(found) => {
                    succeeded += 1;
                    venues.extend(found.into_iter().filter(|venue| filter.admits(venue)));
                }
                Err(err) => {
                    warn!(
                        target: "api::yearn",
                        chain,
                        error = %err,
                        "Yearn 单链拉取失败"
                    );
                    last_error = Some(err);
                }
            }
        }

        match (succeeded, last_error) {
            (0, Some(err)) => Err(SourceError::api(SOURCE_NAME, err)),
            _ => Ok(venues),
        }
    }
}
