use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use crate::venue::{RawVenue, ScanFilter, SourceError, SourceResult, VenueCategory, VenueKey, VenueSource};

use super::{ApiResult, JsonHttp, value_as_f64};

pub const DEFAULT_BASE_URL: &str = "https://api.beefy.finance";
const SOURCE_NAME: &str = "beefy";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeefyVault {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    token_address: Option<String>,
    #[serde(default)]
    earn_contract_address: String,
    #[serde(default)]
    chain: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BeefySource {
    http: JsonHttp,
}

impl BeefySource {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> ApiResult<Self> {
        Ok(Self {
            http: JsonHttp::new(SOURCE_NAME, client, base_url, timeout)?,
        })
    }

    /// `/tvl` 既可能是扁平的 `{vault: tvl}`，也可能按链分组 `{chainId: {vault: tvl}}`。
    fn flatten_tvl(raw: &Value) -> HashMap<String, f64> {
        let mut flat = HashMap::new();
        if let Value::Object(map) = raw {
            for (key, value) in map {
                match value {
                    Value::Object(inner) => {
                        for (vault_id, tvl) in inner {
                            if let Some(tvl) = value_as_f64(tvl) {
                                flat.insert(vault_id.clone(), tvl);
                            }
                        }
                    }
                    other => {
                        if let Some(tvl) = value_as_f64(other) {
                            flat.insert(key.clone(), tvl);
                        }
                    }
                }
            }
        }
        flat
    }

    fn convert(vault: BeefyVault, apys: &HashMap<String, Value>, tvls: &HashMap<String, f64>) -> Option<RawVenue> {
        if vault.status.as_deref().is_some_and(|status| status != "active") {
            return None;
        }
        // Beefy 的 APY 为小数形式
        let apy = apys.get(&vault.id).and_then(value_as_f64)? * 100.0;
        let tvl = tvls.get(&vault.id).copied().and_then(Decimal::from_f64)?;
        let token = vault
            .token_address
            .filter(|address| !address.is_empty())
            .unwrap_or(vault.earn_contract_address);
        if token.is_empty() || vault.chain.is_empty() {
            return None;
        }
        let launched_at = vault
            .created_at
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());
        let symbol = if vault.token.is_empty() {
            vault.name.clone()
        } else {
            vault.token.clone()
        };

        Some(RawVenue {
            key: VenueKey::new("beefy", vault.chain.as_str(), &token),
            category: VenueCategory::YieldFarming,
            symbol,
            apy,
            tvl: tvl.round_dp(2),
            audited: None,
            launched_at,
            source_ref: Some(vault.id),
        })
    }
}

#[async_trait]
impl VenueSource for BeefySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self, filter: &ScanFilter) -> SourceResult<Vec<RawVenue>> {
        let (vaults, apys, tvls) = tokio::try_join!(
            self.http.get_json::<Vec<BeefyVault>>("vaults"),
            self.http.get_json::<HashMap<String, Value>>("apy"),
            self.http.get_json::<Value>("tvl"),
        )
        .map_err(|err| SourceError::api(SOURCE_NAME, err))?;
        let tvls = Self::flatten_tvl(&tvls);

        Ok(vaults
            .into_iter()
            .filter_map(|vault| Self::convert(vault, &apys, &tvls))
            .filter(|venue| filter.admits(venue))
            .collect())
    }
}
