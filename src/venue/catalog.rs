use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::config::{CatalogConfig, ProtocolProfileConfig};
use crate::monitoring::events;
use crate::retry::{RetryPolicy, retry_async};

use super::risk::{self, RiskBreakdown};
use super::source::{ScanFilter, SourceError, VenueSource};
use super::types::{ChainId, RawVenue, Venue, VenueKey, protocol_family, supports_batching};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("venue `{0}` not found in any source")]
    VenueNotFound(VenueKey),
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::VenueNotFound(_) => "venue_not_found",
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// 场所目录的只读视图，聚合器、规划器与编排器都通过它查询场所。
#[async_trait]
pub trait VenueDirectory: Send + Sync {
    async fn scan(&self, chains: Option<&[ChainId]>) -> Vec<Venue>;

    async fn venue(&self, key: &VenueKey) -> Option<Venue>;

    async fn equivalents(&self, venue: &Venue) -> Vec<Venue>;
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub default_chains: Vec<ChainId>,
    pub min_apy: f64,
    pub min_tvl: Decimal,
    pub source_timeout: Duration,
    pub snapshot_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            default_chains: ["ethereum", "polygon", "arbitrum", "optimism", "avalanche"]
                .into_iter()
                .map(ChainId::new)
                .collect(),
            min_apy: 1.0,
            min_tvl: Decimal::from(100_000),
            source_timeout: Duration::from_secs(15),
            snapshot_ttl: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl CatalogSettings {
    pub fn from_config(config: &CatalogConfig, retry: RetryPolicy, snapshot_ttl: Duration) -> Self {
        Self {
            default_chains: config.chains.iter().map(ChainId::new).collect(),
            min_apy: config.min_apy,
            min_tvl: config.min_tvl_usd,
            source_timeout: Duration::from_millis(config.source_timeout_ms),
            snapshot_ttl,
            retry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeeSchedule {
    pub deposit_fee_bps: u32,
    pub withdrawal_fee_bps: u32,
    pub performance_fee_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ProtocolProfile {
    pub audited: bool,
    pub auditors: Vec<String>,
    pub fees: FeeSchedule,
}

/// 按协议族索引的协议档案：审计状态与费率。
#[derive(Debug, Clone, Default)]
pub struct ProtocolProfiles {
    by_family: HashMap<String, ProtocolProfile>,
}

impl ProtocolProfiles {
    pub fn from_config(entries: &[ProtocolProfileConfig]) -> Self {
        let by_family = entries
            .iter()
            .map(|entry| {
                let profile = ProtocolProfile {
                    audited: entry.audited,
                    auditors: entry.auditors.clone(),
                    fees: FeeSchedule {
                        deposit_fee_bps: entry.deposit_fee_bps,
                        withdrawal_fee_bps: entry.withdrawal_fee_bps,
                        performance_fee_pct: entry.performance_fee_pct,
                    },
                };
                (protocol_family(&entry.name.to_ascii_lowercase()).to_string(), profile)
            })
            .collect();
        Self { by_family }
    }

    pub fn get(&self, protocol: &str) -> Option<&ProtocolProfile> {
        self.by_family.get(protocol_family(protocol))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueDetails {
    pub venue: Venue,
    pub risk: RiskBreakdown,
    pub fees: FeeSchedule,
    pub audits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub code: &'static str,
    pub message: String,
}

/// 单次扫描结果：部分数据源失败只降低结果质量，不影响返回。
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub venues: Vec<Venue>,
    pub failed_sources: Vec<SourceFailure>,
}

impl ScanReport {
    pub fn is_degraded(&self) -> bool {
        !self.failed_sources.is_empty()
    }
}

#[derive(Debug, Clone)]
struct SnapshotEntry {
    venue: Venue,
    scanned_at: Instant,
}

pub struct VenueCatalog {
    sources: Vec<Arc<dyn VenueSource>>,
    profiles: ProtocolProfiles,
    settings: CatalogSettings,
    snapshot: RwLock<HashMap<VenueKey, SnapshotEntry>>,
    last_full_scan: Mutex<Option<Instant>>,
}

impl VenueCatalog {
    pub fn new(
        sources: Vec<Arc<dyn VenueSource>>,
        profiles: ProtocolProfiles,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            sources,
            profiles,
            settings,
            snapshot: RwLock::new(HashMap::new()),
            last_full_scan: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    /// 并发扫描所有数据源，去重后按 TVL 降序返回。
    /// 快照中被扫描链的条目整体替换；本轮失败的数据源保留其未过期的条目。
    pub async fn scan_report(&self, chain_filter: Option<&[ChainId]>) -> ScanReport {
        let chains = match chain_filter {
            Some(chains) if !chains.is_empty() => chains.to_vec(),
            _ => self.settings.default_chains.clone(),
        };
        let full_scan = chains == self.settings.default_chains;
        let scanned: HashSet<ChainId> = chains.iter().cloned().collect();
        let filter = ScanFilter {
            chains,
            min_apy: self.settings.min_apy,
            min_tvl: self.settings.min_tvl,
        };

        let started = Instant::now();
        let futures = self.sources.iter().map(|source| {
            let filter = &filter;
            async move {
                let outcome = self.fetch_source(source.as_ref(), filter).await;
                (source.name().to_string(), outcome)
            }
        });
        let results = join_all(futures).await;

        let now = OffsetDateTime::now_utc();
        let mut merged: HashMap<VenueKey, Venue> = HashMap::new();
        let mut failed_sources = Vec::new();

        for (source_name, outcome) in results {
            match outcome {
                Ok(raws) => {
                    debug!(
                        target: "venue::catalog",
                        source = %source_name,
                        count = raws.len(),
                        "数据源返回场所"
                    );
                    for raw in raws {
                        let venue = self.finalize(raw, &source_name, now);
                        match merged.get(&venue.key) {
                            Some(existing) if existing.tvl >= venue.tvl => {}
                            _ => {
                                merged.insert(venue.key.clone(), venue);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "venue::catalog",
                        source = %source_name,
                        error = %err,
                        "数据源扫描失败，按零场所处理"
                    );
                    events::venue_source_failed(&source_name, err.code());
                    failed_sources.push(SourceFailure {
                        source: source_name,
                        code: err.code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut venues: Vec<Venue> = merged.into_values().collect();
        venues.sort_by(|a, b| b.tvl.cmp(&a.tvl).then_with(|| a.key.cmp(&b.key)));

        let scanned_at = Instant::now();
        {
            let failed: HashSet<&str> = failed_sources
                .iter()
                .map(|failure| failure.source.as_str())
                .collect();
            let refreshed: HashSet<&VenueKey> = venues.iter().map(|venue| &venue.key).collect();
            let ttl = self.settings.snapshot_ttl;
            let mut dropped = 0usize;
            let mut snapshot = self.snapshot.write();
            snapshot.retain(|key, entry| {
                let keep = !scanned.contains(&key.chain)
                    || (failed.contains(entry.venue.source.as_str())
                        && entry.scanned_at.elapsed() < ttl);
                if !keep && !refreshed.contains(key) {
                    dropped += 1;
                }
                keep
            });
            for venue in &venues {
                snapshot.insert(
                    venue.key.clone(),
                    SnapshotEntry {
                        venue: venue.clone(),
                        scanned_at,
                    },
                );
            }
            if dropped > 0 {
                debug!(
                    target: "venue::catalog",
                    dropped,
                    "快照中有场所已不再出现"
                );
            }
        }
        if full_scan {
            *self.last_full_scan.lock() = Some(scanned_at);
        }

        events::venue_scan_finished(
            venues.len(),
            failed_sources.len(),
            started.elapsed(),
        );

        ScanReport {
            venues,
            failed_sources,
        }
    }

    pub async fn scan(&self, chain_filter: Option<&[ChainId]>) -> Vec<Venue> {
        self.scan_report(chain_filter).await.venues
    }

    /// 场所详情：风险拆解、费率与审计列表。快照未命中时按该链重新扫描。
    pub async fn details(&self, key: &VenueKey) -> CatalogResult<VenueDetails> {
        let venue = self
            .lookup(key)
            .await
            .ok_or_else(|| CatalogError::VenueNotFound(key.clone()))?;
        let profile = self.profiles.get(&venue.key.protocol).cloned().unwrap_or_default();
        let risk = risk::assess(
            venue.tvl,
            venue.audited,
            venue.launched_at,
            OffsetDateTime::now_utc(),
        );

        Ok(VenueDetails {
            venue,
            risk,
            fees: profile.fees,
            audits: profile.auditors,
        })
    }

    /// 快照命中且未超过 `snapshot_ttl` 才返回。
    pub fn cached(&self, key: &VenueKey) -> Option<Venue> {
        self.snapshot
            .read()
            .get(key)
            .filter(|entry| self.is_fresh(entry))
            .map(|entry| entry.venue.clone())
    }

    /// 快照未命中或已过期时按该场所所在链重新扫描。
    pub async fn lookup(&self, key: &VenueKey) -> Option<Venue> {
        if let Some(hit) = self.cached(key) {
            return Some(hit);
        }
        let chains = [key.chain.clone()];
        self.scan(Some(&chains)).await;
        self.cached(key)
    }

    fn is_fresh(&self, entry: &SnapshotEntry) -> bool {
        entry.scanned_at.elapsed() < self.settings.snapshot_ttl
    }

    fn snapshot_is_stale(&self) -> bool {
        match *self.last_full_scan.lock() {
            Some(at) => at.elapsed() >= self.settings.snapshot_ttl,
            None => true,
        }
    }

    async fn fetch_source(
        &self,
        source: &dyn VenueSource,
        filter: &ScanFilter,
    ) -> Result<Vec<RawVenue>, SourceError> {
        let limit = self.settings.source_timeout;
        retry_async(&self.settings.retry, source.name(), |_| async move {
            match timeout(limit, source.fetch(filter)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::timeout(source.name(), limit)),
            }
        })
        .await
    }

    fn finalize(&self, raw: RawVenue, source_name: &str, now: OffsetDateTime) -> Venue {
        let profile = self.profiles.get(&raw.key.protocol);
        let audited = raw
            .audited
            .or_else(|| profile.map(|profile| profile.audited))
            .unwrap_or(false);
        let risk_score = risk::risk_score(raw.tvl, audited, raw.launched_at, now);
        let supports_batching = supports_batching(&raw.key.protocol);

        Venue {
            key: raw.key,
            symbol: raw.symbol,
            current_apy: raw.apy,
            tvl: raw.tvl,
            risk_score,
            category: raw.category,
            audited,
            launched_at: raw.launched_at,
            supports_batching,
            source: source_name.to_string(),
            source_ref: raw.source_ref,
        }
    }
}

#[async_trait]
impl VenueDirectory for VenueCatalog {
    async fn scan(&self, chains: Option<&[ChainId]>) -> Vec<Venue> {
        VenueCatalog::scan(self, chains).await
    }

    async fn venue(&self, key: &VenueKey) -> Option<Venue> {
        self.lookup(key).await
    }

    async fn equivalents(&self, venue: &Venue) -> Vec<Venue> {
        if self.snapshot_is_stale() {
            VenueCatalog::scan(self, None).await;
        }
        let snapshot = self.snapshot.read();
        let mut found: Vec<Venue> = snapshot
            .values()
            .filter(|entry| self.is_fresh(entry) && venue.is_equivalent_to(&entry.venue))
            .map(|entry| entry.venue.clone())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }
}
