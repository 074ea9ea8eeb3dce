use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// 链标识，统一小写，如 `ethereum`、`arbitrum`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ChainId(String);

impl ChainId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChainId {
    fn from(value: String) -> Self {
        ChainId::new(value)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        ChainId::new(value)
    }
}

impl From<ChainId> for String {
    fn from(value: ChainId) -> Self {
        value.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 场所的自然键：协议 × 链 × 代币地址。跨扫描只靠它识别同一场所。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueKey {
    pub protocol: String,
    pub chain: ChainId,
    pub token: String,
}

impl VenueKey {
    pub fn new(protocol: impl AsRef<str>, chain: impl Into<ChainId>, token: impl AsRef<str>) -> Self {
        Self {
            protocol: protocol.as_ref().trim().to_ascii_lowercase(),
            chain: chain.into(),
            token: token.as_ref().trim().to_ascii_lowercase(),
        }
    }

    /// 协议族：`aave-v3` → `aave`。
    pub fn family(&self) -> &str {
        protocol_family(&self.protocol)
    }
}

impl fmt::Display for VenueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.protocol, self.chain, self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueKeyParseError(pub String);

impl fmt::Display for VenueKeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid venue key `{}`, expected protocol:chain:token", self.0)
    }
}

impl std::error::Error for VenueKeyParseError {}

impl FromStr for VenueKey {
    type Err = VenueKeyParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(protocol), Some(chain), Some(token))
                if !protocol.trim().is_empty()
                    && !chain.trim().is_empty()
                    && !token.trim().is_empty() =>
            {
                Ok(VenueKey::new(protocol, chain, token))
            }
            _ => Err(VenueKeyParseError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueCategory {
    Lending,
    Dex,
    YieldFarming,
    Other,
}

impl VenueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            VenueCategory::Lending => "lending",
            VenueCategory::Dex => "dex",
            VenueCategory::YieldFarming => "yield_farming",
            VenueCategory::Other => "other",
        }
    }

    /// 根据协议名与池子符号粗分类。
    pub fn classify(protocol: &str, symbol: &str) -> Self {
        let family = protocol_family(&protocol.to_ascii_lowercase()).to_string();
        let symbol = symbol.to_ascii_lowercase();
        match family.as_str() {
            "aave" | "compound" | "morpho" | "spark" | "venus" | "radiant" => {
                VenueCategory::Lending
            }
            "uniswap" | "curve" | "balancer" | "sushiswap" | "velodrome" | "aerodrome" => {
                VenueCategory::Dex
            }
            "yearn" | "convex" | "beefy" => VenueCategory::YieldFarming,
            _ if symbol.contains("lp") || symbol.contains('-') => VenueCategory::Dex,
            _ => VenueCategory::Other,
        }
    }
}

impl fmt::Display for VenueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 支持同一场所内批量（净额）操作的协议族。
pub const BATCHING_FAMILIES: &[&str] = &["aave", "compound", "morpho", "spark", "yearn", "beefy"];

pub fn protocol_family(protocol: &str) -> &str {
    protocol
        .split(['-', '_', ' '])
        .next()
        .filter(|head| !head.is_empty())
        .unwrap_or(protocol)
}

pub fn supports_batching(protocol: &str) -> bool {
    let family = protocol_family(protocol);
    BATCHING_FAMILIES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(family))
}

/// 数据源返回的原始条目，风险分与批量能力由目录统一补齐。
#[derive(Debug, Clone, PartialEq)]
pub struct RawVenue {
    pub key: VenueKey,
    pub symbol: String,
    pub apy: f64,
    pub tvl: Decimal,
    pub category: VenueCategory,
    pub audited: Option<bool>,
    pub launched_at: Option<OffsetDateTime>,
    pub source_ref: Option<String>,
}

/// 一次扫描得到的场所快照，不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub key: VenueKey,
    pub symbol: String,
    pub current_apy: f64,
    pub tvl: Decimal,
    pub risk_score: u8,
    pub category: VenueCategory,
    pub audited: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub launched_at: Option<OffsetDateTime>,
    pub supports_batching: bool,
    pub source: String,
    #[serde(default)]
    pub source_ref: Option<String>,
}

impl Venue {
    pub fn chain(&self) -> &ChainId {
        &self.key.chain
    }

    /// 另一条链上的同族同币种场所视为等价，可作为迁移目标。
    pub fn is_equivalent_to(&self, other: &Venue) -> bool {
        self.key.chain != other.key.chain
            && self.key.family() == other.key.family()
            && self.symbol.eq_ignore_ascii_case(&other.symbol)
    }
}
