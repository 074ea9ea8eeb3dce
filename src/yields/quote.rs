use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::venue::VenueKey;

/// 某个场所的收益读数，带取数时间。过期后由缓存视为不存在并重新拉取。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldQuote {
    pub venue: VenueKey,
    pub current_apy: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
}

impl YieldQuote {
    pub fn new(venue: VenueKey, current_apy: f64) -> Self {
        Self {
            venue,
            current_apy,
            fetched_at: OffsetDateTime::now_utc(),
        }
    }
}
