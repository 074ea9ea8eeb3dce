//! 场所目录：汇总注册表与协议探针的收益场所，统一去重、评分与排序。

pub mod catalog;
pub mod risk;
pub mod source;
pub mod types;

pub use catalog::{
    CatalogError, CatalogResult, CatalogSettings, FeeSchedule, ProtocolProfiles, ScanReport,
    SourceFailure, VenueCatalog, VenueDetails, VenueDirectory,
};
pub use source::{ScanFilter, SourceError, SourceResult, StaticSource, VenueSource};
pub use types::{ChainId, RawVenue, Venue, VenueCategory, VenueKey, supports_batching};
