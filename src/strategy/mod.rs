//! Per-request fetch strategies.

mod allow_list;
mod engine;
mod policy;

pub use allow_list::ApiAllowList;
pub use engine::{offline_envelope, FetchOutcome, ResponseSource, StrategyEngine};
pub use policy::{is_cacheable, is_cacheable_asset, RoutePolicy, Strategy};
