pub mod config;
pub mod engine;
pub mod market_data;
pub mod recorder;
pub mod telemetry;

pub use engine::edge::compute_edge;
pub use engine::tick::{is_on_tick, round_to_tick, RoundMode};
pub use engine::types::{EdgeParameters, EdgeResult, RouteProfile};
pub use market_data::supervisor::{start_feed, FeedEvent, FeedHandle, FeedSupervisor};
