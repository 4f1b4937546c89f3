// Candle pipeline, position state and order execution
pub mod aggregator;
pub mod candle_buffer;
pub mod engine;
pub mod executor;
pub mod position_manager;
pub mod price_feed;
pub mod runner;

pub use aggregator::CandleAggregator;
pub use candle_buffer::CandleSeries;
pub use engine::{EngineEvent, StrategyEngine};
pub use executor::{
    close_with_timeout, submit_with_timeout, Gateway, OrderAck, OrderGateway, OrderRequest, OrderType,
    PaperGateway,
};
pub use position_manager::{Position, PositionEvent, PositionManager, PositionState, TrailAdvance};
pub use price_feed::{pump_lines, FeedDecoder, FeedStats};
pub use runner::{RunSummary, Runner};
