// Decision-to-order translation and order submission
pub mod leverage_cache;
pub mod order_builder;
pub mod quantize;
pub mod submitter;

pub use leverage_cache::{LeverageCache, LeverageSync};
pub use order_builder::{
    build_order, build_orders, execution_rank, DecisionOutcome, OrderContext, Rejection,
    RejectionLog, RejectionSink,
};
pub use quantize::{normalize_price, normalize_quantity, quantize, RoundingMode};
pub use submitter::OrderSubmitter;
