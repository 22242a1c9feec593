pub mod edge; // compute_edge: fee/slippage/tick-aware advice
pub mod tick; // tick-grid rounding
pub mod types;
