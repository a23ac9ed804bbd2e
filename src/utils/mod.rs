pub mod backtest;
pub mod cancel;
pub mod data;
pub mod ev_calculator;
pub mod features;
pub mod prediction;
pub mod training;

pub use cancel::CancelToken;
