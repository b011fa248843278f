//! Strategy - federated learning policies
//!
//! A strategy decides which clients take part in each round, what
//! instructions they receive, and how their results become the next global
//! model. The round driver only depends on the [`Strategy`] trait.
//!
//! Provided implementations:
//! - [`FedAvg`], example-weighted averaging
//! - [`FedMedian`], coordinate-wise median

pub mod aggregate;
mod config;
mod fedavg;
mod fedmedian;
mod strategy;

pub use aggregate::MetricsAggregation;
pub use config::StrategyConfig;
pub use fedavg::{ConfigFn, FedAvg, FedAvgConfig};
pub use fedmedian::FedMedian;
pub use strategy::{Strategy, StrategyHandle};
