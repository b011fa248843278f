//! Coordinator for federated learning jobs
//!
//! This crate ties the other crates together:
//! - **Connections**: registered clients and the proxies that reach them
//! - **Round driver**: sampling, concurrent dispatch, deadline, aggregation
//! - **Reports**: round history, final parameters and how the job ended
//! - **Configuration**: job and strategy settings loaded from JSON
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use coordinator::{ClientConnections, CoordinatorConfig, RoundDriver};
//!
//! # async fn example() -> fed_core::Result<()> {
//! let config = CoordinatorConfig::from_json_file("job.json")?;
//! let connections = Arc::new(ClientConnections::new(config.job.max_clients));
//! // connect client proxies here
//! let driver = RoundDriver::from_config(&config, connections)?;
//! let report = driver.run(None).await?;
//! println!("{:?}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connections;
pub mod driver;
pub mod report;

#[cfg(test)]
mod testing;

pub use config::CoordinatorConfig;
pub use connections::{ClientConnections, ClientConnectionsHandle};
pub use driver::{RoundDriver, RoundState};
pub use report::{JobReport, JobStatus, JobSummary};
