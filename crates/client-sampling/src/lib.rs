//! Client sampling for federated rounds
//!
//! # Example
//!
//! ```rust
//! use client_sampling::Sampler;
//! use fed_core::{ClientId, SamplingPolicy};
//!
//! let sampler = Sampler::with_seed(42);
//! let available: Vec<ClientId> = (0..4).map(|i| ClientId::new(format!("client-{}", i))).collect();
//!
//! // 4 available, at least 2 clients, half of the pool
//! let selected = sampler
//!     .sample(&available, &SamplingPolicy::new(2, 0.5, 2))
//!     .unwrap();
//! assert_eq!(selected.len(), 2);
//! ```

mod sampler;

pub use sampler::Sampler;
