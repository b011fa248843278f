//! Client Proxy - coordinator-side handles to federated clients
//!
//! Provides:
//! - [`Transport`], the abstract request/response channel to one client
//! - [`codec`], frame encoding of instructions and replies
//! - [`ClientProxy`] and [`RemoteClientProxy`], typed calls over a transport
//! - [`InProcessTransport`], running [`Client`] code in-process for simulation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use client_proxy::{Client, ClientProxy, InProcessTransport, SimulationPool};
//! use fed_core::{ClientId, GetParametersInstruction};
//!
//! # async fn example(client: Arc<dyn Client>) -> Result<(), fed_core::TransportError> {
//! let proxy = InProcessTransport::new(client, SimulationPool::new(4))
//!     .into_proxy(ClientId::new("client-0"));
//! let parameters = proxy.get_parameters(GetParametersInstruction::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod proxy;
mod simulation;
mod transport;

pub use proxy::{ClientProxy, ClientProxyHandle, RemoteClientProxy};
pub use simulation::{Client, ClientError, InProcessTransport, SimulationPool};
pub use transport::Transport;
