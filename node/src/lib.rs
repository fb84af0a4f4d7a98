//! Ratekeeper Node
//!
//! Wires the rate engine to an HTTP upstream and runs its background tasks.

pub mod config;
pub mod error;
pub mod node;
pub mod state;
pub mod upstream;

pub use config::{NodeConfig, UpstreamConfig};
pub use error::{NodeError, NodeResult};
pub use node::RateNode;
pub use state::NodeState;
pub use upstream::HttpRateSource;
