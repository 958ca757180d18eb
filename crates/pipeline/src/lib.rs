//! Synchronous dataflow pipeline for sampled multi-channel data.
//!
//! A pipeline is a DAG of nodes built from a JSON configuration. Generator
//! nodes produce [`FrameworkData`] blocks, which are pushed depth-first
//! through named output ports to every bound child input port. Each node
//! goes through construct, run and dispose, and a disposed node refuses to
//! run again.

pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod registry;


// Re-export commonly used types
pub use config::*;
pub use data::*;
pub use error::*;
pub use graph::*;
pub use node::*;
pub use nodes::*;
pub use registry::*;
