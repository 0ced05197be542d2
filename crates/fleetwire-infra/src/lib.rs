//! fleetwire infrastructure
//!
//! Provisions the environment with terraform and resolves its outputs into a
//! read-only [`fleetwire_core::Outputs`] snapshot.

pub mod error;
pub mod provision;
pub mod resolver;
pub mod terraform;

pub use error::{InfraError, Result};
pub use provision::{Provisioner, provision};
pub use resolver::{OutputResolver, StateSource, StaticState, parse_outputs};
pub use terraform::Terraform;
