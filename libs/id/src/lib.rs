//! # smith-id
//!
//! Typed identifiers for the cloud resources imagesmith touches.
//!
//! ## Design Principles
//!
//! - Resource ids are issued by the remote control plane; we never invent
//!   them outside of in-memory fakes
//! - Each resource type has its own newtype so an image id cannot be passed
//!   where an instance id is expected
//! - Parsing is strict about the version and resource-type segments and
//!   lenient about the rest, which the provider owns
//!
//! ## ID Format
//!
//! `ocid1.{resource_type}.{realm}.[region][.future_use].{unique_id}`
//!
//! Examples:
//! - `ocid1.instance.oc1.phx.anyhqljt4bl3u5a`
//! - `ocid1.image.oc1..aaaaaaaad2cmm7vawzrg`
//! - `ocid1.compartment.oc1..aaaaaaaaq7ay5hgu`
//!
//! Retry tokens are different: they are minted locally, one per logical
//! create call, and stay the same across every retry attempt of that call.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
