//! imagesmith image builder.
//!
//! Builds a custom compute image from a base image:
//!
//! 1. Resolve the base image (by id, or newest match of a search filter)
//! 2. Launch a build instance and wait until it is running
//! 3. Hand the instance to a [`Provisioner`](provision::Provisioner)
//! 4. Snapshot it and wait for the image to become available
//! 5. Reconcile the image's capability schema
//! 6. Terminate the build instance
//!
//! Every remote call goes through the retrying executor from
//! `smith-reconcile`; waits use its poll engine. The remote service sits
//! behind the [`ComputeService`](compute::ComputeService) trait, with an HTTP
//! implementation and an in-memory one for tests.

pub mod capability;
pub mod compute;
pub mod config;
pub mod driver;
pub mod error;
pub mod image_filter;
pub mod launch;
pub mod pipeline;
pub mod provision;

pub use config::Config;
pub use driver::Driver;
pub use error::{DriverError, SelectionError};
pub use pipeline::{BuildArtifact, BuildStep, Leftovers, Pipeline, PipelineError};
