//! Causal dose-response estimation and budget-capped policy recommendation.
//!
//! Logged unit records go through [`artifact::build_artifact`], which fits
//! the models, runs the naive and doubly-robust estimators for every
//! (outcome, segmentation) and produces a content-hashed
//! [`artifact::BuiltArtifact`]. [`artifact::publish`] writes it atomically;
//! [`policy::recommend`] answers requests from a loaded
//! [`artifact::ArtifactBundle`].

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod estimate;
pub mod estimator;
pub mod export;
pub mod features;
pub mod models;
pub mod policy;
pub mod segment;
pub mod service;
pub mod table;
pub mod util;

#[cfg(test)]
mod testkit;

pub use error::{EngineError, EngineResult};
