pub mod auth;
pub mod chart;
pub mod config;
pub mod gateway;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;
pub mod web;
pub mod window;

#[cfg(test)]
mod test_support;

pub use pipeline::{Envelope, Pipeline};
pub use window::{SampleWindow, WindowSettings};
