//! Batch anomaly detection over fleet tire-sensor telemetry.
//!
//! Module gateway following the Explicit Module Boundary Pattern (EMBP):
//! `main.rs` and the integration tests only reach into the crate through the
//! re-exports below.

pub mod config;
pub mod instrument;
pub mod models;
pub mod pipeline;
pub mod schema;

pub use config::{Config, ModelConfig};
pub use models::{AnomalyCategory, AnomalyVerdict, DateRange, RollingFeatureRow};
pub use pipeline::{sensor_anomaly_detection, PipelineParams};
