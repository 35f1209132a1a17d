pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod metrics_server;
pub mod observability;
pub mod partition;
pub mod store;
pub mod transform;

pub use engine::{BatchReport, IngestReport, IngestionEngine};
pub use error::{BatchError, TelemetryError};
pub use store::Envelope;
