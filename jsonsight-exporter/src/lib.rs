//! Prometheus exporter for JSON endpoints.
//!
//! Each request to `/probe?target=<url>&module=<name>` fetches the target,
//! evaluates the module's metric definitions against the returned document
//! and answers with the resulting samples.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Fetcher   │────>│  Collector  │────>│    Engines   │────>│ ProbeRegistry│
//! │ (HTTP GET/  │     │ (per metric │     │ (JSONPath,   │     │ (text format)│
//! │  POST)      │     │  descriptor)│     │  CEL, jq)    │     │              │
//! └─────────────┘     └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! jsonsight-exporter --config config.json5
//! curl 'http://localhost:7979/probe?module=default&target=http://localhost:8000/data.json'
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod fetch;
pub mod http;
pub mod naming;
pub mod registry;
pub mod sanitize;
pub mod telemetry;
pub mod transform;

pub use collector::{CollectReport, collect};
pub use config::ExporterConfig;
pub use descriptor::{MetricDescriptor, build_descriptors};
pub use http::HttpServer;
pub use registry::ProbeRegistry;
pub use telemetry::ExporterMetrics;
