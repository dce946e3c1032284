//! Metric collector: turns a fetched document into samples.
//!
//! ```text
//! bytes ──> Document ──> [jq transformations] ──> key path
//!                                                   │
//!                        value scrape: sanitize ────┤
//!                        object scrape: per element ┴──> value path ──> converter ──> sanitize
//!                                                                         │
//!                                   labels + epoch timestamp ──> ProbeRegistry
//! ```
//!
//! Failures never escape: a broken descriptor yields no samples, a broken
//! element is skipped, a broken label becomes an empty string and a broken
//! timestamp leaves the sample untimestamped.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::descriptor::{MetricDescriptor, ScrapeType};
use crate::engine::{Document, Evaluator, Mode};
use crate::registry::{ProbeRegistry, Sample};
use crate::sanitize::{sanitize_int_value, sanitize_value};
use crate::transform::{JqTransform, TransformKind};

/// Outcome of collecting one probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Samples recorded in the registry.
    pub samples: usize,
    /// Descriptors abandoned without producing samples.
    pub failed_descriptors: usize,
    /// Object elements skipped.
    pub failed_elements: usize,
}

impl CollectReport {
    /// True when no descriptor was abandoned.
    pub fn success(&self) -> bool {
        self.failed_descriptors == 0
    }
}

/// Marker for a descriptor whose evaluation was abandoned.
struct Abandoned;

/// Evaluate every descriptor against `data` and record samples.
///
/// Descriptors run in order and independently of each other.
pub fn collect(
    descriptors: &[MetricDescriptor],
    data: &[u8],
    registry: &mut ProbeRegistry,
) -> CollectReport {
    let mut report = CollectReport::default();

    let document = match Document::parse(data) {
        Ok(document) => document,
        Err(e) => {
            error!(error = %e, "Failed to parse response as JSON");
            debug!(data = %String::from_utf8_lossy(data), "Unparseable response");
            report.failed_descriptors = descriptors.len();
            return report;
        }
    };

    let mut collector = Collector {
        registry,
        evaluator: Evaluator::new(),
        report,
    };

    for descriptor in descriptors {
        if collector.collect_descriptor(descriptor, &document).is_err() {
            collector.report.failed_descriptors += 1;
        }
    }

    collector.report
}

struct Collector<'r> {
    registry: &'r mut ProbeRegistry,
    evaluator: Evaluator,
    report: CollectReport,
}

impl Collector<'_> {
    fn collect_descriptor(
        &mut self,
        descriptor: &MetricDescriptor,
        root: &Document,
    ) -> Result<(), Abandoned> {
        if let Err(e) = self.registry.register_descriptor(descriptor) {
            error!(metric = %descriptor.name, error = %e, "Failed to register metric");
            return Err(Abandoned);
        }

        let transformed;
        let document = if descriptor.transformations.is_empty() {
            root
        } else {
            transformed = transform(descriptor, root)?;
            &transformed
        };

        match descriptor.scrape_type {
            ScrapeType::Value => self.collect_value(descriptor, document),
            ScrapeType::Object => self.collect_object(descriptor, document),
        }
    }

    fn collect_value(
        &mut self,
        descriptor: &MetricDescriptor,
        document: &Document,
    ) -> Result<(), Abandoned> {
        debug!(metric = %descriptor.name, path = %descriptor.key_path, "Extracting value");

        let raw = self
            .evaluator
            .evaluate(descriptor.engine, document, &descriptor.key_path, Mode::Text)
            .map_err(|e| {
                error!(
                    metric = %descriptor.name,
                    path = %descriptor.key_path,
                    error = %e,
                    "Failed to extract value"
                );
                debug!(metric = %descriptor.name, document = %document.value(), "Source document");
                Abandoned
            })?;

        let value = sanitize_value(&raw).map_err(|e| {
            error!(
                metric = %descriptor.name,
                path = %descriptor.key_path,
                value = %raw,
                error = %e,
                "Failed to convert extracted value"
            );
            Abandoned
        })?;

        self.emit(descriptor, document, value);
        Ok(())
    }

    fn collect_object(
        &mut self,
        descriptor: &MetricDescriptor,
        document: &Document,
    ) -> Result<(), Abandoned> {
        debug!(metric = %descriptor.name, path = %descriptor.key_path, "Extracting objects");

        let Some(value_path) = descriptor.value_path.as_deref() else {
            error!(metric = %descriptor.name, "Object metric has no value path");
            return Err(Abandoned);
        };

        let raw = self
            .evaluator
            .evaluate(
                descriptor.engine,
                document,
                &descriptor.key_path,
                Mode::Collection,
            )
            .map_err(|e| {
                error!(
                    metric = %descriptor.name,
                    path = %descriptor.key_path,
                    error = %e,
                    "Failed to extract objects"
                );
                Abandoned
            })?;

        let elements: Vec<Value> = serde_json::from_str(&raw).map_err(|e| {
            error!(
                metric = %descriptor.name,
                path = %descriptor.key_path,
                error = %e,
                "Extracted objects are not a JSON array"
            );
            debug!(metric = %descriptor.name, value = %raw, "Extracted objects");
            Abandoned
        })?;

        for element in elements {
            let element = Document::from_value(element);

            let mut raw = match self.evaluator.evaluate(
                descriptor.engine,
                &element,
                value_path,
                Mode::Text,
            ) {
                Ok(raw) => raw,
                Err(e) if e.is_compile_error() => {
                    error!(
                        metric = %descriptor.name,
                        path = %value_path,
                        error = %e,
                        "Invalid value path, skipping remaining elements"
                    );
                    return Err(Abandoned);
                }
                Err(e) => {
                    error!(
                        metric = %descriptor.name,
                        path = %value_path,
                        error = %e,
                        "Failed to extract value for element"
                    );
                    debug!(metric = %descriptor.name, element = %element.value(), "Element");
                    self.report.failed_elements += 1;
                    continue;
                }
            };

            if let Some(replacement) = descriptor
                .converter()
                .and_then(|converter| converter.get(&raw.to_lowercase()))
            {
                raw = replacement.clone();
            }

            let value = match sanitize_value(&raw) {
                Ok(value) => value,
                Err(e) => {
                    error!(
                        metric = %descriptor.name,
                        path = %value_path,
                        value = %raw,
                        error = %e,
                        "Failed to convert extracted value"
                    );
                    self.report.failed_elements += 1;
                    continue;
                }
            };

            self.emit(descriptor, &element, value);
        }

        Ok(())
    }

    /// Resolve labels and timestamp against `document`, then record.
    fn emit(&mut self, descriptor: &MetricDescriptor, document: &Document, value: f64) {
        let label_values = self.extract_labels(descriptor, document);
        let timestamp_ms = self.extract_timestamp(descriptor, document);

        let sample = Sample {
            label_values,
            value,
            timestamp_ms,
        };
        match self.registry.record(&descriptor.name, sample) {
            Ok(true) => self.report.samples += 1,
            Ok(false) => {}
            Err(e) => error!(metric = %descriptor.name, error = %e, "Failed to record sample"),
        }
    }

    fn extract_labels(&mut self, descriptor: &MetricDescriptor, document: &Document) -> Vec<String> {
        descriptor
            .label_names
            .iter()
            .zip(&descriptor.label_paths)
            .map(|(label, path)| {
                self.evaluator
                    .evaluate(descriptor.engine, document, path, Mode::Text)
                    .unwrap_or_else(|e| {
                        warn!(
                            metric = %descriptor.name,
                            label = %label,
                            path = %path,
                            error = %e,
                            "Failed to extract label value"
                        );
                        String::new()
                    })
            })
            .collect()
    }

    fn extract_timestamp(&mut self, descriptor: &MetricDescriptor, document: &Document) -> Option<i64> {
        let path = descriptor.epoch_timestamp_path.as_deref()?;

        let raw = self
            .evaluator
            .evaluate(descriptor.engine, document, path, Mode::Text)
            .map_err(|e| {
                warn!(
                    metric = %descriptor.name,
                    path = %path,
                    error = %e,
                    "Failed to extract timestamp"
                );
            })
            .ok()?;

        sanitize_int_value(&raw)
            .map_err(|e| {
                warn!(
                    metric = %descriptor.name,
                    path = %path,
                    error = %e,
                    "Failed to parse timestamp"
                );
            })
            .ok()
    }
}

/// Apply the descriptor's transformations in order.
fn transform(descriptor: &MetricDescriptor, root: &Document) -> Result<Document, Abandoned> {
    let mut current = root.value().clone();
    for transformation in &descriptor.transformations {
        let result = match transformation.kind {
            TransformKind::Jq => {
                JqTransform::compile(&transformation.query).and_then(|jq| jq.apply(&current))
            }
        };
        current = result
            .map_err(|e| {
                error!(metric = %descriptor.name, error = %e, "Transformation failed");
                Abandoned
            })?;
    }
    Ok(Document::from_value(current))
}
