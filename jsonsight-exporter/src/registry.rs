//! Per-probe metric registry and text exposition.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use thiserror::Error;
use tracing::warn;

use crate::descriptor::{MetricDescriptor, ValueType};
use crate::naming::{escape_help, escape_label_value, format_value};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("metric {name:?} is already registered with a different help, type or label set")]
    Conflict { name: String },

    #[error("metric {0:?} is not registered")]
    Unknown(String),

    #[error("metric {name:?} expects {expected} label values, got {actual}")]
    LabelCount {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// One emitted sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label values, parallel to the family's label names.
    pub label_values: Vec<String>,
    pub value: f64,
    /// Explicit timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

#[derive(Debug)]
struct Family {
    help: String,
    value_type: ValueType,
    label_names: Vec<String>,
    samples: Vec<Sample>,
    seen: HashSet<Vec<String>>,
}

/// Collects the samples of a single probe.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    families: BTreeMap<String, Family>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric family.
    ///
    /// Registering the same shape twice is a no-op.
    pub fn register(
        &mut self,
        name: &str,
        help: &str,
        value_type: ValueType,
        label_names: &[String],
    ) -> Result<(), RegistryError> {
        if let Some(existing) = self.families.get(name) {
            if existing.help == help
                && existing.value_type == value_type
                && existing.label_names == label_names
            {
                return Ok(());
            }
            return Err(RegistryError::Conflict {
                name: name.to_string(),
            });
        }

        self.families.insert(
            name.to_string(),
            Family {
                help: help.to_string(),
                value_type,
                label_names: label_names.to_vec(),
                samples: Vec::new(),
                seen: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn register_descriptor(&mut self, descriptor: &MetricDescriptor) -> Result<(), RegistryError> {
        self.register(
            &descriptor.name,
            &descriptor.help,
            descriptor.value_type,
            &descriptor.label_names,
        )
    }

    /// Record a sample. Returns `false` when an identical label set was
    /// already recorded for this family and the sample was dropped.
    pub fn record(&mut self, name: &str, sample: Sample) -> Result<bool, RegistryError> {
        let family = self
            .families
            .get_mut(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;

        if family.label_names.len() != sample.label_values.len() {
            return Err(RegistryError::LabelCount {
                name: name.to_string(),
                expected: family.label_names.len(),
                actual: sample.label_values.len(),
            });
        }

        if !family.seen.insert(sample.label_values.clone()) {
            warn!(
                metric = %name,
                labels = ?sample.label_values,
                "Dropping sample with duplicate label values"
            );
            return Ok(false);
        }

        family.samples.push(sample);
        Ok(true)
    }

    /// Number of samples recorded across all families.
    pub fn sample_count(&self) -> usize {
        self.families.values().map(|f| f.samples.len()).sum()
    }

    pub fn samples(&self, name: &str) -> &[Sample] {
        self.families
            .get(name)
            .map(|f| f.samples.as_slice())
            .unwrap_or_default()
    }

    /// Render in Prometheus text exposition format.
    ///
    /// Families are sorted by name; samples keep emission order. Families
    /// without samples are left out.
    pub fn render(&self) -> String {
        let mut output = Vec::with_capacity(self.families.len() * 100);

        for (name, family) in &self.families {
            if family.samples.is_empty() {
                continue;
            }

            writeln!(output, "# HELP {} {}", name, escape_help(&family.help)).ok();
            writeln!(output, "# TYPE {} {}", name, family.value_type.as_str()).ok();

            for sample in &family.samples {
                write!(
                    output,
                    "{}{} {}",
                    name,
                    format_labels(&family.label_names, &sample.label_values),
                    format_value(sample.value)
                )
                .ok();
                if let Some(ts) = sample.timestamp_ms {
                    write!(output, " {}", ts).ok();
                }
                writeln!(output).ok();
            }
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(names: &[String], values: &[String]) -> String {
    if names.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
