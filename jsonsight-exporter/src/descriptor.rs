//! Expansion of metric configuration into concrete descriptors.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use thiserror::Error;

use crate::config::{MetricConfig, ModuleConfig};
use crate::engine::{self, EngineKind, ExprError};
use crate::naming::{is_valid_label_name, is_valid_metric_name, make_metric_name};
use crate::transform::{JqTransform, TransformError, TransformKind};

/// Errors raised while building descriptors for a module.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("metric {metric:?}: unknown scrape type {value:?}")]
    UnknownScrapeType { metric: String, value: String },

    #[error("metric {metric:?}: unknown value type {value:?}")]
    UnknownValueType { metric: String, value: String },

    #[error("metric {metric:?}: unknown engine {value:?}")]
    UnknownEngine { metric: String, value: String },

    #[error("metric {metric:?}: {source}")]
    Transformation {
        metric: String,
        #[source]
        source: TransformError,
    },

    #[error("metric {metric:?}: {source}")]
    Expression {
        metric: String,
        #[source]
        source: ExprError,
    },

    #[error("metric {metric:?}: object scrape requires `values`")]
    MissingValues { metric: String },

    #[error("metric {metric:?}: `path` must not be empty")]
    EmptyPath { metric: String },

    #[error("invalid metric name {0:?}")]
    InvalidMetricName(String),

    #[error("metric {metric:?}: invalid label name {label:?}")]
    InvalidLabelName { metric: String, label: String },

    #[error("duplicate metric name {0:?}")]
    DuplicateMetric(String),

    #[error("metric name {0:?} is reserved")]
    ReservedName(String),
}

/// Names of the gauges every probe response carries.
pub const RESERVED_METRIC_NAMES: [&str; 2] = ["probe_success", "probe_duration_seconds"];

/// How a descriptor's key path is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrapeType {
    /// The key path selects one scalar.
    #[default]
    Value,
    /// The key path selects a collection; one sample per element.
    Object,
}

impl FromStr for ScrapeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "value" => Ok(ScrapeType::Value),
            "object" => Ok(ScrapeType::Object),
            _ => Err(()),
        }
    }
}

/// Exposition type of a metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueType {
    Gauge,
    Counter,
    #[default]
    Untyped,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Gauge => "gauge",
            ValueType::Counter => "counter",
            ValueType::Untyped => "untyped",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gauge" => Ok(ValueType::Gauge),
            "counter" => Ok(ValueType::Counter),
            "untyped" => Ok(ValueType::Untyped),
            _ => Err(()),
        }
    }
}

/// A jq query run over the document before extraction.
///
/// The query is compiled when the descriptor is built and again by the
/// collector, which keeps descriptors plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformation {
    pub kind: TransformKind,
    pub query: String,
}

/// A fully resolved metric, ready for collection.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: String,
    pub scrape_type: ScrapeType,
    pub value_type: ValueType,
    pub engine: EngineKind,
    pub key_path: String,
    /// Per-element value path (object scrapes only).
    pub value_path: Option<String>,
    /// Label names, parallel to `label_paths`.
    pub label_names: Vec<String>,
    pub label_paths: Vec<String>,
    pub epoch_timestamp_path: Option<String>,
    /// Value path -> lowercased extracted value -> replacement.
    pub value_converter: HashMap<String, HashMap<String, String>>,
    pub transformations: Vec<Transformation>,
}

impl MetricDescriptor {
    /// Converter entries for this descriptor's value path, if any.
    pub fn converter(&self) -> Option<&HashMap<String, String>> {
        self.value_path
            .as_ref()
            .and_then(|path| self.value_converter.get(path))
    }
}

/// Build every descriptor for a module, in configuration order.
pub fn build_descriptors(module: &ModuleConfig) -> Result<Vec<MetricDescriptor>, BuildError> {
    let mut descriptors = Vec::new();
    for metric in &module.metrics {
        descriptors.extend(build_metric(metric)?);
    }

    let mut seen = HashSet::new();
    for descriptor in &descriptors {
        if RESERVED_METRIC_NAMES.contains(&descriptor.name.as_str()) {
            return Err(BuildError::ReservedName(descriptor.name.clone()));
        }
        if !seen.insert(descriptor.name.as_str()) {
            return Err(BuildError::DuplicateMetric(descriptor.name.clone()));
        }
    }

    Ok(descriptors)
}

/// Build the descriptors for one metric definition.
///
/// A value scrape yields one descriptor. An object scrape yields one per
/// entry of `values`, named `{name}_{key}`.
pub fn build_metric(metric: &MetricConfig) -> Result<Vec<MetricDescriptor>, BuildError> {
    let name = metric.name.clone();

    let scrape_type = match metric.scrape_type.as_deref() {
        None | Some("") => ScrapeType::default(),
        Some(value) => value
            .parse()
            .map_err(|_| BuildError::UnknownScrapeType {
                metric: name.clone(),
                value: value.to_string(),
            })?,
    };

    let value_type = match metric.value_type.as_deref() {
        None | Some("") => ValueType::default(),
        Some(value) => value.parse().map_err(|_| BuildError::UnknownValueType {
            metric: name.clone(),
            value: value.to_string(),
        })?,
    };

    let engine = match metric.engine.as_deref() {
        None | Some("") => EngineKind::default(),
        Some(value) => value.parse().map_err(|_| BuildError::UnknownEngine {
            metric: name.clone(),
            value: value.to_string(),
        })?,
    };

    if metric.path.is_empty() {
        return Err(BuildError::EmptyPath { metric: name });
    }

    for label in metric.labels.keys() {
        if !is_valid_label_name(label) {
            return Err(BuildError::InvalidLabelName {
                metric: name,
                label: label.clone(),
            });
        }
    }

    let transformations = build_transformations(metric)?;
    let help = match metric.help.as_deref() {
        None | Some("") => name.clone(),
        Some(help) => help.to_string(),
    };

    let template = MetricDescriptor {
        name: name.clone(),
        help,
        scrape_type,
        value_type,
        engine,
        key_path: metric.path.clone(),
        value_path: None,
        label_names: metric.labels.keys().cloned().collect(),
        label_paths: metric.labels.values().cloned().collect(),
        epoch_timestamp_path: metric
            .epoch_timestamp
            .clone()
            .filter(|path| !path.is_empty()),
        value_converter: lowercase_converter(&metric.value_converter),
        transformations,
    };

    let descriptors = match scrape_type {
        ScrapeType::Value => vec![template],
        ScrapeType::Object => {
            let values = metric
                .values
                .as_ref()
                .filter(|values| !values.is_empty())
                .ok_or_else(|| BuildError::MissingValues {
                    metric: name.clone(),
                })?;

            values
                .iter()
                .map(|(sub, path)| MetricDescriptor {
                    name: make_metric_name(&[&name, sub]),
                    value_path: Some(path.clone()),
                    ..template.clone()
                })
                .collect()
        }
    };

    if let Some(bad) = descriptors.iter().find(|d| !is_valid_metric_name(&d.name)) {
        return Err(BuildError::InvalidMetricName(bad.name.clone()));
    }

    check_expressions(metric, engine)?;

    Ok(descriptors)
}

/// Compile every expression of a metric with its engine.
fn check_expressions(metric: &MetricConfig, engine: EngineKind) -> Result<(), BuildError> {
    let paths = std::iter::once(&metric.path)
        .chain(metric.values.iter().flat_map(|values| values.values()))
        .chain(metric.labels.values())
        .chain(metric.epoch_timestamp.iter().filter(|path| !path.is_empty()));

    for path in paths {
        engine::check(engine, path).map_err(|source| BuildError::Expression {
            metric: metric.name.clone(),
            source,
        })?;
    }
    Ok(())
}

fn build_transformations(metric: &MetricConfig) -> Result<Vec<Transformation>, BuildError> {
    metric
        .transformations
        .iter()
        .map(|t| {
            let kind: TransformKind = t.kind.parse().map_err(|source| BuildError::Transformation {
                metric: metric.name.clone(),
                source,
            })?;
            JqTransform::compile(&t.query).map_err(|source| BuildError::Transformation {
                metric: metric.name.clone(),
                source,
            })?;
            Ok(Transformation {
                kind,
                query: t.query.clone(),
            })
        })
        .collect()
}

fn lowercase_converter(
    converter: &IndexMap<String, IndexMap<String, String>>,
) -> HashMap<String, HashMap<String, String>> {
    converter
        .iter()
        .map(|(path, mapping)| {
            let mapping = mapping
                .iter()
                .map(|(from, to)| (from.to_lowercase(), to.clone()))
                .collect();
            (path.clone(), mapping)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformationConfig;

    fn labels(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn value_metric(name: &str, path: &str) -> MetricConfig {
        MetricConfig {
            name: name.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn object_metric() -> MetricConfig {
        MetricConfig {
            name: "example_value".to_string(),
            path: "{.values[*]}".to_string(),
            scrape_type: Some("object".to_string()),
            labels: labels(&[("environment", "beta"), ("id", "{.id}")]),
            values: Some(labels(&[
                ("active", "1"),
                ("count", "{.count}"),
                ("boolean", "{.some_boolean}"),
            ])),
            ..Default::default()
        }
    }

    #[test]
    fn test_value_defaults() {
        let descriptors = build_metric(&value_metric("example_global_value", "{.counter}")).unwrap();
        assert_eq!(descriptors.len(), 1);

        let d = &descriptors[0];
        assert_eq!(d.help, "example_global_value");
        assert_eq!(d.scrape_type, ScrapeType::Value);
        assert_eq!(d.value_type, ValueType::Untyped);
        assert_eq!(d.engine, EngineKind::JsonPath);
        assert_eq!(d.key_path, "{.counter}");
        assert!(d.value_path.is_none());
        assert!(d.epoch_timestamp_path.is_none());
    }

    #[test]
    fn test_object_fans_out_per_value() {
        let descriptors = build_metric(&object_metric()).unwrap();
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["example_value_active", "example_value_count", "example_value_boolean"]
        );
        assert_eq!(descriptors[1].value_path.as_deref(), Some("{.count}"));
        for d in &descriptors {
            assert_eq!(d.key_path, "{.values[*]}");
            assert_eq!(d.label_names, vec!["environment", "id"]);
            assert_eq!(d.label_paths, vec!["beta", "{.id}"]);
        }
    }

    #[test]
    fn test_object_requires_values() {
        let mut metric = object_metric();
        metric.values = None;
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::MissingValues { .. })
        ));
    }

    #[test]
    fn test_unknown_strings_name_the_metric() {
        let mut metric = value_metric("m", "{.a}");
        metric.scrape_type = Some("list".to_string());
        let err = build_metric(&metric).unwrap_err();
        assert!(matches!(err, BuildError::UnknownScrapeType { .. }));
        assert_eq!(err.to_string(), "metric \"m\": unknown scrape type \"list\"");

        let mut metric = value_metric("m", "{.a}");
        metric.value_type = Some("histogram".to_string());
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::UnknownValueType { .. })
        ));

        let mut metric = value_metric("m", "{.a}");
        metric.engine = Some("xpath".to_string());
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::UnknownEngine { .. })
        ));
    }

    #[test]
    fn test_parsed_types() {
        let mut metric = value_metric("m", "counter");
        metric.value_type = Some("Counter".to_string());
        metric.engine = Some("cel".to_string());
        metric.help = Some("A counter".to_string());

        let d = &build_metric(&metric).unwrap()[0];
        assert_eq!(d.value_type, ValueType::Counter);
        assert_eq!(d.engine, EngineKind::Cel);
        assert_eq!(d.help, "A counter");
    }

    #[test]
    fn test_invalid_names() {
        assert!(matches!(
            build_metric(&value_metric("bad-name", "{.a}")),
            Err(BuildError::InvalidMetricName(_))
        ));

        let mut metric = value_metric("m", "{.a}");
        metric.labels = labels(&[("bad label", "x")]);
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::InvalidLabelName { .. })
        ));

        assert!(matches!(
            build_metric(&value_metric("m", "")),
            Err(BuildError::EmptyPath { .. })
        ));
    }

    #[test]
    fn test_converter_keys_are_lowercased() {
        let mut metric = object_metric();
        let mut mapping = IndexMap::new();
        mapping.insert("ACTIVE".to_string(), "1".to_string());
        metric
            .value_converter
            .insert("{.count}".to_string(), mapping);

        let descriptors = build_metric(&metric).unwrap();
        let count = descriptors.iter().find(|d| d.name == "example_value_count").unwrap();
        assert_eq!(count.converter().unwrap().get("active").unwrap(), "1");

        let active = descriptors.iter().find(|d| d.name == "example_value_active").unwrap();
        assert!(active.converter().is_none());
    }

    #[test]
    fn test_transformations_are_checked() {
        let mut metric = value_metric("m", "{[0]}");
        metric.transformations = vec![TransformationConfig {
            kind: "jq".to_string(),
            query: ".items | length".to_string(),
        }];
        let d = &build_metric(&metric).unwrap()[0];
        assert_eq!(d.transformations[0].kind, TransformKind::Jq);

        metric.transformations[0].kind = "xslt".to_string();
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::Transformation {
                source: TransformError::UnknownType(_),
                ..
            })
        ));

        metric.transformations[0] = TransformationConfig {
            kind: "jq".to_string(),
            query: ".items[".to_string(),
        };
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::Transformation {
                source: TransformError::Compile { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_malformed_expressions_are_rejected() {
        let mut metric = value_metric("m", "counter +");
        metric.engine = Some("cel".to_string());
        let err = build_metric(&metric).unwrap_err();
        assert!(matches!(
            &err,
            BuildError::Expression { metric, source } if metric == "m" && source.is_compile_error()
        ));

        let mut metric = object_metric();
        metric.labels = labels(&[("id", "{.id")]);
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::Expression { .. })
        ));

        let mut metric = object_metric();
        metric.values = Some(labels(&[("count", "{.values[?(@.count >)]}")]));
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::Expression { .. })
        ));

        let mut metric = value_metric("m", "{.counter}");
        metric.epoch_timestamp = Some("{.ts[}".to_string());
        assert!(matches!(
            build_metric(&metric),
            Err(BuildError::Expression { .. })
        ));
    }

    #[test]
    fn test_meta_metric_names_are_reserved() {
        for name in RESERVED_METRIC_NAMES {
            let module = ModuleConfig {
                metrics: vec![value_metric(name, "{.a}")],
                ..Default::default()
            };
            assert!(matches!(
                build_descriptors(&module),
                Err(BuildError::ReservedName(reserved)) if reserved == name
            ));
        }

        let module = ModuleConfig {
            metrics: vec![MetricConfig {
                scrape_type: Some("object".to_string()),
                values: Some(labels(&[("success", "{.ok}")])),
                ..value_metric("probe", "{.items[*]}")
            }],
            ..Default::default()
        };
        assert!(matches!(
            build_descriptors(&module),
            Err(BuildError::ReservedName(_))
        ));
    }

    #[test]
    fn test_duplicate_names_across_metrics() {
        let module = ModuleConfig {
            metrics: vec![
                value_metric("example_value_count", "{.a}"),
                object_metric(),
            ],
            ..Default::default()
        };
        assert!(matches!(
            build_descriptors(&module),
            Err(BuildError::DuplicateMetric(name)) if name == "example_value_count"
        ));
    }

    #[test]
    fn test_module_order_preserved() {
        let module = ModuleConfig {
            metrics: vec![value_metric("first", "{.a}"), object_metric(), value_metric("last", "{.b}")],
            ..Default::default()
        };
        let names: Vec<String> = build_descriptors(&module)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "first",
                "example_value_active",
                "example_value_count",
                "example_value_boolean",
                "last"
            ]
        );
    }
}
