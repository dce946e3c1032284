//! Exporter self-metrics served on the metrics path.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ModuleLabels {
    module: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FailureLabels {
    module: String,
    reason: String,
}

/// Why a probe request did not return samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    UnknownModule,
    MissingTarget,
    Build,
    Fetch,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnknownModule => "unknown_module",
            FailureReason::MissingTarget => "missing_target",
            FailureReason::Build => "build",
            FailureReason::Fetch => "fetch",
            FailureReason::Timeout => "timeout",
        }
    }
}

/// Counters describing the exporter's own activity.
#[derive(Debug)]
pub struct ExporterMetrics {
    registry: Registry,
    probes: Family<ModuleLabels, Counter>,
    failures: Family<FailureLabels, Counter>,
    samples: Family<ModuleLabels, Counter>,
}

impl ExporterMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("jsonsight");

        let probes = Family::<ModuleLabels, Counter>::default();
        registry.register("probes", "Probe requests handled", probes.clone());

        let failures = Family::<FailureLabels, Counter>::default();
        registry.register(
            "probe_failures",
            "Probe requests that returned an error",
            failures.clone(),
        );

        let samples = Family::<ModuleLabels, Counter>::default();
        registry.register(
            "samples_emitted",
            "Samples returned by successful probes",
            samples.clone(),
        );

        Self {
            registry,
            probes,
            failures,
            samples,
        }
    }

    pub fn probe_started(&self, module: &str) {
        self.probes
            .get_or_create(&ModuleLabels {
                module: module.to_string(),
            })
            .inc();
    }

    /// Count a request for a module that is not configured.
    ///
    /// The requested name comes from the client, so it is not used as a
    /// label value; all such requests share `module=""`.
    pub fn unknown_module(&self) {
        self.probe_failed("", FailureReason::UnknownModule);
    }

    pub fn probe_failed(&self, module: &str, reason: FailureReason) {
        self.failures
            .get_or_create(&FailureLabels {
                module: module.to_string(),
                reason: reason.as_str().to_string(),
            })
            .inc();
    }

    pub fn samples_emitted(&self, module: &str, count: usize) {
        self.samples
            .get_or_create(&ModuleLabels {
                module: module.to_string(),
            })
            .inc_by(count as u64);
    }

    /// Encode all self-metrics in OpenMetrics text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = ExporterMetrics::new();
        metrics.probe_started("default");
        metrics.probe_started("default");
        metrics.probe_failed("default", FailureReason::Fetch);
        metrics.samples_emitted("default", 7);

        let output = metrics.render().unwrap();
        assert!(output.contains("jsonsight_probes_total{module=\"default\"} 2"));
        assert!(
            output.contains("jsonsight_probe_failures_total{module=\"default\",reason=\"fetch\"} 1")
        );
        assert!(output.contains("jsonsight_samples_emitted_total{module=\"default\"} 7"));
        assert!(output.ends_with("# EOF\n"));
    }

    #[test]
    fn test_unknown_modules_share_one_series() {
        let metrics = ExporterMetrics::new();
        for _ in 0..100 {
            metrics.unknown_module();
        }

        let output = metrics.render().unwrap();
        let series: Vec<&str> = output
            .lines()
            .filter(|line| line.contains("reason=\"unknown_module\""))
            .collect();
        assert_eq!(
            series,
            vec!["jsonsight_probe_failures_total{module=\"\",reason=\"unknown_module\"} 100"]
        );
    }

    #[test]
    fn test_empty_render_has_descriptors() {
        let output = ExporterMetrics::default().render().unwrap();
        assert!(output.contains("# TYPE jsonsight_probes counter"));
    }
}
