use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Running sum/count pair, rendered as a Prometheus summary without quantiles.
#[derive(Debug, Default)]
pub struct DurationSummary {
    count: AtomicU64,
    micros: AtomicU64,
}

impl DurationSummary {
    pub fn observe(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub pricing_requests: Counter,
    pub pricing_duration: DurationSummary,
    pub prediction_requests: Counter,
    pub prediction_duration: DurationSummary,
    pub model_loads: Counter,
    pub model_load_duration: DurationSummary,
    pub applications_submitted: Counter,
    pub events_published: Counter,
    decisions: Mutex<BTreeMap<String, u64>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, decision: &str) {
        if let Ok(mut decisions) = self.decisions.lock() {
            *decisions.entry(decision.to_string()).or_insert(0) += 1;
        }
    }

    pub fn decision_count(&self, decision: &str) -> u64 {
        self.decisions
            .lock()
            .ok()
            .and_then(|d| d.get(decision).copied())
            .unwrap_or(0)
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        write_counter(
            &mut out,
            "pricing_requests_total",
            "Total pricing requests",
            self.pricing_requests.get(),
        );
        write_summary(
            &mut out,
            "pricing_duration_seconds",
            "Time spent processing pricing requests",
            &self.pricing_duration,
        );
        write_counter(
            &mut out,
            "prediction_requests_total",
            "Total prediction requests",
            self.prediction_requests.get(),
        );
        write_summary(
            &mut out,
            "prediction_duration_seconds",
            "Time spent processing predictions",
            &self.prediction_duration,
        );
        write_counter(
            &mut out,
            "model_loads_total",
            "Model artifact loads",
            self.model_loads.get(),
        );
        write_summary(
            &mut out,
            "model_load_time_seconds",
            "Time to load ML model",
            &self.model_load_duration,
        );
        write_counter(
            &mut out,
            "applications_submitted_total",
            "Loan applications submitted",
            self.applications_submitted.get(),
        );
        write_counter(
            &mut out,
            "events_published_total",
            "Events published to the event bus",
            self.events_published.get(),
        );

        let _ = writeln!(out, "# HELP loan_decisions_total Final decisions by outcome");
        let _ = writeln!(out, "# TYPE loan_decisions_total counter");
        if let Ok(decisions) = self.decisions.lock() {
            for (decision, count) in decisions.iter() {
                let _ = writeln!(out, "loan_decisions_total{{decision=\"{}\"}} {}", decision, count);
            }
        }
        out
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
}

fn write_summary(out: &mut String, name: &str, help: &str, summary: &DurationSummary) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} summary", name);
    let _ = writeln!(out, "{}_sum {}", name, summary.sum_seconds());
    let _ = writeln!(out, "{}_count {}", name, summary.count());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters_and_decisions() {
        let metrics = ServiceMetrics::new();
        metrics.pricing_requests.inc();
        metrics.pricing_requests.inc();
        metrics.pricing_duration.observe(Duration::from_millis(250));
        metrics.record_decision("APPROVED");
        metrics.record_decision("APPROVED");
        metrics.record_decision("REJECTED");

        let text = metrics.render();
        assert!(text.contains("pricing_requests_total 2"));
        assert!(text.contains("pricing_duration_seconds_count 1"));
        assert!(text.contains("pricing_duration_seconds_sum 0.25"));
        assert!(text.contains("loan_decisions_total{decision=\"APPROVED\"} 2"));
        assert!(text.contains("loan_decisions_total{decision=\"REJECTED\"} 1"));
        assert_eq!(metrics.decision_count("APPROVED"), 2);
        assert_eq!(metrics.decision_count("APPROVED_WITH_CONDITIONS"), 0);
    }
}
