//! Prometheus text-exposition rendering for [`super::MetricsRegistry`].

use std::fmt::Write as _;
use std::sync::atomic::Ordering;

use super::registry::MetricsRegistry;

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn format_labels(labels: &[(&'static str, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn help_and_type(name: &str) -> (&'static str, &'static str) {
    match name {
        "http_requests_total" => ("Total HTTP requests handled.", "counter"),
        "http_request_duration_seconds" => ("HTTP request latency in seconds.", "histogram"),
        "session_duration_seconds" => ("Agent session duration in seconds.", "histogram"),
        "db_query_duration_seconds" => ("Store query latency in seconds.", "histogram"),
        "agent_messages_total" => ("Total agent-to-agent messages by direction and status.", "counter"),
        "credits_consumed_total" => ("Total credits consumed by agent work.", "counter"),
        "active_sessions" => ("Currently active agent sessions.", "gauge"),
        "circuit_breaker_transitions" => ("Circuit breaker state transitions.", "counter"),
        "agent_rate_limit_rejections" => ("Rejected admissions by the messaging guard.", "counter"),
        _ => ("", "untyped"),
    }
}

impl MetricsRegistry {
    /// Renders the full registry in Prometheus text-exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut rendered_headers = std::collections::HashSet::new();

        for entry in self.counters.iter() {
            let (name, labels) = entry.key();
            if rendered_headers.insert(*name) {
                let (help, ty) = help_and_type(name);
                let _ = writeln!(out, "# HELP {name} {help}");
                let _ = writeln!(out, "# TYPE {name} {ty}");
            }
            let value = entry.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
        }

        for entry in self.gauges.iter() {
            let name = *entry.key();
            if rendered_headers.insert(name) {
                let (help, ty) = help_and_type(name);
                let _ = writeln!(out, "# HELP {name} {help}");
                let _ = writeln!(out, "# TYPE {name} {ty}");
            }
            let value = entry.value().load(Ordering::Relaxed);
            let _ = writeln!(out, "{name} {value}");
        }

        let histograms = self.histograms.lock().expect("histogram registry mutex poisoned");
        for entry in histograms.iter() {
            let (name, labels) = entry.key();
            if rendered_headers.insert(*name) {
                let (help, ty) = help_and_type(name);
                let _ = writeln!(out, "# HELP {name} {help}");
                let _ = writeln!(out, "# TYPE {name} {ty}");
            }
            let histogram = entry.value();
            let mut cumulative = 0u64;
            for (bound, counter) in histogram.bucket_bounds.iter().zip(histogram.bucket_counts.iter()) {
                cumulative = counter.load(Ordering::Relaxed);
                let mut bucket_labels = labels.clone();
                bucket_labels.push(("le", format!("{bound}")));
                let _ = writeln!(out, "{name}_bucket{} {cumulative}", format_labels(&bucket_labels));
            }
            let mut inf_labels = labels.clone();
            inf_labels.push(("le", "+Inf".to_string()));
            let total = histogram.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{name}_bucket{} {total}", format_labels(&inf_labels));
            let _ = cumulative;

            let sum_seconds = histogram.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
            let _ = writeln!(out, "{name}_sum{} {sum_seconds}", format_labels(labels));
            let _ = writeln!(out, "{name}_count{} {total}", format_labels(labels));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_ends_with_newline_and_includes_help_type() {
        let reg = MetricsRegistry::new();
        reg.record_http_request("GET", "/health", 200, 0.01);
        let text = reg.render();
        assert!(text.ends_with('\n'));
        assert!(text.contains("# TYPE http_requests_total counter"));
        assert!(text.contains("# TYPE http_request_duration_seconds histogram"));
        assert!(text.contains("le=\"+Inf\""));
    }

    #[test]
    fn escapes_label_values() {
        let reg = MetricsRegistry::new();
        reg.record_rate_limit_rejection("rate_limited", "agent \"weird\"");
        let text = reg.render();
        assert!(text.contains("agent_id=\"agent \\\"weird\\\"\""));
    }
}
