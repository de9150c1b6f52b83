//! Per-device retry limiter for configuration pushes.
//!
//! Failures are counted per device for the lifetime of one agent run. Once a
//! device reaches the limit, any push that targets it is refused as a whole.

use dispatch_core::tool::ToolOutcome;
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_PUSH_FAILURE_LIMIT: u32 = 2;

const FAILURE_MARKERS: [&str; 2] = ["Error", "Failed"];

#[derive(Debug, Clone)]
pub struct RetryLimiter {
    limit: u32,
    failures: HashMap<String, u32>,
}

impl RetryLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            failures: HashMap::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Consecutive failures recorded for `device`.
    pub fn failures(&self, device: &str) -> u32 {
        self.failures.get(device).copied().unwrap_or(0)
    }

    pub fn should_attempt(&self, device: &str) -> bool {
        self.failures(device) < self.limit
    }

    /// A success resets the counter, a failure increments it.
    pub fn record_result(&mut self, device: &str, success: bool) {
        let count = self.failures.entry(device.to_string()).or_insert(0);
        if success {
            *count = 0;
        } else {
            *count += 1;
        }
    }

    /// Devices in the batch that must not be attempted again.
    pub fn vetoed<'a>(&self, devices: &'a [String]) -> Vec<&'a str> {
        devices
            .iter()
            .map(String::as_str)
            .filter(|d| !self.should_attempt(d))
            .collect()
    }

    /// Synthetic tool result for a vetoed batch.
    pub fn veto_message(&self, vetoed: &[&str]) -> String {
        let subject = if vetoed.len() == 1 {
            format!("device {}", vetoed[0])
        } else {
            format!("devices {}", vetoed.join(", "))
        };
        format!(
            "Execution cancelled: maximum retry limit ({}) reached for {subject}. \
             No configuration was pushed. Check device connectivity before trying again.",
            self.limit
        )
    }

    /// Feed a push outcome back for every device in the batch.
    ///
    /// Returns the devices counted as failed, in batch order.
    pub fn record_push(&mut self, devices: &[String], outcome: &ToolOutcome) -> Vec<String> {
        let mut failed = Vec::new();
        for device in devices {
            let success = match outcome {
                ToolOutcome::Ok(text) => !device_failed(text, device),
                ToolOutcome::TimedOut | ToolOutcome::Failed(_) => false,
            };
            self.record_result(device, success);
            if !success {
                failed.push(device.clone());
            }
        }
        failed
    }
}

impl Default for RetryLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_FAILURE_LIMIT)
    }
}

/// Target device names of a `push_configuration` call, in order, without
/// duplicates. Entries without a name count as `unknown`.
pub fn push_targets(arguments: &Value) -> Vec<String> {
    let mut devices: Vec<String> = Vec::new();
    let Some(configs) = arguments.get("device_configs").and_then(Value::as_array) else {
        return devices;
    };
    for config in configs {
        let name = config
            .get("device_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if !devices.iter().any(|d| d == name) {
            devices.push(name.to_string());
        }
    }
    devices
}

/// Whether a push report marks `device` as failed.
///
/// Reports are paragraphs of the form `Device R1: ...`; when no paragraph
/// names the device the whole report decides.
fn device_failed(report: &str, device: &str) -> bool {
    let prefix = format!("Device {device}:");
    let own: Vec<&str> = report
        .split("\n\n")
        .filter(|p| p.trim_start().starts_with(&prefix))
        .collect();

    if own.is_empty() {
        has_failure_marker(report)
    } else {
        own.iter().any(|p| has_failure_marker(p))
    }
}

fn has_failure_marker(text: &str) -> bool {
    FAILURE_MARKERS.iter().any(|m| text.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn failures_accumulate_until_limit() {
        let mut limiter = RetryLimiter::default();
        assert!(limiter.should_attempt("R1"));
        limiter.record_result("R1", false);
        assert!(limiter.should_attempt("R1"));
        limiter.record_result("R1", false);
        assert!(!limiter.should_attempt("R1"));
        assert_eq!(limiter.failures("R1"), 2);
    }

    #[test]
    fn success_resets_counter() {
        let mut limiter = RetryLimiter::new(2);
        limiter.record_result("R1", false);
        limiter.record_result("R1", true);
        assert_eq!(limiter.failures("R1"), 0);
        limiter.record_result("R1", false);
        assert!(limiter.should_attempt("R1"));
    }

    #[test]
    fn batch_is_vetoed_when_any_target_is_exhausted() {
        let mut limiter = RetryLimiter::new(2);
        limiter.record_result("R2", false);
        limiter.record_result("R2", false);
        let batch = names(&["R1", "R2"]);
        let vetoed = limiter.vetoed(&batch);
        assert_eq!(vetoed, vec!["R2"]);

        let message = limiter.veto_message(&vetoed);
        assert!(message.contains("maximum retry limit (2)"));
        assert!(message.contains("device R2"));
    }

    #[test]
    fn veto_message_names_every_device() {
        let limiter = RetryLimiter::new(3);
        let message = limiter.veto_message(&["R1", "R2"]);
        assert!(message.contains("(3)"));
        assert!(message.contains("devices R1, R2"));
    }

    #[test]
    fn push_report_is_attributed_per_device() {
        let mut limiter = RetryLimiter::new(2);
        let report = "Device R1: success, 1 line(s) applied\n\n\
                      Device R2: Error: Device R2 is unreachable";
        let failed = limiter.record_push(&names(&["R1", "R2"]), &ToolOutcome::Ok(report.into()));
        assert_eq!(failed, vec!["R2".to_string()]);
        assert_eq!(limiter.failures("R1"), 0);
        assert_eq!(limiter.failures("R2"), 1);
    }

    #[test]
    fn unattributed_error_text_fails_whole_batch() {
        let mut limiter = RetryLimiter::new(2);
        limiter.record_push(
            &names(&["R1", "R2"]),
            &ToolOutcome::Ok("Failed to connect to runner".into()),
        );
        assert_eq!(limiter.failures("R1"), 1);
        assert_eq!(limiter.failures("R2"), 1);
    }

    #[test]
    fn timeout_and_failure_count_against_every_device() {
        let mut limiter = RetryLimiter::new(2);
        let batch = names(&["R1", "R2"]);
        limiter.record_push(&batch, &ToolOutcome::TimedOut);
        limiter.record_push(&batch, &ToolOutcome::Failed("boom".into()));
        assert!(limiter.vetoed(&batch).len() == 2);
    }

    #[test]
    fn push_targets_are_deduplicated() {
        let args = json!({
            "device_configs": [
                {"device_name": "R1", "commands": ["a"]},
                {"device_name": "R1", "commands": ["b"], "parent": "router ospf 1"},
                {"commands": ["c"]}
            ]
        });
        assert_eq!(push_targets(&args), names(&["R1", "unknown"]));
        assert!(push_targets(&json!({})).is_empty());
    }
}
