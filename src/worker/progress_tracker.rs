use serde::{Deserialize, Serialize};

use crate::protocol::{ProgressEvent, Target};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub channel_id: String,
    pub name: String,
    pub error: String,
}

/// Per-run tally of delivery outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub total: usize,
    pub preview: bool,
    pub successful: Vec<String>,
    pub failed: Vec<FailedDelivery>,
}

impl DeliverySummary {
    pub fn new(total: usize, preview: bool) -> Self {
        Self {
            total,
            preview,
            ..Default::default()
        }
    }

    pub fn completed(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    /// Mark a target as delivered
    pub fn record_success(&mut self, target: &Target) {
        self.successful.push(target.channel_id.clone());
        log::info!(
            "Delivered to {} ({}/{})",
            target.label(),
            self.completed(),
            self.total
        );
    }

    /// Mark a target as failed
    pub fn record_failure(&mut self, target: &Target, error: String) {
        log::warn!(
            "Failed to deliver to {} - {} ({}/{})",
            target.label(),
            error,
            self.completed() + 1,
            self.total
        );
        self.failed.push(FailedDelivery {
            channel_id: target.channel_id.clone(),
            name: target.name.clone(),
            error,
        });
    }

    pub fn summary_text(&self) -> String {
        format!(
            "{} succeeded, {} failed",
            self.successful.len(),
            self.failed.len()
        )
    }

    pub fn done_event(&self) -> ProgressEvent {
        ProgressEvent::Done {
            summary: self.summary_text(),
            succeeded: self.successful.len(),
            failed: self.failed.len(),
            preview: self.preview,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut summary = DeliverySummary::new(3, false);
        summary.record_success(&Target::new("1", "a"));
        summary.record_failure(&Target::new("2", "b"), "Unknown Channel".into());
        summary.record_success(&Target::new("3", "c"));

        assert_eq!(summary.completed(), 3);
        assert_eq!(summary.summary_text(), "2 succeeded, 1 failed");
        assert_eq!(
            summary.done_event(),
            ProgressEvent::Done {
                summary: "2 succeeded, 1 failed".into(),
                succeeded: 2,
                failed: 1,
                preview: false,
            }
        );
    }
}
