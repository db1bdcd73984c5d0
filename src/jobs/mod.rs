//! Asynchronous crawl jobs: durable broker plus the embedded worker.

pub mod broker;
pub mod worker;

pub use broker::{EnqueueOptions, JobBroker};
pub use worker::Worker;

use serde::{Deserialize, Serialize};

use crate::scrape::ScrapeMode;

/// Queue jobs are submitted to. A single weighted-priority setup is a
/// possible extension; one queue is enough for the embedded deployment.
pub const DEFAULT_QUEUE: &str = "default";

/// Lifecycle of a job. Transitions are broker-controlled; callers only
/// ever enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Retry,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// Payload stored with each crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJobPayload {
    pub url: String,
    pub render: bool,
    pub mode: ScrapeMode,
}

impl CrawlJobPayload {
    /// Derive the payload from a crawl submission: `render=true` requests
    /// the browser outright, everything else goes through smart mode.
    pub fn new(url: impl Into<String>, render: bool) -> Self {
        Self {
            url: url.into(),
            render,
            mode: if render {
                ScrapeMode::Dynamic
            } else {
                ScrapeMode::Smart
            },
        }
    }
}

/// A job as reported by the broker.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub state: JobState,
    pub max_retry: u32,
    pub retried: u32,
    /// JSON-encoded [`CrawlJobPayload`].
    pub payload: String,
    /// JSON-encoded scrape result, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Last failure message; kept out of the status response.
    #[serde(skip_serializing)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_flag_selects_mode() {
        let rendered = CrawlJobPayload::new("https://example.com", true);
        assert_eq!(rendered.mode, ScrapeMode::Dynamic);

        let plain = CrawlJobPayload::new("https://example.com", false);
        assert_eq!(plain.mode, ScrapeMode::Smart);
    }

    #[test]
    fn payload_wire_format() {
        let payload = CrawlJobPayload::new("https://example.com", true);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            json,
            r#"{"url":"https://example.com","render":true,"mode":"dynamic"}"#
        );

        let back: CrawlJobPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, "https://example.com");
        assert_eq!(back.mode, ScrapeMode::Dynamic);
    }

    #[test]
    fn job_states_round_trip_their_names() {
        for state in [
            JobState::Pending,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Retry,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("paused"), None);
    }

    #[test]
    fn record_serialization_hides_error() {
        let record = JobRecord {
            id: "abc".into(),
            queue: DEFAULT_QUEUE.into(),
            state: JobState::Failed,
            max_retry: 3,
            retried: 3,
            payload: "{}".into(),
            result: None,
            error: Some("navigation timeout".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("navigation timeout"));
        assert!(json.contains("\"state\":\"failed\""));
        assert!(!json.contains("\"result\""));
    }
}
