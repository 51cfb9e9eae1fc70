use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single atomic step the LLM asks the agent to perform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Step {
    Navigate { url: String },
    WaitFor { selector: String, timeout_ms: u64 },
    TypeInto { selector: String, text: String },
    Click { selector: String },
    PressKey { key: String },
    Extract { selector: String, label: String },
    NewTab,
    Done { summary: String },

    // Custom actions beyond plain browsing.
    PauseForUser { reason: String },
    ClickAndUpload { index: usize, file_path: String },
    WaitForDownload,
    SaveDisplayedFile { filename: String },
    CheckPriceDeal { price_text: String, budget: f64 },
}

/// Outcome of a custom action. Exactly one of content or error,
/// enforced by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum ActionOutcome {
    Content {
        summary: String,
        /// Note the agent should keep across steps (e.g. a saved file path).
        memory: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ActionOutcome {
    pub fn with_memory(summary: impl Into<String>, memory: impl Into<String>) -> Self {
        ActionOutcome::Content {
            summary: summary.into(),
            memory: Some(memory.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ActionOutcome::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ActionOutcome::Error { .. })
    }
}

/// What the agent observes after executing a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub dom_snapshot: String,
    pub extracted: Vec<Extraction>,
    pub outcome: Option<ActionOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub label: String,
    pub content: String,
}

/// A message in the conversation history sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

pub const MAX_STEPS_PER_TASK: usize = 25;
pub const DOM_SNAPSHOT_MAX_CHARS: usize = 4000;

/// How long to wait for the file chooser dialog after clicking an upload button.
pub const FILE_CHOOSER_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait for a download to start and finish after a download click.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_json_round_trips_custom_actions() {
        let raw = r#"{"action":"ClickAndUpload","index":7,"file_path":"/tmp/resume.pdf"}"#;
        let step: Step = serde_json::from_str(raw).unwrap();
        match step {
            Step::ClickAndUpload { index, ref file_path } => {
                assert_eq!(index, 7);
                assert_eq!(file_path, "/tmp/resume.pdf");
            }
            other => panic!("parsed wrong step: {:?}", other),
        }

        let step: Step =
            serde_json::from_str(r#"{"action":"CheckPriceDeal","price_text":"$12.50","budget":20.0}"#)
                .unwrap();
        assert!(matches!(step, Step::CheckPriceDeal { .. }));

        let step: Step = serde_json::from_str(r#"{"action":"WaitForDownload"}"#).unwrap();
        assert!(matches!(step, Step::WaitForDownload));

        let step: Step =
            serde_json::from_str(r#"{"action":"PauseForUser","reason":"login required"}"#).unwrap();
        assert!(matches!(step, Step::PauseForUser { .. }));
    }

    #[test]
    fn outcome_is_either_content_or_error() {
        let ok = ActionOutcome::with_memory("saved", "path is /tmp/a");
        assert!(!ok.is_error());
        let err = ActionOutcome::error("boom");
        assert!(err.is_error());
    }
}
