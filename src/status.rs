use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::config::TimingConfig;
use crate::driver::Session;
use crate::error::Result;
use crate::types::ExecutionStatus;

/// Reads the location and the visible body text.
pub const STATUS_SCRIPT: &str = r#"
() => ({
  url: window.location.href,
  text: document.body ? (document.body.textContent || '') : '',
})
"#;

/// While the URL still contains this, the form page is assumed not to have moved on.
pub const ORIGIN_MARKER: &str = "signup";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageText {
    url: String,
    text: String,
}

/// Let the page settle, then read a coarse success/failure signal from it.
pub async fn check(session: &Session, timing: &TimingConfig) -> Result<ExecutionStatus> {
    let started = Instant::now();
    info!("Checking execution status");

    let page = session.page()?;
    page.wait(timing.status_settle()).await;

    let value = page.evaluate(STATUS_SCRIPT, Value::Null).await?;
    let observed: PageText = serde_json::from_value(value)?;
    let status = status_from(&observed.url, &observed.text);

    info!(
        tool = "check_execution_status",
        duration_ms = started.elapsed().as_millis() as u64,
        url = %status.url,
        success = status.has_success_message,
        error = status.has_error_message,
        "completed"
    );
    Ok(status)
}

pub fn status_from(url: &str, body_text: &str) -> ExecutionStatus {
    let text = body_text.to_lowercase();
    ExecutionStatus {
        url: url.to_string(),
        has_success_message: text.contains("success"),
        has_error_message: text.contains("error"),
        url_changed: !url.contains(ORIGIN_MARKER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DriverCall, ScriptedPage};

    #[test]
    fn test_status_heuristics() {
        let status = status_from("https://x.test/welcome", "Account created SUCCESSFULLY");
        assert!(status.has_success_message);
        assert!(!status.has_error_message);
        assert!(status.url_changed);

        let status = status_from("https://x.test/signup", "Error: email taken");
        assert!(!status.has_success_message);
        assert!(status.has_error_message);
        assert!(!status.url_changed);
    }

    #[tokio::test]
    async fn test_check_waits_then_reads() {
        let page = ScriptedPage::new().with_body_text("Thanks! Success.");
        let mut session = Session::new(page.clone());
        session.open("https://x.test/signup").await.unwrap();

        let status = check(&session, &TimingConfig::default()).await.unwrap();
        assert_eq!(status.url, "https://x.test/signup");
        assert!(status.has_success_message);
        assert!(!status.url_changed);

        let calls = page.calls();
        let wait = calls.iter().position(|c| *c == DriverCall::Wait(500)).unwrap();
        let read = calls
            .iter()
            .position(|c| *c == DriverCall::Evaluate("status".into()))
            .unwrap();
        assert!(wait < read);
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let page = ScriptedPage::new().with_body_text("An error occurred");
        let mut session = Session::new(page);
        session.open("https://x.test/done").await.unwrap();

        let timing = TimingConfig::default();
        let first = check(&session, &timing).await.unwrap();
        let second = check(&session, &timing).await.unwrap();
        assert_eq!(first, second);
    }
}
