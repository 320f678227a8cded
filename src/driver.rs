//! Browser capability seam and the per-run session that owns it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::types::Coordinates;

/// The handful of page operations the engine needs from a browser.
///
/// `evaluate` receives a JavaScript function expression and a JSON argument;
/// implementations call the function with the argument inside the page and
/// return its JSON-serializable result.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn new_page(&self) -> Result<()>;

    /// Load `url` and return once the initial HTML has been parsed.
    async fn navigate(&self, url: &str) -> Result<()>;

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value>;

    async fn move_to(&self, at: Coordinates) -> Result<()>;

    /// Press and release the left button `click_count` times in one gesture.
    async fn click_at(&self, at: Coordinates, click_count: u32) -> Result<()>;

    async fn type_text(&self, text: &str, per_char_delay: Duration) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&self) -> Result<()>;
}

/// One automation run's handle on the browser.
///
/// Built once per run and passed by reference to every component that touches
/// the page. Page operations fail with [`AgentError::BrowserNotInitialized`]
/// until [`Session::open`] succeeds.
pub struct Session {
    driver: Box<dyn PageDriver>,
    page_open: bool,
    closed: bool,
}

impl Session {
    pub fn new(driver: impl PageDriver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
            page_open: false,
            closed: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.page_open && !self.closed
    }

    /// Create the page on first use, then navigate it to `url`.
    pub async fn open(&mut self, url: &str) -> Result<()> {
        if self.closed {
            return Err(AgentError::BrowserNotInitialized);
        }
        if !self.page_open {
            debug!("Creating page");
            self.driver.new_page().await?;
            self.page_open = true;
        } else {
            debug!("Reusing existing page");
        }
        info!(url, "Navigating");
        self.driver.navigate(url).await
    }

    pub fn page(&self) -> Result<&dyn PageDriver> {
        if self.is_open() {
            Ok(self.driver.as_ref())
        } else {
            Err(AgentError::BrowserNotInitialized)
        }
    }

    /// Release the browser. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page_open = false;
        info!("Closing browser");
        if let Err(e) = self.driver.close().await {
            warn!(error = %e, "Error during browser cleanup");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DriverCall, ScriptedPage};

    #[tokio::test]
    async fn test_page_requires_open() {
        let session = Session::new(ScriptedPage::new());
        assert!(matches!(session.page(), Err(AgentError::BrowserNotInitialized)));
    }

    #[tokio::test]
    async fn test_open_creates_page_once() {
        let page = ScriptedPage::new();
        let mut session = Session::new(page.clone());
        session.open("https://example.com/a").await.unwrap();
        session.open("https://example.com/b").await.unwrap();
        assert!(session.page().is_ok());

        let calls = page.calls();
        let new_pages = calls.iter().filter(|c| **c == DriverCall::NewPage).count();
        assert_eq!(new_pages, 1);
        assert_eq!(
            calls.last(),
            Some(&DriverCall::Navigate("https://example.com/b".into()))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let page = ScriptedPage::new();
        let mut session = Session::new(page.clone());
        session.open("https://example.com").await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(!session.is_open());
        assert!(matches!(session.page(), Err(AgentError::BrowserNotInitialized)));
        let closes = page.calls().iter().filter(|c| **c == DriverCall::Close).count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn test_open_after_close_fails() {
        let mut session = Session::new(ScriptedPage::new());
        session.close().await.unwrap();
        let err = session.open("https://example.com").await.unwrap_err();
        assert!(matches!(err, AgentError::BrowserNotInitialized));
    }
}
