//! [`PageDriver`] backed by a real Chrome through `headless_chrome`.
//!
//! headless_chrome is synchronous, so every call runs on the blocking pool
//! with a cloned tab handle.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Input;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::driver::PageDriver;
use crate::error::{AgentError, Result};
use crate::types::Coordinates;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const READY_POLL: Duration = Duration::from_millis(100);

pub struct ChromeDriver {
    config: BrowserConfig,
    browser: Mutex<Option<Browser>>,
    tab: Mutex<Option<Arc<Tab>>>,
}

impl ChromeDriver {
    /// Nothing is started until the first [`PageDriver::new_page`].
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
            tab: Mutex::new(None),
        }
    }

    fn tab(&self) -> Result<Arc<Tab>> {
        self.tab
            .lock()
            .map_err(|_| AgentError::Driver("tab lock poisoned".into()))?
            .clone()
            .ok_or(AgentError::BrowserNotInitialized)
    }

    /// Run `f` against the current tab on the blocking pool.
    async fn with_tab<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
    {
        let tab = self.tab()?;
        blocking(move || f(&tab)).await?.map_err(driver_error)
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AgentError::Driver(format!("browser task panicked: {}", e)))
}

fn driver_error(e: anyhow::Error) -> AgentError {
    AgentError::Driver(format!("{:#}", e))
}

fn launch(config: &BrowserConfig) -> anyhow::Result<Browser> {
    if let Some(url) = &config.attach_url {
        info!(url, "Attempting to attach to existing Chrome");
        match Browser::connect(url.clone()) {
            Ok(browser) => {
                info!("Attached to existing Chrome");
                return Ok(browser);
            }
            Err(e) => warn!(error = %e, "Could not attach, launching a new browser"),
        }
    }

    let options = LaunchOptions {
        headless: config.headless,
        window_size: Some((config.window_width, config.window_height)),
        path: config.chrome_path.clone(),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
        ],
        idle_browser_timeout: Duration::from_secs(config.idle_timeout_secs),
        ..Default::default()
    };

    info!(headless = config.headless, "Launching Chrome");
    Browser::new(options).context("Browser launch failed")
}

/// Wrap a function expression so it is called with `arg` and its result
/// comes back as a JSON string.
fn call_expression(script: &str, arg: &Value) -> String {
    format!("JSON.stringify(({})({}))", script.trim(), arg)
}

fn mouse_event(
    kind: Input::DispatchMouseEventTypeOption,
    at: Coordinates,
    click_count: Option<u32>,
) -> Input::DispatchMouseEvent {
    Input::DispatchMouseEvent {
        Type: kind,
        x: at.x,
        y: at.y,
        modifiers: None,
        timestamp: None,
        button: click_count.map(|_| Input::MouseButton::Left),
        buttons: None,
        click_count,
        force: None,
        tangential_pressure: None,
        tilt_x: None,
        tilt_y: None,
        twist: None,
        delta_x: None,
        delta_y: None,
        pointer_Type: None,
    }
}

fn wait_until_parsed(tab: &Tab) -> anyhow::Result<()> {
    let started = Instant::now();
    loop {
        let state = tab
            .evaluate("document.readyState", false)?
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        if state == "interactive" || state == "complete" {
            return Ok(());
        }
        if started.elapsed() > NAVIGATION_TIMEOUT {
            anyhow::bail!("page still '{}' after {:?}", state, NAVIGATION_TIMEOUT);
        }
        std::thread::sleep(READY_POLL);
    }
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn new_page(&self) -> Result<()> {
        let existing = self
            .browser
            .lock()
            .map_err(|_| AgentError::Driver("browser lock poisoned".into()))?
            .take();

        let config = self.config.clone();
        let (browser, tab) = blocking(move || -> anyhow::Result<(Browser, Arc<Tab>)> {
            let browser = match existing {
                Some(b) => b,
                None => launch(&config)?,
            };
            let tab = browser.new_tab().context("Failed to open tab")?;
            Ok((browser, tab))
        })
        .await?
        .map_err(driver_error)?;

        debug!("Tab ready");
        if let Ok(mut slot) = self.browser.lock() {
            *slot = Some(browser);
        }
        if let Ok(mut slot) = self.tab.lock() {
            *slot = Some(tab);
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let tab = self.tab()?;
        let target = url.to_string();
        blocking(move || -> anyhow::Result<()> {
            tab.navigate_to(&target)?.wait_until_navigated()?;
            wait_until_parsed(&tab)
        })
        .await?
        .map_err(|e| AgentError::NavigationFailure {
            url: url.to_string(),
            reason: format!("{:#}", e),
        })
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        let expression = call_expression(script, &arg);
        let raw = self
            .with_tab(move |tab| Ok(tab.evaluate(&expression, false)?.value))
            .await?;

        match raw {
            Some(Value::String(json)) => Ok(serde_json::from_str(&json)?),
            Some(other) => Ok(other),
            None => Ok(Value::Null),
        }
    }

    async fn move_to(&self, at: Coordinates) -> Result<()> {
        self.with_tab(move |tab| {
            tab.call_method(mouse_event(
                Input::DispatchMouseEventTypeOption::MouseMoved,
                at,
                None,
            ))?;
            Ok(())
        })
        .await
    }

    async fn click_at(&self, at: Coordinates, click_count: u32) -> Result<()> {
        self.with_tab(move |tab| {
            for count in 1..=click_count.max(1) {
                tab.call_method(mouse_event(
                    Input::DispatchMouseEventTypeOption::MousePressed,
                    at,
                    Some(count),
                ))?;
                tab.call_method(mouse_event(
                    Input::DispatchMouseEventTypeOption::MouseReleased,
                    at,
                    Some(count),
                ))?;
            }
            Ok(())
        })
        .await
    }

    async fn type_text(&self, text: &str, per_char_delay: Duration) -> Result<()> {
        let text = text.to_string();
        self.with_tab(move |tab| {
            for ch in text.chars() {
                tab.type_str(&ch.to_string())?;
                std::thread::sleep(per_char_delay);
            }
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_tab(move |tab| {
            tab.press_key(&key)?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut slot) = self.tab.lock() {
            slot.take();
        }
        let browser = self
            .browser
            .lock()
            .map_err(|_| AgentError::Driver("browser lock poisoned".into()))?
            .take();
        if let Some(browser) = browser {
            // Dropping a launched browser kills its process.
            blocking(move || drop(browser)).await?;
            info!("Browser closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_expression_passes_argument() {
        let expr = call_expression("\n(arg) => arg.kind\n", &json!({"kind": "status"}));
        assert_eq!(expr, r#"JSON.stringify(((arg) => arg.kind)({"kind":"status"}))"#);
    }

    #[test]
    fn test_call_expression_null_argument() {
        let expr = call_expression("() => 1", &Value::Null);
        assert_eq!(expr, "JSON.stringify((() => 1)(null))");
    }

    #[test]
    fn test_mouse_events() {
        let at = Coordinates::new(40.0, 12.0);

        let moved = mouse_event(Input::DispatchMouseEventTypeOption::MouseMoved, at, None);
        assert!(matches!(moved.Type, Input::DispatchMouseEventTypeOption::MouseMoved));
        assert_eq!((moved.x, moved.y), (40.0, 12.0));
        assert!(moved.button.is_none());
        assert!(moved.click_count.is_none());

        for kind in [
            Input::DispatchMouseEventTypeOption::MousePressed,
            Input::DispatchMouseEventTypeOption::MouseReleased,
        ] {
            let event = mouse_event(kind, at, Some(2));
            assert!(matches!(event.button, Some(Input::MouseButton::Left)));
            assert_eq!(event.click_count, Some(2));
            assert!(event.modifiers.is_none());
            assert!(event.pointer_Type.is_none());
        }
    }

    #[tokio::test]
    async fn test_navigate_needs_a_tab() {
        let driver = ChromeDriver::new(BrowserConfig::default());
        let err = driver.navigate("https://example.test").await.unwrap_err();
        assert!(matches!(err, AgentError::BrowserNotInitialized));
    }

    #[tokio::test]
    async fn test_page_calls_need_a_tab() {
        let driver = ChromeDriver::new(BrowserConfig::default());
        let err = driver.press_key("Delete").await.unwrap_err();
        assert!(matches!(err, AgentError::BrowserNotInitialized));
        assert!(driver.close().await.is_ok());
    }
}
