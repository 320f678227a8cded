use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ScrollConfig;
use crate::driver::Session;
use crate::error::Result;
use crate::feedback::Feedback;

pub const SCROLL_SCRIPT: &str = r#"
() => {
  window.scrollTo(0, document.body.scrollHeight);
  return document.body.scrollHeight;
}
"#;

pub const METRICS_SCRIPT: &str = r#"
() => ({
  scrollHeight: document.body.scrollHeight,
  viewportHeight: window.innerHeight,
  currentScroll: window.pageYOffset,
  visibleElements: document.querySelectorAll('*').length,
})
"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageMetrics {
    pub scroll_height: f64,
    pub viewport_height: f64,
    pub current_scroll: f64,
    pub visible_elements: u64,
}

/// Give lazily loaded content a chance to appear: wait, scroll to the bottom
/// `times` times, wait once more, then measure the page.
pub async fn wait_and_scroll(
    session: &Session,
    config: &ScrollConfig,
    feedback: &Feedback,
) -> Result<PageMetrics> {
    let started = Instant::now();
    info!(
        wait_ms = config.wait_ms,
        times = config.times,
        delay_ms = config.delay_ms,
        "Waiting for content and scrolling page"
    );

    let page = session.page()?;
    page.wait(Duration::from_millis(config.wait_ms)).await;
    feedback
        .show_status(session, "Scrolling to load more content...")
        .await;

    for i in 0..config.times {
        debug!("Scrolling {}/{}", i + 1, config.times);
        page.evaluate(SCROLL_SCRIPT, Value::Null).await?;

        let percent = ((i + 1) * 100 / config.times) as u8;
        feedback
            .show_progress(session, percent, &format!("Scrolling {}/{}", i + 1, config.times))
            .await;

        if i + 1 < config.times {
            page.wait(Duration::from_millis(config.delay_ms)).await;
        }
    }

    page.wait(Duration::from_millis(config.tail_ms)).await;

    let metrics: PageMetrics =
        serde_json::from_value(page.evaluate(METRICS_SCRIPT, Value::Null).await?)?;

    info!(
        tool = "wait_and_scroll",
        duration_ms = started.elapsed().as_millis() as u64,
        scroll_height = metrics.scroll_height,
        "completed"
    );
    Ok(metrics)
}
