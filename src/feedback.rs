//! Progress side channel: broadcast events plus an optional in-page overlay.
//!
//! Nothing here affects execution results; overlay failures are logged and
//! swallowed.

use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::driver::Session;
use crate::types::Coordinates;

/// Events streamed to observers (CLI log, SSE clients, tests).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    RunStarted { task: String, url: String },
    State { name: String },
    Thinking,
    Progress {
        percent: u8,
        step: usize,
        total: usize,
        description: String,
    },
    StepDone { step: usize, description: String },
    StepSkipped { step: usize, action: String },
    StepError { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::RunStarted { .. } => "run_started",
            AgentEvent::State { .. } => "state",
            AgentEvent::Thinking => "thinking",
            AgentEvent::Progress { .. } => "progress",
            AgentEvent::StepDone { .. } => "step",
            AgentEvent::StepSkipped { .. } => "step_skipped",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready => "ready",
        }
    }
}

/// Draws the progress bar, status badge and click ripple inside the page.
pub const OVERLAY_SCRIPT: &str = r#"
(arg) => {
  if (!document.getElementById('rpa-overlay-style')) {
    const style = document.createElement('style');
    style.id = 'rpa-overlay-style';
    style.textContent = `
      .rpa-progress { position: fixed; top: 0; left: 0; height: 4px; z-index: 999999;
        background: linear-gradient(90deg, #ff6b6b, #4ecdc4, #45b7d1); transition: width 0.3s ease; }
      .rpa-badge { position: fixed; top: 20px; right: 20px; z-index: 999999; padding: 10px 15px;
        border-radius: 25px; background: rgba(0,0,0,0.8); color: #fff; font: 14px Arial, sans-serif; }
      .rpa-click { position: absolute; width: 20px; height: 20px; border-radius: 50%; z-index: 999999;
        border: 2px solid #4ecdc4; background: rgba(78,205,196,0.2); pointer-events: none;
        transform: translate(-50%, -50%); animation: rpa-ripple 0.8s ease-out forwards; }
      @keyframes rpa-ripple { to { opacity: 0; transform: translate(-50%, -50%) scale(3); } }`;
    (document.head || document.documentElement).appendChild(style);
  }
  const single = (cls) => {
    let el = document.querySelector('.' + cls);
    if (!el) { el = document.createElement('div'); el.className = cls; document.body.appendChild(el); }
    return el;
  };
  if (arg.kind === 'progress') {
    const bar = single('rpa-progress');
    bar.style.width = arg.percent + '%';
    bar.title = arg.label;
  } else if (arg.kind === 'status') {
    single('rpa-badge').textContent = arg.label;
  } else if (arg.kind === 'click') {
    const dot = document.createElement('div');
    dot.className = 'rpa-click';
    dot.style.left = (arg.x + window.scrollX) + 'px';
    dot.style.top = (arg.y + window.scrollY) + 'px';
    document.body.appendChild(dot);
    setTimeout(() => dot.remove(), 800);
  }
  return null;
}
"#;

#[derive(Clone, Debug)]
pub struct Feedback {
    events: broadcast::Sender<AgentEvent>,
    overlay: bool,
}

impl Feedback {
    pub fn new(events: broadcast::Sender<AgentEvent>, overlay: bool) -> Self {
        Self { events, overlay }
    }

    /// Events go nowhere unless someone subscribes later.
    pub fn detached() -> Self {
        let (events, _) = broadcast::channel(64);
        Self::new(events, false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    pub async fn show_progress(&self, session: &Session, percent: u8, label: &str) {
        self.draw(session, json!({"kind": "progress", "percent": percent, "label": label}))
            .await;
    }

    pub async fn show_status(&self, session: &Session, label: &str) {
        self.draw(session, json!({"kind": "status", "label": label}))
            .await;
    }

    pub async fn show_click(&self, session: &Session, at: Coordinates) {
        self.draw(session, json!({"kind": "click", "x": at.x, "y": at.y}))
            .await;
    }

    async fn draw(&self, session: &Session, arg: serde_json::Value) {
        if !self.overlay {
            return;
        }
        let Ok(page) = session.page() else {
            return;
        };
        if let Err(e) = page.evaluate(OVERLAY_SCRIPT, arg).await {
            debug!(error = %e, "Overlay update failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DriverCall, ScriptedPage};

    #[test]
    fn test_event_serialization() {
        let event = AgentEvent::Progress {
            percent: 50,
            step: 1,
            total: 2,
            description: "click".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 50);
        assert_eq!(event.name(), "progress");
    }

    #[test]
    fn test_emit_reaches_subscribers() {
        let feedback = Feedback::detached();
        let mut rx = feedback.subscribe();
        feedback.emit(AgentEvent::Thinking);
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Thinking);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        Feedback::detached().emit(AgentEvent::Ready);
    }

    #[tokio::test]
    async fn test_overlay_only_when_enabled() {
        let page = ScriptedPage::new();
        let mut session = Session::new(page.clone());
        session.open("https://example.test").await.unwrap();

        Feedback::detached().show_status(&session, "hidden").await;
        assert_eq!(page.script_calls("overlay"), 0);

        let (tx, _) = broadcast::channel(4);
        let feedback = Feedback::new(tx, true);
        feedback.show_status(&session, "Analyzing Page...").await;
        feedback.show_progress(&session, 20, "Navigation Complete").await;
        feedback.show_click(&session, Coordinates::new(5.0, 5.0)).await;
        assert_eq!(page.script_calls("overlay"), 3);
        assert!(page.calls().contains(&DriverCall::Evaluate("overlay".into())));
    }

    #[tokio::test]
    async fn test_overlay_skipped_without_page() {
        let page = ScriptedPage::new();
        let session = Session::new(page.clone());
        let (tx, _) = broadcast::channel(4);
        Feedback::new(tx, true).show_status(&session, "x").await;
        assert!(page.calls().is_empty());
    }
}
