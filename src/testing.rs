//! Scripted collaborators for deterministic runs without a browser or a
//! language model.
//!
//! [`ScriptedPage`] answers the engine's page scripts from a synthetic DOM
//! and records every driver call; [`ScriptedPlanner`] returns fixed plan text.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::brain::Planner;
use crate::dom::{self, RawControl, RawForm};
use crate::driver::PageDriver;
use crate::error::{AgentError, Result};
use crate::feedback;
use crate::scroll;
use crate::status;
use crate::types::{Coordinates, Rect};

/// One observed driver call. Scripts are recorded by a short name
/// (`forms`, `elements`, `links`, `status`, `scroll`, `metrics`, `overlay`).
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    NewPage,
    Navigate(String),
    Evaluate(String),
    MoveTo(Coordinates),
    Click { at: Coordinates, count: u32 },
    Type { text: String, delay_ms: u64 },
    PressKey(String),
    Wait(u64),
    Close,
}

/// Builder for a synthetic control.
#[derive(Debug, Clone)]
pub struct FakeControl(RawControl);

impl FakeControl {
    pub fn input(name: &str, kind: &str) -> Self {
        Self(RawControl {
            tag: "input".into(),
            name: name.into(),
            kind: kind.into(),
            ..Default::default()
        })
    }

    pub fn button(text: &str, kind: &str) -> Self {
        Self(RawControl {
            tag: "button".into(),
            text: text.into(),
            kind: kind.into(),
            ..Default::default()
        })
    }

    pub fn link(text: &str, href: &str) -> Self {
        Self(RawControl {
            tag: "a".into(),
            text: text.into(),
            href: href.into(),
            ..Default::default()
        })
    }

    /// Bounding box; controls are zero-sized (hidden) until placed.
    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.0.rect = Rect { x, y, width, height };
        self
    }

    pub fn with_class(mut self, class_name: &str) -> Self {
        self.0.class_name = class_name.into();
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.0.id = id.into();
        self
    }

    pub fn with_placeholder(mut self, placeholder: &str) -> Self {
        self.0.placeholder = placeholder.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeForm {
    fields: Vec<FakeControl>,
    buttons: Vec<FakeControl>,
}

impl FakeForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, control: FakeControl) -> Self {
        self.fields.push(control);
        self
    }

    pub fn button(mut self, control: FakeControl) -> Self {
        self.buttons.push(control);
        self
    }

    fn to_raw(&self) -> RawForm {
        RawForm {
            fields: self.fields.iter().map(|c| c.0.clone()).collect(),
            buttons: self.buttons.iter().map(|c| c.0.clone()).collect(),
        }
    }
}

#[derive(Debug, Default)]
struct PageState {
    forms: Vec<FakeForm>,
    forms_after_click: Option<Vec<FakeForm>>,
    elements: Vec<FakeControl>,
    body_text: String,
    url: String,
    failing_url: Option<String>,
    calls: Vec<DriverCall>,
}

/// In-memory page standing in for a browser tab.
///
/// Clones share state, so a test can keep one handle and give the other to
/// a [`crate::driver::Session`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forms(self, forms: Vec<FakeForm>) -> Self {
        self.lock().forms = forms;
        self
    }

    /// Forms that replace the current ones after the first click, as when a
    /// "Sign up" link reveals the registration form.
    pub fn with_forms_after_click(self, forms: Vec<FakeForm>) -> Self {
        self.lock().forms_after_click = Some(forms);
        self
    }

    /// Anchors, buttons and submit inputs outside forms.
    pub fn with_elements(self, elements: Vec<FakeControl>) -> Self {
        self.lock().elements = elements;
        self
    }

    pub fn with_body_text(self, text: &str) -> Self {
        self.lock().body_text = text.into();
        self
    }

    pub fn fail_navigation_to(self, url: &str) -> Self {
        self.lock().failing_url = Some(url.into());
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn script_calls(&self, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::Evaluate(n) if n == name))
            .count()
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: DriverCall) {
        self.lock().calls.push(call);
    }
}

fn script_name(script: &str) -> &'static str {
    match script {
        s if s == dom::FORMS_SCRIPT => "forms",
        s if s == dom::ELEMENTS_SCRIPT => "elements",
        s if s == dom::LINKS_SCRIPT => "links",
        s if s == status::STATUS_SCRIPT => "status",
        s if s == scroll::SCROLL_SCRIPT => "scroll",
        s if s == scroll::METRICS_SCRIPT => "metrics",
        s if s == feedback::OVERLAY_SCRIPT => "overlay",
        _ => "other",
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    async fn new_page(&self) -> Result<()> {
        self.record(DriverCall::NewPage);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.record(DriverCall::Navigate(url.into()));
        let mut state = self.lock();
        if state.failing_url.as_deref() == Some(url) {
            return Err(AgentError::NavigationFailure {
                url: url.into(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        state.url = url.into();
        Ok(())
    }

    async fn evaluate(&self, script: &str, _arg: Value) -> Result<Value> {
        let name = script_name(script);
        self.record(DriverCall::Evaluate(name.into()));
        let state = self.lock();

        let value = match name {
            "forms" => {
                let forms: Vec<RawForm> = state.forms.iter().map(FakeForm::to_raw).collect();
                serde_json::to_value(forms)?
            }
            "elements" => {
                let controls: Vec<&RawControl> = state
                    .elements
                    .iter()
                    .map(|c| &c.0)
                    .filter(|c| c.tag == "a" || c.tag == "button" || c.kind == "submit")
                    .collect();
                serde_json::to_value(controls)?
            }
            "links" => {
                let links: Vec<&RawControl> = state
                    .elements
                    .iter()
                    .map(|c| &c.0)
                    .filter(|c| c.tag == "a" && !c.href.is_empty())
                    .collect();
                serde_json::to_value(links)?
            }
            "status" => json!({"url": state.url, "text": state.body_text}),
            "scroll" => json!(2400),
            "metrics" => json!({
                "scrollHeight": 2400,
                "viewportHeight": 800,
                "currentScroll": 1600,
                "visibleElements": 120,
            }),
            _ => Value::Null,
        };
        Ok(value)
    }

    async fn move_to(&self, at: Coordinates) -> Result<()> {
        self.record(DriverCall::MoveTo(at));
        Ok(())
    }

    async fn click_at(&self, at: Coordinates, click_count: u32) -> Result<()> {
        self.record(DriverCall::Click {
            at,
            count: click_count,
        });
        let mut state = self.lock();
        if let Some(forms) = state.forms_after_click.take() {
            state.forms = forms;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str, per_char_delay: Duration) -> Result<()> {
        self.record(DriverCall::Type {
            text: text.into(),
            delay_ms: per_char_delay.as_millis() as u64,
        });
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(DriverCall::PressKey(key.into()));
        Ok(())
    }

    async fn wait(&self, duration: Duration) {
        self.record(DriverCall::Wait(duration.as_millis() as u64));
    }

    async fn close(&self) -> Result<()> {
        self.record(DriverCall::Close);
        Ok(())
    }
}

/// What the planner was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub task: String,
    pub elements: String,
    pub form_data: String,
}

/// Planner returning canned text, or failing on demand.
#[derive(Debug, Clone)]
pub struct ScriptedPlanner {
    reply: std::result::Result<String, String>,
    requests: Arc<Mutex<Vec<PlanRequest>>>,
}

impl ScriptedPlanner {
    pub fn new(plan_text: &str) -> Self {
        Self {
            reply: Ok(plan_text.to_string()),
            requests: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            requests: Arc::default(),
        }
    }

    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn generate_plan(&self, task: &str, elements: &str, form_data: &str) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(PlanRequest {
                task: task.into(),
                elements: elements.into(),
                form_data: form_data.into(),
            });
        }
        self.reply.clone().map_err(AgentError::PlannerFailure)
    }

    async fn analyze_task(&self, task: &str) -> Result<String> {
        Ok(format!("Scripted analysis of: {}", task))
    }
}
