use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Pixel position in the current viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

impl Coordinates {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Bounding box as reported by `getBoundingClientRect()`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Rendered elements only: zero-sized boxes are hidden or collapsed.
    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Center snapped to whole pixels, used for form controls and elements.
    pub fn rounded_center(&self) -> Coordinates {
        let c = self.center();
        Coordinates::new(c.x.round(), c.y.round())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub placeholder: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    #[serde(rename = "formIndex")]
    pub index: usize,
    pub fields: Vec<Field>,
    pub buttons: Vec<Button>,
}

/// Result of a form inspection. Serialized as-is into the planner prompt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub forms_found: usize,
    pub forms: Vec<Form>,
}

/// A clickable element that matched the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredElement {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Coordinates,
    pub relevance_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub index: usize,
    pub href: String,
    pub text: String,
    pub title: String,
    pub coordinates: Coordinates,
    pub class_name: String,
    pub id: String,
    pub relevance_score: u32,
    pub is_relevant: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub total_links: usize,
    pub relevant_links: Vec<Link>,
    pub summary: String,
}

/// Everything one inspection pass found on the page.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub forms: Vec<Form>,
    pub interactive_elements: Vec<ScoredElement>,
    pub links: Vec<Link>,
}

/// Primitive page operation named by a plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Click,
    Fill,
    Navigate,
    Unknown(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Navigate => "navigate",
            ActionKind::Unknown(name) => name,
        }
    }
}

impl From<String> for ActionKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "click" => ActionKind::Click,
            "fill" => ActionKind::Fill,
            "navigate" => ActionKind::Navigate,
            _ => ActionKind::Unknown(name),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a validated plan. `step` is informational only; execution
/// follows the position in [`ActionPlan::steps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub step: Option<u32>,
    pub action: ActionKind,
    pub coordinates: Option<Coordinates>,
    pub data: String,
    pub description: String,
}

impl ActionStep {
    pub fn label(&self) -> String {
        if self.description.is_empty() {
            self.action.to_string()
        } else {
            format!("{}: {}", self.action, self.description)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ActionPlan {
    pub steps: Vec<ActionStep>,
}

impl ActionPlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Coarse post-run page signal. Advisory, not an oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStatus {
    pub url: String,
    pub has_success_message: bool,
    pub has_error_message: bool,
    pub url_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub steps_executed: usize,
    pub steps_skipped: usize,
    pub elapsed_ms: u64,
}

/// Per-run bookkeeping: what we were asked, where, since when, and how many
/// turns have been spent.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: String,
    pub url: String,
    pub started: Instant,
    pub turns: u32,
}

impl TaskContext {
    pub fn new(task: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            url: url.into(),
            started: Instant::now(),
            turns: 0,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn excerpt(&self) -> String {
        excerpt(&self.task, TASK_EXCERPT_CHARS)
    }
}

/// First `max` characters of `text`, with an ellipsis when truncated.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}

pub const MAX_SCORED_ELEMENTS: usize = 5;
pub const MAX_RELEVANT_LINKS: usize = 10;
pub const RELEVANT_LINK_THRESHOLD: u32 = 5;
pub const ELEMENT_TEXT_MAX_CHARS: usize = 50;
pub const TASK_EXCERPT_CHARS: usize = 50;
