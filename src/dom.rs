use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::driver::Session;
use crate::error::Result;
use crate::scorer::{self, ElementCandidate, LinkCandidate};
use crate::types::{
    Button, Field, Form, FormSnapshot, LinkReport, PageSnapshot, Rect, ScoredElement,
};

/// JavaScript run in the page to describe every `<form>`.
/// READ-ONLY: reports tag, attributes and bounding box of each control.
/// Visibility filtering and centering happen on the Rust side.
pub const FORMS_SCRIPT: &str = r#"
() => {
  const rectOf = (el) => {
    const r = el.getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height };
  };
  return Array.from(document.querySelectorAll('form')).map((form) => ({
    fields: Array.from(form.querySelectorAll('input, textarea, select')).map((el) => ({
      tag: el.tagName.toLowerCase(),
      name: el.name || '',
      id: el.id || '',
      type: el.type || '',
      placeholder: el.placeholder || '',
      rect: rectOf(el),
    })),
    buttons: Array.from(form.querySelectorAll('button, input[type="submit"]')).map((el) => ({
      tag: el.tagName.toLowerCase(),
      text: (el.textContent || '').trim(),
      value: el.value || '',
      type: el.type || '',
      rect: rectOf(el),
    })),
  }));
}
"#;

/// Clickable elements in document order.
pub const ELEMENTS_SCRIPT: &str = r#"
() => Array.from(document.querySelectorAll('a, button, input[type="submit"]')).map((el) => {
  const r = el.getBoundingClientRect();
  return {
    tag: el.tagName.toLowerCase(),
    text: (el.textContent || '').trim(),
    type: el.type || '',
    rect: { x: r.x, y: r.y, width: r.width, height: r.height },
  };
})
"#;

/// Every anchor with an href, resolved to an absolute URL.
pub const LINKS_SCRIPT: &str = r#"
() => Array.from(document.querySelectorAll('a[href]')).map((el) => {
  const r = el.getBoundingClientRect();
  return {
    tag: 'a',
    href: el.href,
    text: (el.textContent || '').trim(),
    title: el.title || '',
    className: typeof el.className === 'string' ? el.className : '',
    id: el.id || '',
    rect: { x: r.x, y: r.y, width: r.width, height: r.height },
  };
})
"#;

/// One control as reported by the inspection scripts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawControl {
    pub tag: String,
    pub name: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub placeholder: String,
    pub text: String,
    pub value: String,
    pub href: String,
    pub title: String,
    pub class_name: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawForm {
    pub fields: Vec<RawControl>,
    pub buttons: Vec<RawControl>,
}

const EXCLUDED_SCHEMES: [&str; 3] = ["javascript:", "mailto:", "tel:"];

async fn run_script<T: for<'de> Deserialize<'de>>(session: &Session, script: &str) -> Result<T> {
    let value = session.page()?.evaluate(script, Value::Null).await?;
    let value = if value.is_null() {
        Value::Array(vec![])
    } else {
        value
    };
    Ok(serde_json::from_value(value)?)
}

/// Inspect every form on the page: visible fields and submit controls.
pub async fn snapshot_forms(session: &Session) -> Result<FormSnapshot> {
    let started = Instant::now();
    info!("Analyzing forms using DOM inspection");

    let raw: Vec<RawForm> = run_script(session, FORMS_SCRIPT).await?;
    let snapshot = forms_from_raw(raw);

    info!(
        tool = "analyze_form_dom",
        duration_ms = started.elapsed().as_millis() as u64,
        forms_found = snapshot.forms_found,
        "completed"
    );
    Ok(snapshot)
}

pub fn forms_from_raw(raw: Vec<RawForm>) -> FormSnapshot {
    let forms: Vec<Form> = raw
        .into_iter()
        .enumerate()
        .map(|(index, form)| Form {
            index,
            fields: form
                .fields
                .into_iter()
                .filter(|f| f.rect.is_visible())
                .map(field_from_raw)
                .collect(),
            buttons: form
                .buttons
                .into_iter()
                .filter(|b| b.rect.is_visible())
                .map(button_from_raw)
                .collect(),
        })
        .collect();

    FormSnapshot {
        forms_found: forms.len(),
        forms,
    }
}

fn field_from_raw(raw: RawControl) -> Field {
    let name = if !raw.name.is_empty() { raw.name } else { raw.id };
    let kind = if !raw.kind.is_empty() { raw.kind } else { raw.tag };
    Field {
        name,
        kind,
        placeholder: raw.placeholder,
        coordinates: raw.rect.rounded_center(),
    }
}

fn button_from_raw(raw: RawControl) -> Button {
    let text = match raw.text.trim() {
        "" => raw.value,
        t => t.to_string(),
    };
    let kind = if raw.kind.is_empty() {
        "button".to_string()
    } else {
        raw.kind
    };
    Button {
        text,
        kind,
        coordinates: raw.rect.rounded_center(),
    }
}

/// Score clickable elements against the task; at most five survive.
pub async fn snapshot_interactive_elements(
    session: &Session,
    task: &str,
) -> Result<Vec<ScoredElement>> {
    let started = Instant::now();
    info!("Finding relevant elements");

    let raw: Vec<RawControl> = run_script(session, ELEMENTS_SCRIPT).await?;
    let elements = scorer::rank_elements(task, element_candidates(raw));

    info!(
        tool = "find_relevant_elements",
        duration_ms = started.elapsed().as_millis() as u64,
        elements_found = elements.len(),
        "completed"
    );
    Ok(elements)
}

pub fn element_candidates(raw: Vec<RawControl>) -> Vec<ElementCandidate> {
    raw.into_iter()
        .filter(|c| c.rect.is_visible())
        .map(|c| ElementCandidate {
            coordinates: c.rect.rounded_center(),
            text: c.text,
            kind: c.kind,
        })
        .collect()
}

/// Rank the page's links for the task; at most ten are reported.
pub async fn snapshot_links(session: &Session, task: &str) -> Result<LinkReport> {
    let started = Instant::now();
    info!(task, "Checking links on current page");

    let raw: Vec<RawControl> = run_script(session, LINKS_SCRIPT).await?;
    let total = raw.len();
    let report = scorer::rank_links(task, total, link_candidates(raw));

    info!(
        tool = "check_links",
        duration_ms = started.elapsed().as_millis() as u64,
        total_links = report.total_links,
        relevant_links = report.relevant_links.iter().filter(|l| l.is_relevant).count(),
        top_relevance = report.relevant_links.first().map(|l| l.relevance_score).unwrap_or(0),
        "completed"
    );
    Ok(report)
}

pub fn link_candidates(raw: Vec<RawControl>) -> Vec<LinkCandidate> {
    raw.into_iter()
        .enumerate()
        .filter(|(_, l)| {
            l.rect.is_visible()
                && !l.text.trim().is_empty()
                && !EXCLUDED_SCHEMES.iter().any(|s| l.href.contains(s))
        })
        .map(|(index, l)| LinkCandidate {
            index,
            coordinates: l.rect.center(),
            href: l.href,
            text: l.text.trim().to_string(),
            title: l.title,
            class_name: l.class_name,
            id: l.id,
        })
        .collect()
}

/// Forms, scored elements and ranked links in one pass.
pub async fn snapshot_page(session: &Session, task: &str) -> Result<PageSnapshot> {
    let forms = snapshot_forms(session).await?.forms;
    let interactive_elements = snapshot_interactive_elements(session, task).await?;
    let links = snapshot_links(session, task).await?.relevant_links;
    Ok(PageSnapshot {
        forms,
        interactive_elements,
        links,
    })
}
