//! Keyword heuristics ranking page elements and links against a task.
//!
//! Scores are additive: every satisfied rule adds its weight independently,
//! and the total is floored at zero. Ranking is a stable descending sort, so
//! equal scores keep discovery order.

use crate::types::{
    Coordinates, Link, LinkReport, ScoredElement, ELEMENT_TEXT_MAX_CHARS, MAX_RELEVANT_LINKS,
    MAX_SCORED_ELEMENTS, RELEVANT_LINK_THRESHOLD,
};

/// A visible clickable element (`a`, `button`, `input[type=submit]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCandidate {
    pub text: String,
    pub kind: String,
    pub coordinates: Coordinates,
}

/// A visible link whose href passed the scheme filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinkCandidate {
    pub index: usize,
    pub href: String,
    pub text: String,
    pub title: String,
    pub class_name: String,
    pub id: String,
    pub coordinates: Coordinates,
}

const LINK_KEYWORDS: [&str; 10] = [
    "sign", "register", "login", "join", "create", "account", "form", "contact", "search",
    "submit",
];

pub fn score_element(task: &str, text: &str, kind: &str) -> u32 {
    let task = task.to_lowercase();
    let text = text.trim().to_lowercase();
    let mut score = 0;

    if task.contains("sign up") && text.contains("sign up") {
        score += 15;
    }
    if task.contains("submit") && kind == "submit" {
        score += 8;
    }
    if task.contains("register") && text.contains("register") {
        score += 10;
    }
    if task.contains("create") && text.contains("create") {
        score += 8;
    }

    score
}

pub fn score_link(task: &str, link: &LinkCandidate) -> u32 {
    let task = task.to_lowercase();
    let text = link.text.to_lowercase();
    let href = link.href.to_lowercase();
    let mut score: i32 = 0;

    for keyword in LINK_KEYWORDS {
        if task.contains(keyword) {
            if text.contains(keyword) {
                score += 10;
            }
            if href.contains(keyword) {
                score += 5;
            }
        }
    }

    if task.contains("signup") || task.contains("sign up") {
        if text.contains("sign") && text.contains("up") {
            score += 15;
        }
        if text.contains("register") {
            score += 12;
        }
        if text.contains("join") {
            score += 10;
        }
    }

    if task.contains("login") || task.contains("log in") {
        if text.contains("log") && text.contains("in") {
            score += 15;
        }
        if text.contains("login") {
            score += 15;
        }
        if text.contains("sign") && text.contains("in") {
            score += 12;
        }
    }

    if task.contains("contact") {
        if text.contains("contact") {
            score += 15;
        }
        if text.contains("support") {
            score += 10;
        }
        if text.contains("help") {
            score += 8;
        }
    }

    if text.contains("button") || link.class_name.contains("btn") {
        score += 3;
    }
    if link.id.contains("submit") || link.class_name.contains("submit") {
        score += 5;
    }

    let len = text.chars().count();
    if !(2..=50).contains(&len) {
        score -= 2;
    }

    score.max(0) as u32
}

/// Score, drop zero scores, and keep the best [`MAX_SCORED_ELEMENTS`].
pub fn rank_elements(task: &str, candidates: Vec<ElementCandidate>) -> Vec<ScoredElement> {
    let mut scored: Vec<ScoredElement> = candidates
        .into_iter()
        .filter_map(|c| {
            let relevance_score = score_element(task, &c.text, &c.kind);
            (relevance_score > 0).then(|| ScoredElement {
                text: c.text.trim().chars().take(ELEMENT_TEXT_MAX_CHARS).collect(),
                kind: c.kind,
                coordinates: c.coordinates,
                relevance_score,
            })
        })
        .collect();

    scored.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    scored.truncate(MAX_SCORED_ELEMENTS);
    scored
}

/// Score visible links and build the report handed to the planner.
///
/// `total_links` counts every `a[href]` on the page, before filtering.
pub fn rank_links(task: &str, total_links: usize, candidates: Vec<LinkCandidate>) -> LinkReport {
    let visible = candidates.len();
    let mut scored: Vec<Link> = candidates
        .into_iter()
        .map(|c| {
            let relevance_score = score_link(task, &c);
            Link {
                index: c.index,
                href: c.href,
                text: c.text,
                title: c.title,
                coordinates: c.coordinates,
                class_name: c.class_name,
                id: c.id,
                relevance_score,
                is_relevant: relevance_score > RELEVANT_LINK_THRESHOLD,
            }
        })
        .filter(|l| l.relevance_score > 0)
        .collect();

    scored.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));

    let relevant = scored.iter().filter(|l| l.is_relevant).count();
    let top = scored.first().map(|l| l.relevance_score).unwrap_or(0);
    scored.truncate(MAX_RELEVANT_LINKS);

    LinkReport {
        total_links,
        relevant_links: scored,
        summary: format!(
            "Found {} relevant links out of {} visible links. Top relevance score: {}",
            relevant, visible, top
        ),
    }
}
