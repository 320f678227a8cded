//! Runs a validated plan against the page, one step at a time.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::TimingConfig;
use crate::driver::Session;
use crate::error::{AgentError, Result};
use crate::feedback::{AgentEvent, Feedback};
use crate::types::{ActionKind, ActionPlan, ActionStep, Coordinates, ExecutionSummary};

/// Move, click, then let the page react.
pub async fn click_at(
    session: &Session,
    at: Coordinates,
    timing: &TimingConfig,
    feedback: &Feedback,
) -> Result<()> {
    let page = session.page()?;
    feedback.show_click(session, at).await;
    feedback
        .show_status(session, &format!("Clicking at {}", at))
        .await;

    page.move_to(at).await?;
    page.click_at(at, 1).await?;
    page.wait(timing.click_settle()).await;
    Ok(())
}

/// Focus the field, select whatever it holds, delete it and type `value`.
pub async fn fill_at(
    session: &Session,
    at: Coordinates,
    value: &str,
    timing: &TimingConfig,
    feedback: &Feedback,
) -> Result<()> {
    let page = session.page()?;
    feedback.show_click(session, at).await;
    feedback
        .show_status(session, &format!("Filling field with \"{}\"", value))
        .await;

    page.click_at(at, 1).await?;
    page.wait(timing.fill_focus()).await;

    page.click_at(at, 3).await?;
    page.wait(timing.fill_select()).await;
    page.press_key("Delete").await?;

    page.type_text(value, timing.keystroke()).await?;
    page.wait(timing.fill_settle()).await;
    Ok(())
}

pub async fn navigate(session: &Session, url: &str, feedback: &Feedback) -> Result<()> {
    let page = session.page()?;
    feedback
        .show_status(session, &format!("Navigating to {}", url))
        .await;
    page.navigate(url).await
}

/// Execute `plan` strictly in array order.
///
/// The first failing step aborts the run; steps already performed are not
/// undone. Unknown action kinds are skipped with a warning.
pub async fn execute(
    session: &Session,
    plan: &ActionPlan,
    timing: &TimingConfig,
    feedback: &Feedback,
) -> Result<ExecutionSummary> {
    let started = Instant::now();
    session.page()?;
    let total = plan.len();
    info!("Starting execution of {} actions", total);
    feedback
        .show_progress(session, 0, &format!("Executing {} actions...", total))
        .await;

    let mut summary = ExecutionSummary::default();

    for (i, step) in plan.steps.iter().enumerate() {
        let position = i + 1;
        let percent = (i * 100 / total.max(1)) as u8;
        let label = step.label();

        info!(step = position, action = %step.action, "Executing step");
        feedback.emit(AgentEvent::Progress {
            percent,
            step: position,
            total,
            description: label.clone(),
        });
        feedback
            .show_progress(
                session,
                percent,
                &format!("Step {}/{}: {}", position, total, step.action),
            )
            .await;

        let ran = run_step(session, step, timing, feedback)
            .await
            .map_err(|source| {
                let err = AgentError::StepFailed {
                    step: position,
                    action: step.action.to_string(),
                    source: Box::new(source),
                };
                feedback.emit(AgentEvent::StepError {
                    message: err.to_string(),
                });
                err
            })?;

        if ran {
            summary.steps_executed += 1;
            info!(step = position, "Completed step");
            feedback.emit(AgentEvent::StepDone {
                step: position,
                description: label,
            });
        } else {
            summary.steps_skipped += 1;
            warn!(step = position, action = %step.action, "Skipping unknown action");
            feedback.emit(AgentEvent::StepSkipped {
                step: position,
                action: step.action.to_string(),
            });
        }
    }

    feedback
        .show_progress(session, 100, "All actions completed!")
        .await;
    feedback
        .show_status(session, "Execution finished successfully!")
        .await;

    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        tool = "execute_action_plan",
        duration_ms = summary.elapsed_ms,
        steps_executed = summary.steps_executed,
        steps_skipped = summary.steps_skipped,
        "completed"
    );
    Ok(summary)
}

/// Returns `false` when the step was not recognized and nothing happened.
async fn run_step(
    session: &Session,
    step: &ActionStep,
    timing: &TimingConfig,
    feedback: &Feedback,
) -> Result<bool> {
    match &step.action {
        ActionKind::Click => {
            click_at(session, coordinates(step)?, timing, feedback).await?;
        }
        ActionKind::Fill => {
            fill_at(session, coordinates(step)?, &step.data, timing, feedback).await?;
        }
        ActionKind::Navigate => {
            navigate(session, &step.data, feedback).await?;
        }
        ActionKind::Unknown(_) => return Ok(false),
    }
    Ok(true)
}

fn coordinates(step: &ActionStep) -> Result<Coordinates> {
    step.coordinates.ok_or_else(|| {
        AgentError::MalformedPlan(format!("{} step without coordinates", step.action))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan;
    use crate::testing::{DriverCall, ScriptedPage};

    async fn session_on(page: &ScriptedPage) -> Session {
        let mut session = Session::new(page.clone());
        session.open("https://x.test/signup").await.unwrap();
        session
    }

    fn actions_after_open(page: &ScriptedPage) -> Vec<DriverCall> {
        page.calls().into_iter().skip(2).collect()
    }

    #[tokio::test]
    async fn test_click_and_fill_sequence() {
        let page = ScriptedPage::new();
        let session = session_on(&page).await;
        let plan = plan::validate(
            r#"{"actions":[{"step":1,"action":"click","coordinates":{"x":10,"y":20}},{"step":2,"action":"fill","coordinates":{"x":30,"y":40},"data":"hello"}]}"#,
        )
        .unwrap();

        let summary = execute(&session, &plan, &TimingConfig::default(), &Feedback::detached())
            .await
            .unwrap();
        assert_eq!(summary.steps_executed, 2);
        assert_eq!(summary.steps_skipped, 0);

        let a = Coordinates::new(10.0, 20.0);
        let b = Coordinates::new(30.0, 40.0);
        assert_eq!(
            actions_after_open(&page),
            vec![
                DriverCall::MoveTo(a),
                DriverCall::Click { at: a, count: 1 },
                DriverCall::Wait(300),
                DriverCall::Click { at: b, count: 1 },
                DriverCall::Wait(50),
                DriverCall::Click { at: b, count: 3 },
                DriverCall::Wait(20),
                DriverCall::PressKey("Delete".into()),
                DriverCall::Type {
                    text: "hello".into(),
                    delay_ms: 50
                },
                DriverCall::Wait(100),
            ]
        );
    }

    #[tokio::test]
    async fn test_array_order_wins_over_step_numbers() {
        let page = ScriptedPage::new();
        let session = session_on(&page).await;
        let plan = plan::validate(
            r#"[{"step":3,"action":"click","coordinates":{"x":1,"y":1}},
                {"step":1,"action":"click","coordinates":{"x":2,"y":2}},
                {"step":2,"action":"click","coordinates":{"x":3,"y":3}}]"#,
        )
        .unwrap();

        execute(&session, &plan, &TimingConfig::default(), &Feedback::detached())
            .await
            .unwrap();

        let clicked: Vec<f64> = page
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Click { at, .. } => Some(at.x),
                _ => None,
            })
            .collect();
        assert_eq!(clicked, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_navigate_step() {
        let page = ScriptedPage::new();
        let session = session_on(&page).await;
        let plan = plan::validate(r#"[{"action":"navigate","data":"https://x.test/next"}]"#).unwrap();

        execute(&session, &plan, &TimingConfig::default(), &Feedback::detached())
            .await
            .unwrap();
        assert_eq!(
            actions_after_open(&page),
            vec![DriverCall::Navigate("https://x.test/next".into())]
        );
        assert_eq!(page.url(), "https://x.test/next");
    }

    #[tokio::test]
    async fn test_unknown_actions_are_skipped() {
        let page = ScriptedPage::new();
        let session = session_on(&page).await;
        let feedback = Feedback::detached();
        let mut rx = feedback.subscribe();
        let plan = plan::validate(
            r#"[{"action":"hover","coordinates":{"x":1,"y":1}},{"action":"click","coordinates":{"x":2,"y":2}}]"#,
        )
        .unwrap();

        let summary = execute(&session, &plan, &TimingConfig::default(), &feedback)
            .await
            .unwrap();
        assert_eq!(summary.steps_executed, 1);
        assert_eq!(summary.steps_skipped, 1);

        let mut skipped = false;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::StepSkipped { step, action } = event {
                assert_eq!(step, 1);
                assert_eq!(action, "hover");
                skipped = true;
            }
        }
        assert!(skipped);
    }

    #[tokio::test]
    async fn test_failure_aborts_without_rollback() {
        let page = ScriptedPage::new().fail_navigation_to("https://broken.test");
        let session = session_on(&page).await;
        let plan = plan::validate(
            r#"[{"action":"click","coordinates":{"x":1,"y":1}},
                {"action":"navigate","data":"https://broken.test"},
                {"action":"click","coordinates":{"x":9,"y":9}}]"#,
        )
        .unwrap();

        let err = execute(&session, &plan, &TimingConfig::default(), &Feedback::detached())
            .await
            .unwrap_err();
        match err {
            AgentError::StepFailed { step, action, source } => {
                assert_eq!(step, 2);
                assert_eq!(action, "navigate");
                assert!(matches!(*source, AgentError::NavigationFailure { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        let clicks = page
            .calls()
            .iter()
            .filter(|c| matches!(c, DriverCall::Click { .. }))
            .count();
        assert_eq!(clicks, 1);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let page = ScriptedPage::new();
        let session = session_on(&page).await;
        let feedback = Feedback::detached();
        let mut rx = feedback.subscribe();
        let plan = plan::validate(
            r#"[{"action":"click","coordinates":{"x":1,"y":1},"description":"Open form"},
                {"action":"click","coordinates":{"x":2,"y":2}}]"#,
        )
        .unwrap();

        execute(&session, &plan, &TimingConfig::default(), &feedback)
            .await
            .unwrap();

        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::Progress { percent, description, .. } = event {
                progress.push((percent, description));
            }
        }
        assert_eq!(
            progress,
            vec![(0, "click: Open form".to_string()), (50, "click".to_string())]
        );
    }

    #[tokio::test]
    async fn test_execute_requires_page() {
        let session = Session::new(ScriptedPage::new());
        let plan = plan::validate(r#"[{"action":"click","coordinates":{"x":1,"y":1}}]"#).unwrap();
        let err = execute(&session, &plan, &TimingConfig::default(), &Feedback::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::BrowserNotInitialized));
    }
}
