//! The run state machine: a configurable list of stages driven against one
//! [`Session`], bounded by a turn budget.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::brain::Planner;
use crate::config::AgentConfig;
use crate::driver::Session;
use crate::error::{AgentError, Result, RunFailure};
use crate::executor;
use crate::feedback::{AgentEvent, Feedback};
use crate::scroll::{self, PageMetrics};
use crate::types::{
    ActionPlan, ExecutionStatus, ExecutionSummary, FormSnapshot, LinkReport, ScoredElement,
    TaskContext,
};
use crate::{dom, plan, status};

/// One configurable step of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AnalyzeTask,
    OpenBrowser,
    InspectForms,
    FallbackClick,
    CheckLinks,
    WaitAndScroll,
    Plan,
    Execute,
    VerifyStatus,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::AnalyzeTask => "analyze_task",
            Stage::OpenBrowser => "open_browser",
            Stage::InspectForms => "inspect_forms",
            Stage::FallbackClick => "fallback_click",
            Stage::CheckLinks => "check_links",
            Stage::WaitAndScroll => "wait_and_scroll",
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::VerifyStatus => "verify_status",
        }
    }

    /// Stages that need a loaded page.
    pub fn touches_page(&self) -> bool {
        !matches!(self, Stage::AnalyzeTask | Stage::OpenBrowser)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    TaskAnalyzed,
    BrowserOpened,
    FormsInspected,
    ElementsDiscovered,
    ElementClicked,
    LinksChecked,
    PageSettled,
    PlanReady,
    PlanValidated,
    PlanExecuted,
    StatusChecked,
    Done,
    Aborted,
}

/// What a successful run did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub task: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    pub forms_found: usize,
    pub fallback_taken: bool,
    pub steps_executed: usize,
    pub steps_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<LinkReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    pub states: Vec<RunState>,
    pub turns: u32,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Single line for logs and the `task_complete` event.
    pub fn summary(&self) -> String {
        let outcome = match &self.status {
            Some(s) if s.has_error_message => "page reports an error",
            Some(s) if s.has_success_message => "page reports success",
            Some(s) if s.url_changed => "page moved on",
            Some(_) => "no visible change",
            None => "not verified",
        };
        format!(
            "{} steps executed, {} skipped in {}ms ({})",
            self.steps_executed, self.steps_skipped, self.elapsed_ms, outcome
        )
    }
}

/// Drives one run at a time through the configured stages.
pub struct Controller {
    config: AgentConfig,
    planner: Arc<dyn Planner>,
    feedback: Feedback,
}

impl Controller {
    pub fn new(config: AgentConfig, planner: Arc<dyn Planner>, feedback: Feedback) -> Self {
        Self {
            config,
            planner,
            feedback,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn feedback(&self) -> &Feedback {
        &self.feedback
    }

    /// Run `task` against `url`, then close the session whatever happened.
    pub async fn run(
        &self,
        session: &mut Session,
        task: &str,
        url: &str,
    ) -> std::result::Result<RunReport, RunFailure> {
        let mut run = Run::new(task, url, self.config.max_turns);
        info!(task = %run.ctx.excerpt(), url, "Starting run");
        self.feedback.emit(AgentEvent::RunStarted {
            task: task.to_string(),
            url: url.to_string(),
        });

        let outcome = self.drive(&mut run, session).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Browser did not close cleanly");
        }

        match outcome {
            Ok(()) => {
                let report = run.into_report();
                info!(
                    turns = report.turns,
                    duration_ms = report.elapsed_ms,
                    "Run finished: {}",
                    report.summary()
                );
                self.feedback.emit(AgentEvent::TaskComplete {
                    summary: report.summary(),
                });
                Ok(report)
            }
            Err(source) => {
                let failure = RunFailure {
                    state: run.state,
                    task: run.ctx.excerpt(),
                    elapsed_ms: run.ctx.elapsed_ms(),
                    source,
                };
                error!(
                    state = ?failure.state,
                    kind = failure.source.kind(),
                    duration_ms = failure.elapsed_ms,
                    "Run aborted: {}",
                    failure.source
                );
                self.feedback.emit(AgentEvent::State {
                    name: format!("{:?}", RunState::Aborted),
                });
                self.feedback.emit(AgentEvent::TaskError {
                    message: failure.to_string(),
                });
                Err(failure)
            }
        }
    }

    /// [`Controller::run`], abandoned as soon as `interrupt` resolves. An
    /// interrupted run yields `None` after its session is closed.
    pub async fn run_until(
        &self,
        session: &mut Session,
        task: &str,
        url: &str,
        interrupt: impl Future<Output = ()>,
    ) -> Option<std::result::Result<RunReport, RunFailure>> {
        let outcome = tokio::select! {
            biased;
            _ = interrupt => None,
            outcome = self.run(session, task, url) => Some(outcome),
        };

        if outcome.is_none() {
            warn!("Interrupted, closing browser");
            if let Err(e) = session.close().await {
                warn!(error = %e, "Browser did not close cleanly");
            }
            self.feedback.emit(AgentEvent::TaskError {
                message: "Interrupted".into(),
            });
        }
        outcome
    }

    async fn drive(&self, run: &mut Run, session: &mut Session) -> Result<()> {
        for stage in &self.config.pipeline.stages {
            debug!(%stage, "Entering stage");
            self.run_stage(*stage, run, session).await?;
        }
        self.advance(run, RunState::Done)
    }

    async fn run_stage(&self, stage: Stage, run: &mut Run, session: &mut Session) -> Result<()> {
        match stage {
            Stage::AnalyzeTask => {
                let analysis = self.planner.analyze_task(&run.ctx.task).await?;
                if !analysis.is_empty() {
                    info!("Task analysis: {}", analysis);
                    run.analysis = Some(analysis);
                }
                self.advance(run, RunState::TaskAnalyzed)
            }
            Stage::OpenBrowser => {
                session.open(&run.ctx.url).await?;
                self.feedback
                    .show_progress(session, 20, "Navigation Complete")
                    .await;
                self.advance(run, RunState::BrowserOpened)
            }
            Stage::InspectForms => {
                self.feedback.show_status(session, "Analyzing Page...").await;
                run.forms = dom::snapshot_forms(session).await?;
                self.advance(run, RunState::FormsInspected)
            }
            Stage::FallbackClick => self.fallback_click(run, session).await,
            Stage::CheckLinks => {
                run.links = Some(dom::snapshot_links(session, &run.ctx.task).await?);
                self.advance(run, RunState::LinksChecked)
            }
            Stage::WaitAndScroll => {
                let metrics =
                    scroll::wait_and_scroll(session, &self.config.scroll, &self.feedback).await?;
                run.metrics = Some(metrics);
                self.advance(run, RunState::PageSettled)
            }
            Stage::Plan => self.plan(run, session).await,
            Stage::Execute => {
                let plan = run.plan.as_ref().ok_or_else(|| {
                    AgentError::MalformedPlan("no validated plan to execute".into())
                })?;
                let summary =
                    executor::execute(session, plan, &self.config.timing, &self.feedback).await?;
                run.summary = summary;
                self.advance(run, RunState::PlanExecuted)
            }
            Stage::VerifyStatus => {
                run.status = Some(status::check(session, &self.config.timing).await?);
                self.advance(run, RunState::StatusChecked)
            }
        }
    }

    /// No form on the page: click the best-matching element once and look
    /// again.
    async fn fallback_click(&self, run: &mut Run, session: &mut Session) -> Result<()> {
        if run.forms.forms_found > 0 || run.fallback_taken {
            return Ok(());
        }
        run.fallback_taken = true;
        info!("No forms found, looking for an element that reveals one");

        let elements = dom::snapshot_interactive_elements(session, &run.ctx.task).await?;
        run.elements = Some(elements.clone());
        self.advance(run, RunState::ElementsDiscovered)?;

        let Some(best) = elements.first() else {
            warn!("No relevant element to click, planning without a form");
            return Ok(());
        };

        info!(text = %best.text, score = best.relevance_score, "Clicking most relevant element");
        executor::click_at(session, best.coordinates, &self.config.timing, &self.feedback).await?;
        self.advance(run, RunState::ElementClicked)?;

        run.forms = dom::snapshot_forms(session).await?;
        // Fresh page content, previous element list is stale.
        run.elements = None;
        self.advance(run, RunState::FormsInspected)
    }

    async fn plan(&self, run: &mut Run, session: &mut Session) -> Result<()> {
        let elements = match run.elements.take() {
            Some(elements) => elements,
            None => dom::snapshot_interactive_elements(session, &run.ctx.task).await?,
        };
        let elements_json = match &run.links {
            Some(links) => json!({
                "elements": elements,
                "relevantLinks": links.relevant_links,
            }),
            None => json!(elements),
        }
        .to_string();
        let form_json = serde_json::to_string(&run.forms)?;
        run.elements = Some(elements);

        self.feedback.emit(AgentEvent::Thinking);
        self.feedback.show_status(session, "Planning...").await;
        let raw = self
            .planner
            .generate_plan(&run.ctx.task, &elements_json, &form_json)
            .await?;
        self.advance(run, RunState::PlanReady)?;

        let plan = plan::validate(&raw)?;
        info!(steps = plan.len(), "Plan validated");
        run.plan = Some(plan);
        self.advance(run, RunState::PlanValidated)
    }

    fn advance(&self, run: &mut Run, to: RunState) -> Result<()> {
        if run.ctx.turns >= run.max_turns {
            warn!(max = run.max_turns, next = ?to, "Turn budget exhausted");
            return Err(AgentError::TurnBudgetExceeded { max: run.max_turns });
        }
        run.ctx.turns += 1;
        debug!(from = ?run.state, to = ?to, turn = run.ctx.turns, "Transition");
        run.state = to;
        run.states.push(to);
        self.feedback.emit(AgentEvent::State {
            name: format!("{:?}", to),
        });
        Ok(())
    }
}

/// Mutable state of the run in progress.
struct Run {
    ctx: TaskContext,
    max_turns: u32,
    state: RunState,
    states: Vec<RunState>,
    analysis: Option<String>,
    forms: FormSnapshot,
    fallback_taken: bool,
    elements: Option<Vec<ScoredElement>>,
    links: Option<LinkReport>,
    metrics: Option<PageMetrics>,
    plan: Option<ActionPlan>,
    summary: ExecutionSummary,
    status: Option<ExecutionStatus>,
}

impl Run {
    fn new(task: &str, url: &str, max_turns: u32) -> Self {
        Self {
            ctx: TaskContext::new(task, url),
            max_turns,
            state: RunState::Init,
            states: vec![RunState::Init],
            analysis: None,
            forms: FormSnapshot::default(),
            fallback_taken: false,
            elements: None,
            links: None,
            metrics: None,
            plan: None,
            summary: ExecutionSummary::default(),
            status: None,
        }
    }

    fn into_report(self) -> RunReport {
        RunReport {
            elapsed_ms: self.ctx.elapsed_ms(),
            turns: self.ctx.turns,
            task: self.ctx.task,
            url: self.ctx.url,
            analysis: self.analysis,
            forms_found: self.forms.forms_found,
            fallback_taken: self.fallback_taken,
            steps_executed: self.summary.steps_executed,
            steps_skipped: self.summary.steps_skipped,
            links: self.links,
            metrics: self.metrics,
            status: self.status,
            states: self.states,
        }
    }
}

/// First `http://` or `https://` token in the task text.
pub fn url_from_task(task: &str) -> Option<String> {
    task.split_whitespace()
        .find(|t| t.starts_with("http://") || t.starts_with("https://"))
        .map(|t| {
            t.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ')' | '"' | '\''))
                .to_string()
        })
}
