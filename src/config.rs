//! Run configuration.
//!
//! Loaded from TOML (explicit path, then `<config_dir>/agentic-rpa/config.toml`,
//! then built-in defaults). Every field is optional in the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::pipeline::Stage;

pub const DEFAULT_MAX_TURNS: u32 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on pipeline state transitions per run.
    pub max_turns: u32,
    /// Draw progress bar, status badge and click ripples inside the page.
    pub overlay: bool,
    pub browser: BrowserConfig,
    pub timing: TimingConfig,
    pub scroll: ScrollConfig,
    pub planner: PlannerConfig,
    pub pipeline: PipelineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            overlay: false,
            browser: BrowserConfig::default(),
            timing: TimingConfig::default(),
            scroll: ScrollConfig::default(),
            planner: PlannerConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub chrome_path: Option<PathBuf>,
    /// DevTools endpoint of an already running Chrome, tried before launching.
    pub attach_url: Option<String>,
    pub idle_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            window_width: 1200,
            window_height: 800,
            chrome_path: None,
            attach_url: None,
            idle_timeout_secs: 60,
        }
    }
}

/// Settle delays between simulated interactions, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub click_settle_ms: u64,
    pub fill_focus_ms: u64,
    pub fill_select_ms: u64,
    pub keystroke_ms: u64,
    pub fill_settle_ms: u64,
    pub status_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            click_settle_ms: 300,
            fill_focus_ms: 50,
            fill_select_ms: 20,
            keystroke_ms: 50,
            fill_settle_ms: 100,
            status_settle_ms: 500,
        }
    }
}

impl TimingConfig {
    pub fn click_settle(&self) -> Duration {
        Duration::from_millis(self.click_settle_ms)
    }

    pub fn fill_focus(&self) -> Duration {
        Duration::from_millis(self.fill_focus_ms)
    }

    pub fn fill_select(&self) -> Duration {
        Duration::from_millis(self.fill_select_ms)
    }

    pub fn keystroke(&self) -> Duration {
        Duration::from_millis(self.keystroke_ms)
    }

    pub fn fill_settle(&self) -> Duration {
        Duration::from_millis(self.fill_settle_ms)
    }

    pub fn status_settle(&self) -> Duration {
        Duration::from_millis(self.status_settle_ms)
    }
}

/// Parameters of the `wait_and_scroll` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    pub wait_ms: u64,
    pub times: u32,
    pub delay_ms: u64,
    pub tail_ms: u64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            wait_ms: 3000,
            times: 3,
            delay_ms: 1000,
            tail_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub analysis_max_tokens: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 800,
            analysis_max_tokens: 50,
        }
    }
}

/// Ordered list of stages a run goes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stages: Vec<Stage>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                Stage::AnalyzeTask,
                Stage::OpenBrowser,
                Stage::InspectForms,
                Stage::FallbackClick,
                Stage::Plan,
                Stage::Execute,
                Stage::VerifyStatus,
            ],
        }
    }
}

impl PipelineConfig {
    pub fn contains(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    fn position(&self, stage: Stage) -> Option<usize> {
        self.stages.iter().position(|s| *s == stage)
    }

    /// Adds an optional stage if not present yet: `wait_and_scroll` right
    /// after `open_browser`, anything else right before `plan`.
    pub fn enable(&mut self, stage: Stage) {
        if self.contains(stage) {
            return;
        }
        let at = match stage {
            Stage::WaitAndScroll => self.position(Stage::OpenBrowser).map(|i| i + 1),
            _ => self.position(Stage::Plan),
        };
        match at {
            Some(at) => self.stages.insert(at, stage),
            None => self.stages.push(stage),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].contains(stage) {
                return Err(AgentError::Config(format!("stage '{}' listed twice", stage)));
            }
        }

        let required = [Stage::OpenBrowser, Stage::InspectForms, Stage::Plan, Stage::Execute];
        for stage in required {
            if !self.contains(stage) {
                return Err(AgentError::Config(format!("missing required stage '{}'", stage)));
            }
        }

        let open = self.position(Stage::OpenBrowser).unwrap_or(0);
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.touches_page() && i < open {
                return Err(AgentError::Config(format!(
                    "stage '{}' runs before '{}'",
                    stage,
                    Stage::OpenBrowser
                )));
            }
        }

        let ordered = [
            (Stage::InspectForms, Stage::FallbackClick),
            (Stage::InspectForms, Stage::Plan),
            (Stage::FallbackClick, Stage::Plan),
            (Stage::AnalyzeTask, Stage::Plan),
            (Stage::CheckLinks, Stage::Plan),
            (Stage::WaitAndScroll, Stage::InspectForms),
            (Stage::WaitAndScroll, Stage::CheckLinks),
            (Stage::Plan, Stage::Execute),
            (Stage::Execute, Stage::VerifyStatus),
        ];
        for (before, after) in ordered {
            if let (Some(a), Some(b)) = (self.position(before), self.position(after)) {
                if a > b {
                    return Err(AgentError::Config(format!(
                        "stage '{}' must come before '{}'",
                        before, after
                    )));
                }
            }
        }

        Ok(())
    }
}

impl AgentConfig {
    /// Resolve and load the configuration, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading config");
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agentic-rpa").join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("RPA_PLANNER_MODEL") {
            if !model.trim().is_empty() {
                self.planner.model = model;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(AgentError::Config("max_turns must be positive".into()));
        }
        self.pipeline.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.timing.click_settle_ms, 300);
        assert_eq!(config.timing.status_settle_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config = AgentConfig::from_toml(
            r#"
            max_turns = 20
            [timing]
            keystroke_ms = 5
            [planner]
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.timing.keystroke_ms, 5);
        assert_eq!(config.timing.fill_focus_ms, 50);
        assert_eq!(config.planner.model, "gpt-4o-mini");
        assert_eq!(config.planner.max_tokens, 800);
    }

    #[test]
    fn test_stage_list_from_toml() {
        let config = AgentConfig::from_toml(
            r#"
            [pipeline]
            stages = ["open_browser", "inspect_forms", "check_links", "plan", "execute"]
            "#,
        )
        .unwrap();
        assert!(config.pipeline.contains(Stage::CheckLinks));
        assert!(!config.pipeline.contains(Stage::VerifyStatus));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "overlay = true").unwrap();
        writeln!(file, "[browser]").unwrap();
        writeln!(file, "headless = true").unwrap();

        let config = AgentConfig::load(Some(file.path())).unwrap();
        assert!(config.overlay);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_load_missing_file() {
        let result = AgentConfig::load(Some(Path::new("/nonexistent/agentic-rpa.toml")));
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(AgentConfig::from_toml("max_turns = [unclosed").is_err());
    }

    #[test]
    fn test_zero_turn_budget_rejected() {
        let config = AgentConfig {
            max_turns: 0,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pipeline_requires_core_stages() {
        let pipeline = PipelineConfig {
            stages: vec![Stage::OpenBrowser, Stage::InspectForms, Stage::Execute],
        };
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("plan"));
    }

    #[test]
    fn test_pipeline_rejects_page_stage_before_open() {
        let pipeline = PipelineConfig {
            stages: vec![
                Stage::InspectForms,
                Stage::OpenBrowser,
                Stage::Plan,
                Stage::Execute,
            ],
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_execute_before_plan() {
        let pipeline = PipelineConfig {
            stages: vec![
                Stage::OpenBrowser,
                Stage::InspectForms,
                Stage::Execute,
                Stage::Plan,
            ],
        };
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_pipeline_rejects_duplicates() {
        let mut pipeline = PipelineConfig::default();
        pipeline.stages.push(Stage::Execute);
        assert!(pipeline.validate().is_err());
    }

    #[test]
    fn test_enable_inserts_before_plan() {
        let mut pipeline = PipelineConfig::default();
        pipeline.enable(Stage::CheckLinks);
        pipeline.enable(Stage::CheckLinks);
        let links = pipeline.stages.iter().position(|s| *s == Stage::CheckLinks);
        let plan = pipeline.stages.iter().position(|s| *s == Stage::Plan);
        assert_eq!(links.map(|l| l + 1), plan);
        assert_eq!(pipeline.stages.len(), PipelineConfig::default().stages.len() + 1);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_enable_scroll_goes_before_inspection() {
        let mut pipeline = PipelineConfig::default();
        pipeline.enable(Stage::CheckLinks);
        pipeline.enable(Stage::WaitAndScroll);
        let open = pipeline.stages.iter().position(|s| *s == Stage::OpenBrowser);
        let scroll = pipeline.stages.iter().position(|s| *s == Stage::WaitAndScroll);
        assert_eq!(open.map(|o| o + 1), scroll);
        assert_eq!(pipeline.stages[scroll.unwrap() + 1], Stage::InspectForms);
        assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn test_pipeline_rejects_scroll_after_inspection() {
        let pipeline = PipelineConfig {
            stages: vec![
                Stage::OpenBrowser,
                Stage::InspectForms,
                Stage::WaitAndScroll,
                Stage::Plan,
                Stage::Execute,
            ],
        };
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("wait_and_scroll"));

        let pipeline = PipelineConfig {
            stages: vec![
                Stage::OpenBrowser,
                Stage::WaitAndScroll,
                Stage::InspectForms,
                Stage::CheckLinks,
                Stage::Plan,
                Stage::Execute,
            ],
        };
        assert!(pipeline.validate().is_ok());
    }
}
