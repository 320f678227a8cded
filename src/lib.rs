//! Task-driven web automation: inspect a page, ask a planner for pointer and
//! keyboard steps, validate them, run them and report what the page says.

pub mod brain;
pub mod config;
pub mod dom;
pub mod driver;
pub mod error;
pub mod executor;
pub mod feedback;
pub mod hands;
pub mod pipeline;
pub mod plan;
pub mod scorer;
pub mod scroll;
pub mod status;
pub mod testing;
pub mod types;

pub use brain::{OpenAiPlanner, Planner};
pub use config::AgentConfig;
pub use driver::{PageDriver, Session};
pub use error::{AgentError, Result, RunFailure};
pub use feedback::{AgentEvent, Feedback};
pub use hands::ChromeDriver;
pub use pipeline::{Controller, RunReport, RunState, Stage};
