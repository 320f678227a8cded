mod face;

use std::path::PathBuf;
use std::sync::Arc;

use agentic_rpa::pipeline::url_from_task;
use agentic_rpa::types::excerpt;
use agentic_rpa::{
    AgentConfig, AgentError, AgentEvent, ChromeDriver, Controller, Feedback, OpenAiPlanner,
    RunFailure, RunReport, Session, Stage,
};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agent", version, about = "Task-driven browser automation")]
struct Cli {
    /// Config file (default: <config dir>/agentic-rpa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one task and exit
    Run(RunArgs),
    /// Serve the web control page and run submitted tasks one after another
    Serve {
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Page to start from; defaults to the first http(s) URL in the task
    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    headless: bool,

    /// Draw progress and clicks inside the page
    #[arg(long)]
    overlay: bool,

    /// Rank the page's links and hand them to the planner
    #[arg(long)]
    check_links: bool,

    /// Wait and scroll before inspecting, for lazily loaded pages
    #[arg(long)]
    scroll: bool,

    #[arg(required = true, num_args = 1..)]
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run(args) => run_once(config, args).await,
        Command::Serve { port } => serve(config, port).await,
    }
}

async fn run_once(mut config: AgentConfig, args: RunArgs) -> Result<()> {
    config.browser.headless |= args.headless;
    config.overlay |= args.overlay;
    if args.check_links {
        config.pipeline.enable(Stage::CheckLinks);
    }
    if args.scroll {
        config.pipeline.enable(Stage::WaitAndScroll);
    }
    config.validate()?;

    let task = args.task.join(" ");
    let url = args
        .url
        .or_else(|| url_from_task(&task))
        .ok_or_else(|| AgentError::Config("no --url given and none found in the task".into()))?;

    let (event_tx, _) = broadcast::channel(64);
    spawn_event_log(&event_tx);
    let feedback = Feedback::new(event_tx, config.overlay);
    let planner = Arc::new(OpenAiPlanner::new(config.planner.clone())?);
    let mut session = Session::new(ChromeDriver::new(config.browser.clone()));
    let controller = Controller::new(config, planner, feedback);

    match controller
        .run_until(&mut session, &task, &url, ctrl_c())
        .await
    {
        Some(Ok(report)) => {
            print_summary(&report);
            Ok(())
        }
        Some(Err(failure)) => {
            print_failure(&failure);
            Err(failure.into())
        }
        None => anyhow::bail!("interrupted"),
    }
}

async fn serve(config: AgentConfig, port: u16) -> Result<()> {
    config.validate()?;
    let (event_tx, _) = broadcast::channel(64);
    let mut commands = face::start_server(port, event_tx.clone()).await?;

    let browser = config.browser.clone();
    let planner = Arc::new(OpenAiPlanner::new(config.planner.clone())?);
    let feedback = Feedback::new(event_tx, config.overlay);
    let controller = Controller::new(config, planner, feedback);
    info!("Waiting for commands...");

    while let Some(command) = commands.recv().await {
        let url = command.url.clone().or_else(|| url_from_task(&command.task));
        match url {
            Some(url) => {
                let mut session = Session::new(ChromeDriver::new(browser.clone()));
                match controller
                    .run_until(&mut session, &command.task, &url, ctrl_c())
                    .await
                {
                    Some(Ok(report)) => print_summary(&report),
                    Some(Err(failure)) => print_failure(&failure),
                    None => break,
                }
            }
            None => controller.feedback().emit(AgentEvent::TaskError {
                message: "No URL given and none found in the task".into(),
            }),
        }
        controller.feedback().emit(AgentEvent::Ready);
    }

    Ok(())
}

/// Resolves on Ctrl-C; never, if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

fn spawn_event_log(events: &broadcast::Sender<AgentEvent>) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let AgentEvent::Progress {
                percent, description, ..
            } = &event
            {
                info!("[{:>3}%] {}", percent, description);
            } else {
                debug!(event = event.name(), "{:?}", event);
            }
        }
    });
}

fn print_summary(report: &RunReport) {
    println!("\n=== Run summary ===");
    println!("Task:           {}", excerpt(&report.task, 60));
    println!("URL:            {}", report.url);
    if let Some(analysis) = &report.analysis {
        println!("Analysis:       {}", analysis);
    }
    println!("Agent steps:    {}", report.turns);
    println!("Forms found:    {}", report.forms_found);
    println!(
        "Actions:        {} executed, {} skipped",
        report.steps_executed, report.steps_skipped
    );
    if let Some(links) = &report.links {
        println!("Links:          {}", links.summary);
    }
    if let Some(metrics) = &report.metrics {
        println!(
            "Page:           {} px tall, {} elements",
            metrics.scroll_height, metrics.visible_elements
        );
    }
    match &report.status {
        Some(status) => println!(
            "Status:         {} (success: {}, error: {}, url changed: {})",
            status.url, status.has_success_message, status.has_error_message, status.url_changed
        ),
        None => println!("Status:         not verified"),
    }
    println!("Duration:       {}ms", report.elapsed_ms);
    if let Ok(json) = serde_json::to_string(report) {
        debug!(report = %json, "Run report");
    }
}

fn print_failure(failure: &RunFailure) {
    eprintln!("\n=== Failure analysis ===");
    eprintln!("Task:      {}", failure.task);
    eprintln!("Stopped:   {:?}", failure.state);
    eprintln!("Duration:  {}ms", failure.elapsed_ms);
    eprintln!("Kind:      {}", failure.source.kind());
    eprintln!("Error:     {}", failure.source);
}
