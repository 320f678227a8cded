use std::convert::Infallible;
use std::sync::Arc;

use agentic_rpa::AgentEvent;
use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// A task submitted from the web page.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub task: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<AgentEvent>,
}

fn to_sse_event(event: &AgentEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|_| Event::default().event(event.name()).data("{}"))
}

/// Serve the control page, `POST /command` and the `/events` stream.
///
/// Binds the first free port in `port..port + 10`. Commands are queued one at
/// a time; the caller runs them.
pub async fn start_server(
    port: u16,
    event_tx: broadcast::Sender<AgentEvent>,
) -> Result<mpsc::Receiver<Command>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(1);

    let state = Arc::new(AppState { cmd_tx, event_tx });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{}", p)).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => debug!(port = p, error = %e, "Port busy"),
        }
    }
    let Some((listener, port)) = bound else {
        anyhow::bail!("Could not bind to any port {}-{}", port, port.saturating_add(9));
    };

    info!("Web UI running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Web server stopped");
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    debug!("GET /");
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Command>,
) -> StatusCode {
    info!(task = %payload.task, url = ?payload.url, "POST /command");
    if payload.task.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    match state.cmd_tx.try_send(payload) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!(error = %e, "Rejecting command, a run is already queued");
            StatusCode::CONFLICT
        }
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Agentic RPA</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif;
    height: 100vh; display: flex; flex-direction: column; }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; align-items: center; gap: 12px; }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; }
  #bar { height: 3px; width: 0; background: linear-gradient(90deg, #ff6b6b, #4ecdc4, #45b7d1); transition: width 0.3s; }
  .main { flex: 1; display: flex; flex-direction: column; max-width: 820px; width: 100%;
    margin: 0 auto; padding: 24px 32px; gap: 12px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; border-left: 3px solid #333; background: #111118; }
  .entry.user { border-color: #6366f1; background: #1a1a2e; }
  .entry.state { border-color: #64748b; color: #94a3b8; font-size: 12px; }
  .entry.step { border-color: #3b82f6; font-family: monospace; }
  .entry.skip { border-color: #f59e0b; color: #fcd34d; }
  .entry.error { border-color: #ef4444; color: #fca5a5; background: #1a0a0a; }
  .entry.done { border-color: #22c55e; color: #86efac; background: #0a1a0a; }
  .input-area { display: flex; gap: 8px; }
  input { background: #111118; border: 1px solid #222; border-radius: 6px; padding: 10px 14px; color: #fff; font-size: 15px; }
  #task { flex: 2; }
  #url { flex: 1; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 6px; padding: 10px 20px; font-weight: 600; cursor: pointer; }
  button:disabled, input:disabled { opacity: 0.5; cursor: not-allowed; }
</style>
</head>
<body>
  <header><div class="dot" id="dot"></div><h1>Agentic RPA</h1></header>
  <div id="bar"></div>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="task" placeholder="What should the agent do?" autofocus />
      <input type="text" id="url" placeholder="https://..." />
      <button id="send" onclick="send()">Run</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const task = document.getElementById('task');
  const url = document.getElementById('url');
  const sendBtn = document.getElementById('send');
  const bar = document.getElementById('bar');
  const esc = (s) => String(s).replace(/</g, '&lt;');

  function add(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    task.disabled = url.disabled = sendBtn.disabled = b;
    document.getElementById('dot').className = b ? 'dot busy' : 'dot';
    if (!b) { bar.style.width = '0'; task.focus(); }
  }

  async function send() {
    const text = task.value.trim();
    if (!text) return;
    setBusy(true);
    const res = await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({task: text, url: url.value.trim() || null}),
    });
    if (!res.ok) { add('error', 'Rejected (' + res.status + ')'); setBusy(false); return; }
    task.value = '';
  }

  task.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('run_started', d => add('user', '<strong>Task:</strong> ' + esc(d.task) + ' @ ' + esc(d.url)));
  on('state', d => add('state', esc(d.name)));
  on('thinking', () => add('state', 'Planning...'));
  on('progress', d => { bar.style.width = d.percent + '%'; });
  on('step', d => add('step', 'Step ' + d.step + ': ' + esc(d.description)));
  on('step_skipped', d => add('skip', 'Skipped step ' + d.step + ' (' + esc(d.action) + ')'));
  on('step_error', d => add('error', esc(d.message)));
  on('task_complete', d => { add('done', '<strong>Done:</strong> ' + esc(d.summary)); });
  on('task_error', d => { add('error', '<strong>Failed:</strong> ' + esc(d.message)); });
  on('ready', () => setBusy(false));

  add('done', 'Agent ready. Describe a task and the page to run it on.');
</script>
</body>
</html>
"##;
