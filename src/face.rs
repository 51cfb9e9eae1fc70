use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::gate::UserGate;

/// Events streamed to the panel via SSE.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Step { number: usize, description: String },
    StepError { message: String },
    Paused { reason: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    Thinking,
    Ready,
}

impl AgentEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            AgentEvent::Step {
                number,
                description,
            } => Event::default().event("step").data(format!(
                "{{\"number\":{},\"description\":{}}}",
                number,
                serde_json::json!(description)
            )),
            AgentEvent::StepError { message } => Event::default()
                .event("step_error")
                .data(format!("{{\"message\":{}}}", serde_json::json!(message))),
            AgentEvent::Paused { reason } => Event::default()
                .event("paused")
                .data(format!("{{\"reason\":{}}}", serde_json::json!(reason))),
            AgentEvent::TaskComplete { summary } => Event::default()
                .event("task_complete")
                .data(format!("{{\"summary\":{}}}", serde_json::json!(summary))),
            AgentEvent::TaskError { message } => Event::default()
                .event("task_error")
                .data(format!("{{\"message\":{}}}", serde_json::json!(message))),
            AgentEvent::Thinking => Event::default().event("thinking").data("{}"),
            AgentEvent::Ready => Event::default().event("ready").data("{}"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<String>,
    pub event_tx: broadcast::Sender<AgentEvent>,
    pub gate: Arc<UserGate>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Start the panel server on localhost. Returns the shared channels.
pub async fn start_server(
    gate: Arc<UserGate>,
) -> (mpsc::Receiver<String>, broadcast::Sender<AgentEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
        gate,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/resume", post(resume_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    // Try port 3000, fall back to 3001-3009 if in use
    let mut listener = None;
    let mut port = 3000;
    for p in 3000..3010 {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{}", p)).await {
            Ok(l) => {
                listener = Some(l);
                port = p;
                break;
            }
            Err(_) => continue,
        }
    }
    let listener =
        listener.expect("Could not bind to any port 3000-3009. Kill the old agent first.");

    eprintln!("[Face] Panel running at http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("[Face] Server stopped: {}", e);
        }
    });

    (cmd_rx, event_tx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> &'static str {
    eprintln!("[Face] POST /command: {}", payload.command);
    let _ = state.cmd_tx.send(payload.command).await;
    "ok"
}

async fn resume_handler(State(state): State<Arc<AppState>>) -> &'static str {
    eprintln!("[Face] POST /resume");
    state.gate.resume();
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>webautomate</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #101418;
    color: #d7dde3;
    font-family: system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 18px 28px;
    border-bottom: 1px solid #1d242c;
    font-size: 18px;
    font-weight: 600;
  }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 760px;
    width: 100%;
    margin: 0 auto;
    padding: 20px 28px;
    gap: 14px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry {
    padding: 8px 12px;
    border-radius: 6px;
    font-size: 14px;
    line-height: 1.5;
    background: #161c23;
    border-left: 3px solid #3d4a58;
  }
  .entry.user { border-left-color: #4f86f7; }
  .entry.step { border-left-color: #2f9e6e; font-family: ui-monospace, monospace; font-size: 13px; }
  .entry.error { border-left-color: #d64545; color: #f0a3a3; }
  .entry.done { border-left-color: #2f9e6e; color: #9fdcbd; }
  .entry.paused { border-left-color: #e2a633; color: #f2d48f; }
  #pause-bar {
    display: none;
    padding: 12px 16px;
    border-radius: 6px;
    background: #2b2414;
    border: 1px solid #e2a633;
    align-items: center;
    justify-content: space-between;
    gap: 12px;
  }
  #pause-bar.active { display: flex; }
  .row { display: flex; gap: 8px; }
  #goal {
    flex: 1;
    background: #161c23;
    border: 1px solid #2a333d;
    border-radius: 6px;
    padding: 10px 14px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #goal:disabled { opacity: 0.5; }
  button {
    background: #4f86f7;
    color: #fff;
    border: none;
    border-radius: 6px;
    padding: 10px 20px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button.warn { background: #e2a633; color: #1a1a1a; }
  button:disabled { background: #2a333d; cursor: not-allowed; }
</style>
</head>
<body>
  <header>webautomate</header>
  <div class="main">
    <div id="log"></div>
    <div id="pause-bar">
      <span id="pause-reason"></span>
      <button class="warn" onclick="resume()">I'm done — resume</button>
    </div>
    <div class="row">
      <input type="text" id="goal" placeholder="What should the agent do?" autofocus />
      <button id="send" onclick="send()">Run</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const goal = document.getElementById('goal');
  const sendBtn = document.getElementById('send');
  const pauseBar = document.getElementById('pause-bar');
  const pauseReason = document.getElementById('pause-reason');
  let busy = false;

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function esc(s) { return s.replace(/</g, '&lt;'); }

  function setBusy(b) {
    busy = b;
    goal.disabled = b;
    sendBtn.disabled = b;
    if (!b) goal.focus();
  }

  async function send() {
    const text = goal.value.trim();
    if (!text || busy) return;
    goal.value = '';
    addEntry('user', '<strong>Goal:</strong> ' + esc(text));
    setBusy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  }

  async function resume() {
    pauseBar.classList.remove('active');
    await fetch('/resume', {method: 'POST'});
  }

  goal.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');

  es.addEventListener('step', e => {
    const d = JSON.parse(e.data);
    addEntry('step', 'Step ' + d.number + ': ' + esc(d.description));
  });
  es.addEventListener('step_error', e => {
    addEntry('error', '<strong>Error:</strong> ' + esc(JSON.parse(e.data).message));
  });
  es.addEventListener('paused', e => {
    const d = JSON.parse(e.data);
    addEntry('paused', '<strong>Paused:</strong> ' + esc(d.reason));
    pauseReason.textContent = d.reason;
    pauseBar.classList.add('active');
  });
  es.addEventListener('task_complete', e => {
    addEntry('done', '<strong>Done:</strong> ' + esc(JSON.parse(e.data).summary));
    setBusy(false);
  });
  es.addEventListener('task_error', e => {
    addEntry('error', '<strong>Task failed:</strong> ' + esc(JSON.parse(e.data).message));
    setBusy(false);
  });
  es.addEventListener('thinking', () => addEntry('step', 'Thinking...'));
  es.addEventListener('ready', () => { pauseBar.classList.remove('active'); setBusy(false); });

  addEntry('done', 'Agent ready. Type a goal to begin.');
</script>
</body>
</html>
"##;
