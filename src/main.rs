mod actions;
mod brain;
mod dom;
mod face;
mod gate;
mod hands;
mod prompt;
mod types;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use face::AgentEvent;
use gate::{ResumeSource, UserGate};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use types::{ActionOutcome, MAX_STEPS_PER_TASK, Step};

/// LLM-driven browser automation assistant.
#[derive(Parser)]
#[command(name = "webautomate")]
struct Cli {
    /// Where downloads and saved files land (default: the OS Downloads folder).
    #[arg(long)]
    downloads_dir: Option<PathBuf>,

    /// Serve the local web panel instead of the one-shot terminal prompt.
    #[arg(long)]
    serve: bool,

    /// Run Chrome without a visible window.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = hands::Config::resolve(cli.downloads_dir.clone(), cli.headless)?;
    eprintln!(
        "[Agent] Downloads directory: {}",
        config.downloads_dir.display()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let resume_source = if cli.serve {
        ResumeSource::Panel
    } else {
        ResumeSource::Terminal
    };
    let gate = Arc::new(UserGate::new(shutdown_rx, resume_source));

    // Route Ctrl-C through the shutdown channel so a paused agent unblocks
    // and the browser session still gets closed.
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[Agent] Interrupt received, shutting down.");
                let _ = shutdown_tx.send(true);
            }
        });
    }

    if cli.serve {
        run_panel(config, gate, shutdown_tx).await
    } else {
        run_once(config, gate, shutdown_tx).await
    }
}

/// Terminal mode: one goal, one run, then exit.
async fn run_once(
    config: hands::Config,
    gate: Arc<UserGate>,
    shutdown: watch::Sender<bool>,
) -> Result<()> {
    print!("What do you want to do? (type 'exit' to quit)\n> ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let goal = line.trim().to_string();

    if goal.is_empty() || goal.eq_ignore_ascii_case("exit") || goal.eq_ignore_ascii_case("quit") {
        eprintln!("[Agent] Nothing to do.");
        return Ok(());
    }

    // Fail on a missing API key before a browser ever starts.
    let mut brain = brain::Brain::new()?;

    eprintln!("[Agent] Launching Chrome...");
    let cfg = config.clone();
    let mut session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&cfg))
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;

    // From here on, every stdin line is a resume signal for the pause gate.
    spawn_stdin_resume_listener(gate.clone());

    let (event_tx, _keepalive) = broadcast::channel::<AgentEvent>(64);
    let mut shutdown_rx = shutdown.subscribe();

    tokio::select! {
        _ = run_task(&mut session, &mut brain, &config, &goal, &event_tx, &gate) => {}
        _ = shutdown_rx.wait_for(|stop| *stop) => {
            eprintln!("[Agent] Run interrupted.");
        }
    }

    session.close();
    Ok(())
}

/// Panel mode: goals arrive over HTTP, events stream back, looping until
/// shutdown.
async fn run_panel(
    config: hands::Config,
    gate: Arc<UserGate>,
    shutdown: watch::Sender<bool>,
) -> Result<()> {
    let (mut cmd_rx, event_tx) = face::start_server(gate.clone()).await;

    let mut brain = brain::Brain::new()?;

    eprintln!("[Agent] Launching Chrome...");
    let cfg = config.clone();
    let mut session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&cfg))
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;
    eprintln!("[Agent] Ready. Waiting for goals...");

    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            maybe_goal = cmd_rx.recv() => {
                match maybe_goal {
                    Some(goal) => {
                        eprintln!("[Agent] Received goal: '{}'", goal);
                        run_task(&mut session, &mut brain, &config, &goal, &event_tx, &gate).await;
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
        }
    }

    session.close();
    Ok(())
}

/// Forward terminal lines to the pause gate. Runs for the rest of the
/// process; exits on EOF.
fn spawn_stdin_resume_listener(gate: Arc<UserGate>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => gate.resume(),
            }
        }
    });
}

async fn run_task(
    session: &mut hands::BrowserSession,
    brain: &mut brain::Brain,
    config: &hands::Config,
    goal: &str,
    events: &broadcast::Sender<AgentEvent>,
    gate: &Arc<UserGate>,
) {
    brain.start_task(&prompt::build_task_prompt(goal));

    // Always start a new task in a new tab
    if let Err(e) = session.new_tab() {
        eprintln!("[Agent] Warning: Failed to open new tab for task: {}", e);
    }

    let mut step_count = 0;

    loop {
        if step_count >= MAX_STEPS_PER_TASK {
            eprintln!("[Agent] Step limit reached");
            let _ = events.send(AgentEvent::TaskError {
                message: format!("Reached maximum step limit ({})", MAX_STEPS_PER_TASK),
            });
            break;
        }

        eprintln!("[Agent] Asking the LLM for the next step...");
        let _ = events.send(AgentEvent::Thinking);

        let step = match brain.decide_next_step().await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[Agent] LLM error: {:#}", e);
                let _ = events.send(AgentEvent::TaskError {
                    message: format!("{:#}", e),
                });
                break;
            }
        };

        step_count += 1;

        if let Step::Done { ref summary } = step {
            eprintln!("[Agent] Task complete: {}", summary);
            let _ = events.send(AgentEvent::TaskComplete {
                summary: summary.clone(),
            });
            break;
        }

        // Handle NewTab specially (requires session, not just tab)
        if let Step::NewTab = step {
            eprintln!("[Agent] Opening new tab...");
            if let Err(e) = session.new_tab() {
                eprintln!("[Agent] Failed to open new tab: {}", e);
            }
        }

        let description = format!("{:?}", step);
        eprintln!("[Agent] Step {}: {}", step_count, description);
        let _ = events.send(AgentEvent::Step {
            number: step_count,
            description,
        });

        // The pause gate waits on the async side; every other step touches
        // the browser and runs in a blocking task.
        let pause_outcome = if let Step::PauseForUser { ref reason } = step {
            let _ = events.send(AgentEvent::Paused {
                reason: reason.clone(),
            });
            Some(actions::pause_for_user(reason, gate).await)
        } else {
            None
        };

        let tab = session.tab.clone();
        let downloads_dir = config.downloads_dir.clone();
        let step_clone = step.clone();
        let page_state = tokio::task::spawn_blocking(move || {
            let ctx = actions::ActionContext {
                tab: tab.clone(),
                downloads_dir,
            };
            let mut extracted = Vec::new();
            let mut outcome = pause_outcome;
            let mut error = None;

            if outcome.is_none() {
                match execute_step_on_tab(&ctx, &step_clone, &mut extracted, &mut outcome) {
                    Ok(()) => {}
                    Err(e) => error = Some(format!("{:#}", e)),
                }
            }

            let url = dom::get_current_url(&tab).unwrap_or_else(|_| "unknown".into());
            let title = dom::get_page_title(&tab).unwrap_or_else(|_| "untitled".into());
            let dom_snapshot = dom::capture_dom_snapshot(&tab).unwrap_or_else(|_| String::new());

            types::PageState {
                url,
                title,
                dom_snapshot,
                extracted,
                outcome,
                error,
            }
        })
        .await
        .unwrap_or_else(|e| types::PageState {
            url: "unknown".into(),
            title: "untitled".into(),
            dom_snapshot: String::new(),
            extracted: Vec::new(),
            outcome: None,
            error: Some(format!("Step execution panicked: {}", e)),
        });

        if let Some(ref err) = page_state.error {
            eprintln!("[Agent] Step error: {}", err);
            let _ = events.send(AgentEvent::StepError {
                message: err.clone(),
            });
        }
        if let Some(ActionOutcome::Error { ref message }) = page_state.outcome {
            let _ = events.send(AgentEvent::StepError {
                message: message.clone(),
            });
        }

        brain.observe(&page_state);
    }

    let _ = events.send(AgentEvent::Ready);
}

/// Execute a step against the active tab. Runs under spawn_blocking; custom
/// actions report through `outcome`, built-in browser steps through the
/// returned Result.
fn execute_step_on_tab(
    ctx: &actions::ActionContext,
    step: &Step,
    extracted: &mut Vec<types::Extraction>,
    outcome: &mut Option<ActionOutcome>,
) -> Result<()> {
    use std::time::Duration;
    let tab = &ctx.tab;

    match step {
        Step::Navigate { url } => {
            tab.navigate_to(url)?;
            tab.wait_for_element("body")?;
            std::thread::sleep(Duration::from_millis(1500));
        }
        Step::WaitFor {
            selector,
            timeout_ms,
        } => {
            tab.wait_for_element_with_custom_timeout(selector, Duration::from_millis(*timeout_ms))?;
        }
        Step::TypeInto { selector, text } => {
            let el = tab.find_element(selector)?;
            el.click()?;
            let js_sel = selector.replace('\'', "\\'");
            tab.evaluate(
                &format!("document.querySelector('{js_sel}').value = ''"),
                false,
            )?;
            tab.type_str(text)?;
        }
        Step::Click { selector } => {
            let el = tab.find_element(selector)?;
            el.click()?;
            std::thread::sleep(Duration::from_millis(1000));
        }
        Step::PressKey { key } => {
            tab.press_key(key)?;
            std::thread::sleep(Duration::from_millis(1000));
        }
        Step::Extract { selector, label } => {
            let js_sel = selector.replace('\'', "\\'");
            let result = tab.evaluate(
                &format!("(document.querySelector('{js_sel}') || {{}}).innerText || ''"),
                false,
            )?;
            let content = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            extracted.push(types::Extraction {
                label: label.clone(),
                content: content.chars().take(2000).collect(),
            });
        }
        Step::ClickAndUpload { index, file_path } => {
            *outcome = Some(actions::click_and_upload(ctx, *index, file_path));
        }
        Step::WaitForDownload => {
            *outcome = Some(actions::wait_for_download(ctx));
        }
        Step::SaveDisplayedFile { filename } => {
            *outcome = Some(actions::save_displayed_file(ctx, filename));
        }
        Step::CheckPriceDeal { price_text, budget } => {
            *outcome = Some(actions::check_price_deal(price_text, *budget));
        }
        Step::PauseForUser { .. } | Step::Done { .. } | Step::NewTab => {}
    }

    Ok(())
}
