use anyhow::{Context, anyhow};
use base64::Engine;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{DOM, Page};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;
use thiserror::Error;

use crate::dom;
use crate::gate::{GateResult, UserGate};
use crate::types::{ActionOutcome, DOWNLOAD_TIMEOUT, FILE_CHOOSER_TIMEOUT};

/// Everything a custom action needs from the outside world. Built fresh for
/// each invocation; actions hold no state of their own.
pub struct ActionContext {
    pub tab: Arc<Tab>,
    pub downloads_dir: PathBuf,
}

/// Why a custom action failed. Collapses to a plain error outcome at the
/// agent boundary; the distinction only shapes the message.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Timeout(String),
    #[error("{0:#}")]
    Framework(#[from] anyhow::Error),
}

impl From<ActionError> for ActionOutcome {
    fn from(err: ActionError) -> Self {
        ActionOutcome::error(err.to_string())
    }
}

fn settle(result: Result<ActionOutcome, ActionError>) -> ActionOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            eprintln!("[Actions] {}", err);
            err.into()
        }
    }
}

// ---------------------------------------------------------------------------
// Pause for user

/// Manual checkpoint for login walls and CAPTCHAs. Prints the banner, then
/// waits on the gate until the operator resumes (or shutdown cancels).
pub async fn pause_for_user(reason: &str, gate: &UserGate) -> ActionOutcome {
    println!("{}", "-".repeat(60));
    println!("⏸  AGENT PAUSED: {}", reason);
    println!(">>> Please complete the required action in the browser window. <<<");
    println!(">>> {} <<<", gate.resume_instruction());
    println!("{}", "-".repeat(60));

    match gate.wait().await {
        GateResult::Resumed => {
            eprintln!("[Actions] User resumed. Continuing.");
            ActionOutcome::with_memory(
                "User has completed the manual step. Resuming.",
                "The user has completed a manual action.",
            )
        }
        GateResult::Cancelled => {
            ActionOutcome::error("Pause was interrupted by shutdown before the user resumed.")
        }
    }
}

// ---------------------------------------------------------------------------
// Click and upload

pub fn validate_upload_path(file_path: &str) -> Result<PathBuf, ActionError> {
    let path = Path::new(file_path);
    if !path.is_absolute() {
        return Err(ActionError::Validation(format!(
            "File path must be an absolute path. You provided: '{}'",
            file_path
        )));
    }
    if !path.exists() {
        return Err(ActionError::Validation(format!(
            "File not found at path: {}. Cannot upload.",
            file_path
        )));
    }
    Ok(path.to_path_buf())
}

/// Clicks the element at `index` and sets `file_path` on the resulting file
/// chooser in one step. The chooser wait is armed before the click; doing the
/// two separately can lose the dialog event if it fires first.
pub fn click_and_upload(ctx: &ActionContext, index: usize, file_path: &str) -> ActionOutcome {
    let path = match validate_upload_path(file_path) {
        Ok(p) => p,
        Err(err) => return settle(Err(err)),
    };

    eprintln!(
        "[Actions] Clicking element {} and uploading {}...",
        index,
        path.display()
    );

    let tab = &ctx.tab;
    if let Err(e) = tab.call_method(Page::SetInterceptFileChooserDialog {
        enabled: true,
        cancel: None,
    }) {
        return settle(Err(ActionError::Framework(anyhow!(
            "could not enable file chooser interception: {e:#}"
        ))));
    }

    let (chooser_tx, chooser_rx) = mpsc::channel::<Page::events::FileChooserOpenedEvent>();
    let listener = match tab.add_event_listener(Arc::new(move |event: &Event| {
        if let Event::PageFileChooserOpened(e) = event {
            let _ = chooser_tx.send(e.clone());
        }
    })) {
        Ok(l) => l,
        Err(e) => {
            let _ = tab.call_method(Page::SetInterceptFileChooserDialog {
                enabled: false,
                cancel: None,
            });
            return settle(Err(ActionError::Framework(anyhow!(
                "could not register file chooser listener: {e:#}"
            ))));
        }
    };

    let result = (|| -> Result<ActionOutcome, ActionError> {
        let selector = dom::selector_for_index(index);
        let element = tab.find_element(&selector).map_err(|_| {
            ActionError::Framework(anyhow!(
                "Could not find element with index {index} to click."
            ))
        })?;
        element.click().context("clicking the upload element")?;

        let chooser = chooser_rx.recv_timeout(FILE_CHOOSER_TIMEOUT).map_err(|_| {
            ActionError::Timeout(
                "Upload failed: the file chooser dialog did not open after clicking the element. \
                 Ensure the element index corresponds to a control that opens a file dialog."
                    .to_string(),
            )
        })?;

        tab.call_method(DOM::SetFileInputFiles {
            files: vec![path.to_string_lossy().into_owned()],
            node_id: None,
            backend_node_id: chooser.params.backend_node_id,
            object_id: None,
        })
        .context("setting the file on the chooser input")?;

        eprintln!("[Actions] File set for upload: {}", path.display());
        Ok(ActionOutcome::with_memory(
            format!(
                "Successfully clicked element {} and set file for upload: {}",
                index,
                path.display()
            ),
            "The file has been selected for upload.",
        ))
    })();

    let _ = tab.remove_event_listener(&listener);
    let _ = tab.call_method(Page::SetInterceptFileChooserDialog {
        enabled: false,
        cancel: None,
    });

    settle(result)
}

// ---------------------------------------------------------------------------
// Wait for download

enum DownloadSignal {
    Began { guid: String, filename: String },
    Finished { guid: String },
}

/// Waits for a standard download to start and finish. Must run directly after
/// the click that triggers it; the download lands in the configured downloads
/// directory.
pub fn wait_for_download(ctx: &ActionContext) -> ActionOutcome {
    eprintln!("[Actions] Waiting for a download to start...");
    let tab = &ctx.tab;

    if let Err(e) = tab.call_method(Page::SetDownloadBehavior {
        behavior: Page::SetDownloadBehaviorBehaviorOption::Allow,
        download_path: Some(ctx.downloads_dir.to_string_lossy().into_owned()),
    }) {
        return settle(Err(ActionError::Framework(anyhow!(
            "could not configure download behavior: {e:#}"
        ))));
    }

    let (tx, rx) = mpsc::channel::<DownloadSignal>();
    let listener = match tab.add_event_listener(Arc::new(move |event: &Event| match event {
        Event::PageDownloadWillBegin(e) => {
            let _ = tx.send(DownloadSignal::Began {
                guid: e.params.guid.clone(),
                filename: e.params.suggested_filename.clone(),
            });
        }
        Event::PageDownloadProgress(e) => {
            if e.params.state == Page::DownloadProgressEventStateOption::Completed {
                let _ = tx.send(DownloadSignal::Finished {
                    guid: e.params.guid.clone(),
                });
            }
        }
        _ => {}
    })) {
        Ok(l) => l,
        Err(e) => {
            return settle(Err(ActionError::Framework(anyhow!(
                "could not register download listener: {e:#}"
            ))));
        }
    };

    let deadline = Instant::now() + DOWNLOAD_TIMEOUT;
    let mut pending: Option<(String, String)> = None;

    let result = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Err(timeout_error(&pending));
        }
        match rx.recv_timeout(remaining) {
            Ok(DownloadSignal::Began { guid, filename }) => {
                eprintln!("[Actions] Download of '{}' started.", filename);
                pending = Some((guid, filename));
            }
            Ok(DownloadSignal::Finished { guid }) => match &pending {
                Some((g, filename)) if *g == guid => {
                    let save_path = ctx.downloads_dir.join(filename);
                    let absolute = std::fs::canonicalize(&save_path).unwrap_or(save_path);
                    let msg = format!(
                        "Successfully downloaded '{}' to: {}",
                        filename,
                        absolute.display()
                    );
                    eprintln!("[Actions] {}", msg);
                    break Ok(ActionOutcome::with_memory(
                        msg,
                        format!(
                            "The file was saved to the absolute path: {}",
                            absolute.display()
                        ),
                    ));
                }
                _ => {}
            },
            Err(_) => break Err(timeout_error(&pending)),
        }
    };

    let _ = tab.remove_event_listener(&listener);
    settle(result)
}

fn timeout_error(pending: &Option<(String, String)>) -> ActionError {
    match pending {
        Some((_, filename)) => ActionError::Timeout(format!(
            "Download of '{}' started but did not finish within {} seconds.",
            filename,
            DOWNLOAD_TIMEOUT.as_secs()
        )),
        None => ActionError::Timeout(format!(
            "Download failed. No download was initiated within {} seconds.",
            DOWNLOAD_TIMEOUT.as_secs()
        )),
    }
}

// ---------------------------------------------------------------------------
// Save displayed file

/// Fetches the resource the browser is currently displaying (e.g. an inline
/// PDF) from inside the page and writes it into the downloads directory.
/// For content that renders directly and never fires a download event.
pub fn save_displayed_file(ctx: &ActionContext, filename: &str) -> ActionOutcome {
    settle(try_save_displayed_file(ctx, filename))
}

fn try_save_displayed_file(
    ctx: &ActionContext,
    filename: &str,
) -> Result<ActionOutcome, ActionError> {
    if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
        return Err(ActionError::Validation(format!(
            "Filename must be a bare file name, not a path: '{}'",
            filename
        )));
    }

    let tab = &ctx.tab;
    let current_url = tab.get_url();
    eprintln!(
        "[Actions] Saving displayed file from {} as '{}'...",
        current_url, filename
    );

    // Fetch inside the page so cookies and auth apply, hand the bytes out
    // as base64 (evaluate results must be JSON-representable).
    let script = format!(
        r#"
        (async () => {{
            const response = await fetch({url});
            const blob = await response.blob();
            const reader = new FileReader();
            return await new Promise(resolve => {{
                reader.onload = () => resolve(reader.result.split(',')[1]);
                reader.readAsDataURL(blob);
            }});
        }})()
        "#,
        url = serde_json::json!(current_url)
    );

    let evaluated = tab
        .evaluate(&script, true)
        .context("fetching the displayed resource in the page")?;
    let encoded = evaluated
        .value
        .and_then(|v| v.as_str().map(String::from))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ActionError::Framework(anyhow!("Failed to fetch file content from the browser."))
        })?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .context("decoding the fetched file content")?;

    let save_path = ctx.downloads_dir.join(filename);
    std::fs::write(&save_path, &bytes)
        .with_context(|| format!("writing {}", save_path.display()))?;

    let absolute = std::fs::canonicalize(&save_path).unwrap_or(save_path);
    let msg = format!(
        "Successfully saved displayed file '{}' to: {}",
        filename,
        absolute.display()
    );
    eprintln!("[Actions] {}", msg);
    Ok(ActionOutcome::with_memory(
        msg,
        format!(
            "The file was saved to the absolute path: {}",
            absolute.display()
        ),
    ))
}

// ---------------------------------------------------------------------------
// Price deal check

/// Compares a scraped price string against a budget. Local processing only,
/// never touches the browser.
pub fn check_price_deal(price_text: &str, budget: f64) -> ActionOutcome {
    eprintln!(
        "[Actions] Checking if price '{}' is within budget of ${}...",
        price_text, budget
    );

    let cleaned = price_text.replace(['$', ','], "");
    let cleaned = cleaned.trim();
    let price: f64 = match cleaned.parse() {
        Ok(v) => v,
        Err(_) => {
            return settle(Err(ActionError::Validation(format!(
                "Could not parse the price string '{}' as a number.",
                price_text
            ))));
        }
    };

    let status = if price <= budget {
        format!(
            "GOOD DEAL: The price ${} is within the ${} budget.",
            format_money(price),
            format_money(budget)
        )
    } else {
        format!(
            "NO DEAL: The price ${} is above the ${} budget.",
            format_money(price),
            format_money(budget)
        )
    };
    eprintln!("[Actions] {}", status);

    ActionOutcome::with_memory(status.clone(), status)
}

/// Two decimal places with thousands separators, e.g. 1299.99 -> "1,299.99".
fn format_money(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i.to_string(), f.to_string()),
        None => (fixed, "00".to_string()),
    };

    let mut grouped = String::new();
    let digits = int_part.len();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (digits - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_of(outcome: &ActionOutcome) -> &str {
        match outcome {
            ActionOutcome::Content { summary, .. } => summary,
            ActionOutcome::Error { message } => panic!("unexpected error: {}", message),
        }
    }

    #[test]
    fn price_within_budget_is_a_good_deal() {
        let outcome = check_price_deal("$1,299.99", 1300.0);
        let summary = summary_of(&outcome);
        assert!(summary.contains("GOOD DEAL"), "got: {}", summary);
        assert!(summary.contains("1,299.99"), "got: {}", summary);
    }

    #[test]
    fn price_above_budget_is_no_deal() {
        let outcome = check_price_deal("$1,299.99", 1000.0);
        let summary = summary_of(&outcome);
        assert!(summary.contains("NO DEAL"), "got: {}", summary);
    }

    #[test]
    fn price_equal_to_budget_passes() {
        let outcome = check_price_deal("1300", 1300.0);
        assert!(summary_of(&outcome).contains("GOOD DEAL"));
    }

    #[test]
    fn unparseable_price_is_an_error_not_a_verdict() {
        let outcome = check_price_deal("call for price", 500.0);
        match outcome {
            ActionOutcome::Error { message } => {
                assert!(message.contains("call for price"), "got: {}", message);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn price_parsing_strips_symbols_and_whitespace() {
        assert!(summary_of(&check_price_deal("  $42.00 ", 42.0)).contains("GOOD DEAL"));
        assert!(summary_of(&check_price_deal("1,000,000", 999_999.0)).contains("NO DEAL"));
    }

    #[test]
    fn money_formatting_groups_thousands() {
        assert_eq!(format_money(0.0), "0.00");
        assert_eq!(format_money(42.5), "42.50");
        assert_eq!(format_money(1299.99), "1,299.99");
        assert_eq!(format_money(1_000_000.0), "1,000,000.00");
        assert_eq!(format_money(-1234.5), "-1,234.50");
    }

    #[test]
    fn relative_upload_path_is_rejected_before_browser_use() {
        let err = validate_upload_path("resume.pdf").unwrap_err();
        match err {
            ActionError::Validation(msg) => assert!(msg.contains("absolute"), "got: {}", msg),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn missing_upload_path_is_rejected_before_browser_use() {
        let missing = std::env::temp_dir().join("webautomate-no-such-file-83412.bin");
        let err = validate_upload_path(&missing.to_string_lossy()).unwrap_err();
        match err {
            ActionError::Validation(msg) => assert!(msg.contains("not found"), "got: {}", msg),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn existing_absolute_upload_path_is_accepted() {
        let path = std::env::temp_dir().join("webautomate-upload-fixture.txt");
        std::fs::write(&path, b"fixture").unwrap();
        let validated = validate_upload_path(&path.to_string_lossy()).unwrap();
        assert!(validated.is_absolute());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn action_errors_collapse_to_error_outcomes() {
        let outcome: ActionOutcome = ActionError::Timeout("too slow".into()).into();
        assert!(outcome.is_error());
    }
}
