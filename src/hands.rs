use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::path::PathBuf;
use std::sync::Arc;

/// Runtime configuration, resolved once at startup and passed along
/// explicitly. No module-level state.
#[derive(Debug, Clone)]
pub struct Config {
    /// The one canonical destination for downloads and saved files.
    pub downloads_dir: PathBuf,
    pub headless: bool,
}

impl Config {
    /// Resolve the downloads directory: explicit override, else the OS
    /// user's Downloads folder, else ./downloads. Created if absent.
    pub fn resolve(downloads_override: Option<PathBuf>, headless: bool) -> Result<Self> {
        let downloads_dir = match downloads_override {
            Some(dir) => dir,
            None => match dirs::download_dir() {
                Some(dir) => dir,
                None => std::env::current_dir()?.join("downloads"),
            },
        };
        std::fs::create_dir_all(&downloads_dir)?;
        let downloads_dir = std::fs::canonicalize(&downloads_dir)?;

        Ok(Self {
            downloads_dir,
            headless,
        })
    }
}

/// Persistent browser session. Created once, reused for all tasks, and
/// explicitly closed on every exit path.
pub struct BrowserSession {
    browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(config: &Config) -> Result<Self> {
        // Attach to an already-running Chrome first, so manual logins in an
        // existing window carry over.
        eprintln!("[Hands] Attempting to attach to existing Chrome on port 9222...");
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            eprintln!("[Hands] Attached to existing Chrome.");

            let tab = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                if let Some(t) = tabs.first() {
                    eprintln!("[Hands] Using existing tab.");
                    t.clone()
                } else {
                    eprintln!("[Hands] No tabs found, creating new one.");
                    browser.new_tab()?
                }
            };

            return Ok(Self { browser, tab });
        }

        eprintln!("[Hands] Could not attach. Launching our own Chrome...");

        // Persistent profile so logins survive between runs.
        let agent_profile = std::env::current_dir()?.join("agent_profile");
        if !agent_profile.exists() {
            eprintln!("[Hands] Creating profile at: {:?}", agent_profile);
            std::fs::create_dir_all(&agent_profile)?;
        }

        let options = LaunchOptions {
            headless: config.headless,
            user_data_dir: Some(agent_profile),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
                std::ffi::OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: std::time::Duration::from_secs(300),
            ..Default::default()
        };

        eprintln!("[Hands] Starting Chrome...");
        let browser = Browser::new(options).map_err(|e| {
            eprintln!("[Hands] Browser launch failed: {}", e);
            anyhow::anyhow!("Browser launch failed: {}", e)
        })?;

        eprintln!("[Hands] Chrome started, creating tab...");
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        eprintln!("[Hands] Chrome ready.");

        Ok(Self { browser, tab })
    }

    /// Open a fresh tab and make it the active one.
    pub fn new_tab(&mut self) -> Result<()> {
        let tab = self.browser.new_tab()?;
        self.tab = tab;
        Ok(())
    }

    /// Tear the session down. Dropping the handle ends our connection and,
    /// when we spawned the browser, the Chrome process with it.
    pub fn close(self) {
        eprintln!("[Hands] Closing browser session.");
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_downloads_dir_is_created_and_canonical() {
        let dir = std::env::temp_dir().join("webautomate-test-downloads");
        let _ = std::fs::remove_dir_all(&dir);

        let config = Config::resolve(Some(dir.clone()), true).unwrap();
        assert!(config.downloads_dir.exists());
        assert!(config.downloads_dir.is_absolute());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
