//! Native browser management using `chromiumoxide`.
//!
//! This module is the **single source of truth** for:
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * `BrowserSession`: one launched browser driving the chat page for a run.
//! * `wait_until_stable`: network-idle wait before the first turn.
//!
//! The probe only ever drives one conversation at a time, so there is no tab
//! pool: a run launches a session, opens the chat URL, and closes it when done.

use crate::core::config::BrowserSettings;
use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/local/bin/chromium",
            "/usr/bin/brave-browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Browser config builder ───────────────────────────────────────────────────

/// Build a `BrowserConfig` for driving a chat page.
///
/// Visible by default: most chat UIs need a logged-in profile and a human can
/// watch the run. `--disable-blink-features=AutomationControlled` hides the
/// `navigator.webdriver` flag, which some chat front-ends check.
pub fn build_chat_config(
    exe: &str,
    headless: bool,
    user_data_dir: Option<&str>,
    width: u32,
    height: u32,
) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-dev-shm-usage") // avoids /dev/shm OOM in constrained environments
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled");

    if !headless {
        builder = builder.with_head();
    } else {
        builder = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");
    }

    if let Some(dir) = user_data_dir {
        builder = builder.user_data_dir(dir);
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

// ── Browser session ──────────────────────────────────────────────────────────

/// A launched browser plus its CDP event pump.
pub struct BrowserSession {
    browser: Option<Browser>,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let exe = settings.resolve_executable().ok_or_else(|| {
            anyhow!("No browser found. Install Chrome, Chromium or Brave, or set CHROME_EXECUTABLE.")
        })?;
        let headless = settings.resolve_headless();
        let profile = settings.resolve_user_data_dir();

        info!(
            "🚀 Launching browser ({}, {}{})",
            exe,
            if headless { "headless" } else { "visible" },
            profile
                .as_deref()
                .map(|p| format!(", profile {}", p))
                .unwrap_or_default()
        );

        let config = build_chat_config(&exe, headless, profile.as_deref(), 1280, 900)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler_task,
        })
    }

    /// Open `url` in a new tab and wait for it to settle (or for `cancel`).
    pub async fn open(
        &mut self,
        url: &str,
        settle_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Page> {
        let browser = self
            .browser
            .as_mut()
            .ok_or_else(|| anyhow!("browser session already closed"))?;
        info!("🌐 Opening chat page: {}", url);
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| anyhow!("Failed to open page: {}", e))?;
        let quiet = Duration::from_millis(1500).min(settle_timeout);
        wait_until_stable(&page, quiet, settle_timeout, cancel).await?;
        Ok(page)
    }

    pub async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("Browser close error (non-fatal): {}", e);
            }
        }
        self.handler_task.abort();
        info!("🛑 Browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Drop cannot await; if we're inside a tokio runtime, spawn a task to
        // close the browser to avoid zombie Chromium processes.
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        self.handler_task.abort();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = browser.close().await;
            });
        }
    }
}

// ── Smart wait / networkidle ─────────────────────────────────────────────────

/// Wait until the page network goes idle (no new resource entries for `quiet`)
/// or until `timeout` has elapsed. Returns early, without error, on cancellation.
///
/// Polls `performance.getEntriesByType("resource").length` every 250 ms;
/// a Playwright-style networkidle heuristic that works without CDP Network events.
pub async fn wait_until_stable(
    page: &Page,
    quiet: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let poll = Duration::from_millis(250);
    let start = Instant::now();
    let mut last_count: u64 = 0;
    let mut stable_since = Instant::now();

    loop {
        if start.elapsed() >= timeout {
            info!("wait_until_stable: timeout after {}ms", timeout.as_millis());
            break;
        }

        let count: u64 = page
            .evaluate("performance.getEntriesByType('resource').length")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_u64())
            .unwrap_or(0);

        let ready_complete: bool = page
            .evaluate("document.readyState")
            .await
            .ok()
            .and_then(|v| v.into_value::<serde_json::Value>().ok())
            .and_then(|j| j.as_str().map(|s| s == "complete"))
            .unwrap_or(false);

        if !ready_complete || count != last_count {
            last_count = count;
            stable_since = Instant::now();
        } else if stable_since.elapsed() >= quiet {
            info!(
                "wait_until_stable: idle after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            break;
        }

        if crate::probe::pause(cancel, poll).await.is_err() {
            info!("wait_until_stable: cancelled after {}ms", start.elapsed().as_millis());
            break;
        }
    }
    Ok(())
}
