use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ProbeConfig: file-based config loader (chatprobe.json) with env-var fallback
// ---------------------------------------------------------------------------

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Timing sub-config (mirrors the `timing` key in chatprobe.json).
///
/// All values are milliseconds except the tick/char counts.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct TimingSettings {
    pub poll_interval_ms: Option<u64>,
    pub appearance_timeout_ms: Option<u64>,
    pub completion_timeout_ms: Option<u64>,
    pub required_stable_ticks: Option<u32>,
    pub min_reply_chars: Option<usize>,
    pub inter_turn_delay_ms: Option<u64>,
}

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_APPEARANCE_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_COMPLETION_TIMEOUT_MS: u64 = 90_000;
const DEFAULT_REQUIRED_STABLE_TICKS: u32 = 3;
const DEFAULT_MIN_REPLY_CHARS: usize = 10;
const DEFAULT_INTER_TURN_DELAY_MS: u64 = 2000;

/// Polling faster than this only burns CDP round-trips.
const MIN_POLL_INTERVAL_MS: u64 = 50;

impl TimingSettings {
    /// Each field: JSON → `CHATPROBE_*` env var → default.
    pub fn resolve(&self) -> Timing {
        let ms = |field: Option<u64>, key: &str, default: u64| {
            Duration::from_millis(field.or_else(|| env_parse(key)).unwrap_or(default))
        };
        Timing {
            poll_interval: ms(
                self.poll_interval_ms,
                "CHATPROBE_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )
            .max(Duration::from_millis(MIN_POLL_INTERVAL_MS)),
            appearance_timeout: ms(
                self.appearance_timeout_ms,
                "CHATPROBE_APPEARANCE_TIMEOUT_MS",
                DEFAULT_APPEARANCE_TIMEOUT_MS,
            ),
            completion_timeout: ms(
                self.completion_timeout_ms,
                "CHATPROBE_COMPLETION_TIMEOUT_MS",
                DEFAULT_COMPLETION_TIMEOUT_MS,
            ),
            required_stable_ticks: self
                .required_stable_ticks
                .or_else(|| env_parse("CHATPROBE_REQUIRED_STABLE_TICKS"))
                .unwrap_or(DEFAULT_REQUIRED_STABLE_TICKS)
                .max(1),
            min_reply_chars: self
                .min_reply_chars
                .or_else(|| env_parse("CHATPROBE_MIN_REPLY_CHARS"))
                .unwrap_or(DEFAULT_MIN_REPLY_CHARS),
            inter_turn_delay: ms(
                self.inter_turn_delay_ms,
                "CHATPROBE_INTER_TURN_DELAY_MS",
                DEFAULT_INTER_TURN_DELAY_MS,
            ),
        }
    }
}

/// Resolved timing constants used by the locator, detector and orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub appearance_timeout: Duration,
    pub completion_timeout: Duration,
    /// Consecutive quiet, unchanged ticks needed before a reply counts as finished.
    pub required_stable_ticks: u32,
    /// A reply must be strictly longer than this before it can stabilize.
    pub min_reply_chars: usize,
    pub inter_turn_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            appearance_timeout: Duration::from_millis(DEFAULT_APPEARANCE_TIMEOUT_MS),
            completion_timeout: Duration::from_millis(DEFAULT_COMPLETION_TIMEOUT_MS),
            required_stable_ticks: DEFAULT_REQUIRED_STABLE_TICKS,
            min_reply_chars: DEFAULT_MIN_REPLY_CHARS,
            inter_turn_delay: Duration::from_millis(DEFAULT_INTER_TURN_DELAY_MS),
        }
    }
}

/// DOM selectors used by the browser adapter. Every list replaces the built-in
/// default when present.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct SelectorSettings {
    pub messages: Option<Vec<String>>,
    pub typing: Option<Vec<String>>,
    pub input: Option<Vec<String>>,
    pub send_button: Option<Vec<String>>,
}

const DEFAULT_MESSAGE_SELECTORS: &[&str] = &[
    "[data-testid*=\"message\"]",
    "div[data-message-author-role]",
    ".prose",
    ".markdown",
    ".group.w-full div.text-base",
    ".message",
    ".chat-message",
    ".whitespace-pre-wrap",
];

const DEFAULT_TYPING_SELECTORS: &[&str] = &[
    "[data-testid*=\"typing\"]",
    ".typing",
    ".animate-pulse",
    ".dot-typing",
    ".cursor",
    ".caret",
    ".blink",
];

const DEFAULT_INPUT_SELECTORS: &[&str] = &[
    "textarea[placeholder*=\"Message\"]",
    "textarea[placeholder*=\"Type\"]",
];

const DEFAULT_SEND_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "button[aria-label*=\"Send\"]",
    "button[aria-label*=\"send\"]",
];

fn or_defaults(list: &Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
    match list {
        Some(v) if !v.is_empty() => v.clone(),
        _ => defaults.iter().map(|s| s.to_string()).collect(),
    }
}

impl SelectorSettings {
    pub fn resolve(&self) -> Selectors {
        Selectors {
            messages: or_defaults(&self.messages, DEFAULT_MESSAGE_SELECTORS),
            typing: or_defaults(&self.typing, DEFAULT_TYPING_SELECTORS),
            input: or_defaults(&self.input, DEFAULT_INPUT_SELECTORS),
            send_button: or_defaults(&self.send_button, DEFAULT_SEND_SELECTORS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selectors {
    pub messages: Vec<String>,
    pub typing: Vec<String>,
    pub input: Vec<String>,
    pub send_button: Vec<String>,
}

impl Default for Selectors {
    fn default() -> Self {
        SelectorSettings::default().resolve()
    }
}

/// Browser sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserSettings {
    /// Explicit browser binary. Falls back to `CHROME_EXECUTABLE`, then auto-discovery.
    pub executable: Option<String>,
    /// Defaults to `false`: chat UIs usually need a logged-in, visible profile.
    pub headless: Option<bool>,
    /// Persistent Chromium profile directory (keeps the chat login between runs).
    pub user_data_dir: Option<String>,
    /// Max time to wait for the chat page to go network-idle before the first turn.
    pub page_settle_timeout_ms: Option<u64>,
}

impl BrowserSettings {
    pub fn resolve_executable(&self) -> Option<String> {
        if let Some(p) = &self.executable {
            if Path::new(p).exists() {
                return Some(p.clone());
            }
        }
        crate::scraping::browser_manager::find_chrome_executable()
    }

    /// JSON → `CHATPROBE_HEADLESS` → `false`.
    pub fn resolve_headless(&self) -> bool {
        self.headless
            .or_else(|| env_flag("CHATPROBE_HEADLESS"))
            .unwrap_or(false)
    }

    /// JSON → `CHATPROBE_USER_DATA_DIR` → none (throwaway profile).
    pub fn resolve_user_data_dir(&self) -> Option<String> {
        self.user_data_dir
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("CHATPROBE_USER_DATA_DIR"))
    }

    pub fn resolve_page_settle_timeout(&self) -> Duration {
        Duration::from_millis(self.page_settle_timeout_ms.unwrap_or(15_000))
    }
}

/// Relay sub-config (the external analysis service).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct RelaySettings {
    /// Set to `false` to skip the relay entirely (transcripts are still stored).
    pub enabled: Option<bool>,
    pub analyze_url: Option<String>,
    pub health_url: Option<String>,
    /// Refuse to start a run when the health check fails. Default: `true`.
    pub require_healthy: Option<bool>,
    /// Upper bound on retrying a transient delivery failure. Default: 20 s.
    pub max_retry_secs: Option<u64>,
}

impl RelaySettings {
    /// JSON `enabled` → `CHATPROBE_RELAY_DISABLED` (set to "1" to disable) → `true`.
    pub fn resolve_enabled(&self) -> bool {
        if let Some(b) = self.enabled {
            return b;
        }
        !env_flag("CHATPROBE_RELAY_DISABLED").unwrap_or(false)
    }

    pub fn resolve_analyze_url(&self) -> String {
        self.analyze_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("CHATPROBE_ANALYZE_URL"))
            .unwrap_or_else(|| "http://127.0.0.1:5002/analyze".to_string())
    }

    pub fn resolve_health_url(&self) -> String {
        self.health_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("CHATPROBE_HEALTH_URL"))
            .unwrap_or_else(|| "http://127.0.0.1:5002/health".to_string())
    }

    pub fn resolve_require_healthy(&self) -> bool {
        self.require_healthy.unwrap_or(true)
    }

    pub fn resolve_max_retry(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs.unwrap_or(20))
    }
}

/// Transcript store sub-config.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct TranscriptSettings {
    pub dir: Option<String>,
}

impl TranscriptSettings {
    /// JSON → `CHATPROBE_TRANSCRIPT_DIR` → `~/.chatprobe/runs`.
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        if let Some(d) = self.dir.as_ref().filter(|v| !v.trim().is_empty()) {
            return Some(PathBuf::from(d));
        }
        if let Some(d) = env_string("CHATPROBE_TRANSCRIPT_DIR") {
            return Some(PathBuf::from(d));
        }
        let home = dirs::home_dir()?;
        Some(home.join(".chatprobe").join("runs"))
    }
}

/// Top-level config loaded from `chatprobe.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ProbeConfig {
    pub chat_url: Option<String>,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub selectors: SelectorSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub transcripts: TranscriptSettings,
    /// Named prompt sequences.
    #[serde(default)]
    pub scenarios: BTreeMap<String, Vec<String>>,
}

impl ProbeConfig {
    /// Chat URL: JSON field → `CHATPROBE_CHAT_URL` env var → `None`.
    pub fn resolve_chat_url(&self) -> Option<String> {
        self.chat_url
            .clone()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string("CHATPROBE_CHAT_URL"))
    }

    pub fn scenario(&self, name: &str) -> Option<&[String]> {
        self.scenarios.get(name).map(|v| v.as_slice())
    }
}

/// Load `chatprobe.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `CHATPROBE_CONFIG` env var path
/// 2. `./chatprobe.json`
/// 3. `../chatprobe.json`
///
/// Missing file → `ProbeConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `ProbeConfig::default()`.
pub fn load_probe_config() -> ProbeConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("chatprobe.json"),
            PathBuf::from("../chatprobe.json"),
        ];
        if let Ok(env_path) = std::env::var("CHATPROBE_CONFIG") {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            return parse_probe_config(&contents, path);
        }
    }

    ProbeConfig::default()
}

fn parse_probe_config(contents: &str, path: &Path) -> ProbeConfig {
    match serde_json::from_str::<ProbeConfig>(contents) {
        Ok(cfg) => {
            tracing::info!(
                "chatprobe.json loaded from {} ({} scenarios)",
                path.display(),
                cfg.scenarios.len()
            );
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "chatprobe.json parse error at {}: {}; using defaults",
                path.display(),
                e
            );
            ProbeConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fields_win_over_defaults() {
        let cfg: ProbeConfig = serde_json::from_str(
            r#"{
                "chat_url": "https://chat.example.com/",
                "timing": {"poll_interval_ms": 250, "required_stable_ticks": 5, "min_reply_chars": 0},
                "scenarios": {"greeting": ["hello", "how are you?"]}
            }"#,
        )
        .unwrap();

        let t = cfg.timing.resolve();
        assert_eq!(t.poll_interval, Duration::from_millis(250));
        assert_eq!(t.required_stable_ticks, 5);
        assert_eq!(t.min_reply_chars, 0);
        assert_eq!(cfg.resolve_chat_url().as_deref(), Some("https://chat.example.com/"));
        assert_eq!(cfg.scenario("greeting").map(|s| s.len()), Some(2));
        assert!(cfg.scenario("missing").is_none());
    }

    #[test]
    fn zero_stable_ticks_is_clamped() {
        let settings = TimingSettings {
            required_stable_ticks: Some(0),
            ..Default::default()
        };
        assert_eq!(settings.resolve().required_stable_ticks, 1);
    }

    #[test]
    fn zero_poll_interval_is_floored() {
        let settings = TimingSettings {
            poll_interval_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(settings.resolve().poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn fully_specified_settings_match_default_timing() {
        let settings = TimingSettings {
            poll_interval_ms: Some(1000),
            appearance_timeout_ms: Some(15_000),
            completion_timeout_ms: Some(90_000),
            required_stable_ticks: Some(3),
            min_reply_chars: Some(10),
            inter_turn_delay_ms: Some(2000),
        };
        assert_eq!(settings.resolve(), Timing::default());
    }

    #[test]
    fn empty_selector_list_falls_back_to_defaults() {
        let settings = SelectorSettings {
            messages: Some(vec![]),
            typing: Some(vec![".thinking".into()]),
            ..Default::default()
        };
        let s = settings.resolve();
        assert!(s.messages.iter().any(|m| m.contains("data-message-author-role")));
        assert_eq!(s.typing, vec![".thinking".to_string()]);
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let cfg = parse_probe_config("{ not json", Path::new("chatprobe.json"));
        assert!(cfg.scenarios.is_empty());
        assert!(cfg.chat_url.is_none());
    }

    #[test]
    fn example_config_parses() {
        let cfg = parse_probe_config(
            include_str!("../../chatprobe.example.json"),
            Path::new("chatprobe.example.json"),
        );
        assert_eq!(cfg.scenario("smalltalk").map(|s| s.len()), Some(4));
        assert_eq!(cfg.relay.resolve_analyze_url(), "http://127.0.0.1:5002/analyze");
        assert_eq!(cfg.timing.resolve(), Timing::default());
    }
}
