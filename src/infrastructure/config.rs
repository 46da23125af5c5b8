use crate::application::graph_service::GraphSettings;
use crate::application::recorder::CooldownSettings;
use crate::application::results_writer::WriterSettings;
use crate::domain::reading::{Browser, DEFAULT_TIME_FORMAT, RecordingMethod};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub recording: RecordingSettings,
    pub graph: GraphConfig,
    pub speedtest: SpeedtestSettings,
    pub webdriver: WebDriverSettings,
    pub websites: WebsitesConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub results_path: String,
    pub time_format: String,
    pub queue_capacity: usize,
    pub writer_poll_ms: u64,
    pub write_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            results_path: "data/results.csv".to_string(),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            queue_capacity: 1024,
            writer_poll_ms: 250,
            write_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl StorageSettings {
    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings {
            poll_timeout: Duration::from_millis(self.writer_poll_ms),
            max_retries: self.write_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecordingSettings {
    pub max_recorders: usize,
    pub cooldown_secs: u64,
    pub cooldown_poll_ms: u64,
    pub stop_timeout_secs: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            max_recorders: 4,
            cooldown_secs: 30,
            cooldown_poll_ms: 1000,
            stop_timeout_secs: 300,
        }
    }
}

impl RecordingSettings {
    pub fn cooldown(&self) -> CooldownSettings {
        CooldownSettings {
            duration: Duration::from_secs(self.cooldown_secs),
            poll: Duration::from_millis(self.cooldown_poll_ms),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConfig {
    pub refresh_secs: u64,
    pub live_queue_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            refresh_secs: 10,
            live_queue_capacity: 256,
        }
    }
}

impl GraphConfig {
    pub fn settings(&self) -> GraphSettings {
        GraphSettings {
            refresh: Duration::from_secs(self.refresh_secs),
            live_capacity: self.live_queue_capacity,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SpeedtestSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SpeedtestSettings {
    fn default() -> Self {
        Self {
            program: "speedtest-cli".to_string(),
            args: vec!["--secure".to_string()],
            timeout_secs: 180,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebDriverSettings {
    pub chrome_url: String,
    pub edge_url: String,
    pub headless: bool,
    pub request_timeout_secs: u64,
    pub poll_ms: u64,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            chrome_url: "http://localhost:9515".to_string(),
            edge_url: "http://localhost:9516".to_string(),
            headless: true,
            request_timeout_secs: 30,
            poll_ms: 1000,
        }
    }
}

impl WebDriverSettings {
    pub fn endpoint(&self, browser: Browser) -> &str {
        match browser {
            Browser::Chrome => &self.chrome_url,
            Browser::Edge => &self.edge_url,
        }
    }
}

/// Where a speed-test site shows its results, and what to click to get there.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WebsiteProfile {
    pub url: String,
    /// CSS selectors clicked in order after the page loads.
    pub clicks: Vec<String>,
    /// Element that must be displayed before values are read.
    pub ready_selector: Option<String>,
    pub value_selector: String,
    pub download_index: usize,
    pub upload_index: usize,
    /// Text the site shows in a value field before the test completes.
    pub placeholder: String,
    pub min_wait_secs: u64,
    pub timeout_secs: u64,
    pub clear_cookies: bool,
}

impl Default for WebsiteProfile {
    fn default() -> Self {
        Self {
            url: String::new(),
            clicks: Vec::new(),
            ready_selector: None,
            value_selector: String::new(),
            download_index: 1,
            upload_index: 2,
            placeholder: "--".to_string(),
            min_wait_secs: 0,
            timeout_secs: 120,
            clear_cookies: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebsitesConfig {
    pub bt: WebsiteProfile,
    pub which: WebsiteProfile,
}

impl Default for WebsitesConfig {
    fn default() -> Self {
        Self {
            bt: WebsiteProfile {
                url: "https://speedtest.btwholesale.com/details".to_string(),
                value_selector: ".fontvalue".to_string(),
                min_wait_secs: 15,
                ..WebsiteProfile::default()
            },
            which: WebsiteProfile {
                url: "https://broadbandtest.which.co.uk".to_string(),
                clicks: vec![
                    "#onetrust-accept-btn-handler".to_string(),
                    "[name='start']".to_string(),
                ],
                ready_selector: Some("[name='find']".to_string()),
                value_selector: "[name='value']".to_string(),
                clear_cookies: true,
                ..WebsiteProfile::default()
            },
        }
    }
}

impl WebsitesConfig {
    pub fn profile(&self, method: RecordingMethod) -> Option<&WebsiteProfile> {
        match method {
            RecordingMethod::BtWebsite => Some(&self.bt),
            RecordingMethod::WhichWebsite => Some(&self.which),
            RecordingMethod::SpeedtestCli => None,
        }
    }
}

/// Layers `config/broadbandbug.*` (if present), then `BROADBANDBUG__SECTION__KEY`
/// environment overrides, over the built-in defaults key by key.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(defaults()?)
        .add_source(config::File::with_name("config/broadbandbug").required(false))
        .add_source(
            config::Environment::with_prefix("BROADBANDBUG")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to load configuration")?;

    settings
        .try_deserialize()
        .context("invalid configuration")
}

fn defaults() -> anyhow::Result<config::Config> {
    config::Config::try_from(&AppConfig::default()).context("failed to build default configuration")
}
