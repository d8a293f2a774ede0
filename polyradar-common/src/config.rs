//! Configuration loading and root folder resolution
//!
//! Configuration file priority:
//! 1. Command-line argument (highest priority)
//! 2. `POLYRADAR_CONFIG` environment variable
//! 3. User config file (`~/.config/polyradar/config.toml`)
//! 4. System config file (`/etc/polyradar/config.toml`, Linux only)
//! 5. Compiled defaults (fallback)
//!
//! A missing config file is never fatal: a warning is logged and compiled
//! defaults are used. A config file that exists but does not parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Environment variable naming an explicit config file
pub const ENV_CONFIG: &str = "POLYRADAR_CONFIG";
/// Environment variable overriding the root (data) folder
pub const ENV_ROOT_FOLDER: &str = "POLYRADAR_ROOT_FOLDER";
/// Environment variable overriding the public base URL
pub const ENV_PUBLIC_URL: &str = "POLYRADAR_PUBLIC_URL";
/// Environment variable overriding the webhook shared secret
pub const ENV_WEBHOOK_SECRET: &str = "POLYRADAR_WEBHOOK_SECRET";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "polyradar.db";

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
        }
    }
}

/// Full service configuration as read from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Data directory holding the database
    pub root_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub webhooks: WebhookConfig,
    pub lifecycle: LifecycleConfig,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Externally reachable base URL; callback URLs are built from it
    pub public_base_url: String,
}

/// One prediction model and the automation hook that runs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelWebhook {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub models: Vec<ModelWebhook>,
    pub timeline_url: String,
    pub insights_url: String,
    pub request_timeout_secs: u64,
    /// Required value of the `x-webhook-secret` header on callbacks (None disables the check)
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a result may stay pending/processing before it times out
    pub result_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Poll fallback period for analysis subscriptions
    pub poll_interval_secs: u64,
    pub event_bus_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub initial_balance: i64,
    pub analysis_cost: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            server: ServerConfig::default(),
            webhooks: WebhookConfig::default(),
            lifecycle: LifecycleConfig::default(),
            billing: BillingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5780,
            public_base_url: "https://www.polyradar.io".to_string(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        let model = |name: &str, hook: &str| ModelWebhook {
            name: name.to_string(),
            url: format!("https://hook.us2.make.com/{}", hook),
        };
        Self {
            models: vec![
                model("model1", "mio87mwc00gx78v2wo1ex41xwzhrmpd5"),
                model("model2", "632ia2fn81ycsukbgc1qnkbgfoitq2dc"),
                model("model3", "832gwe0qrpvrdxa1ktt7xb3nwwe7vnpb"),
                model("model4", "ee8yx5gny4wg158ypnsjx869jijk84rz"),
            ],
            timeline_url: "https://hook.us2.make.com/oz2vahabhwhxutwohwpkoxtkaaym3nxa".to_string(),
            insights_url: "https://hook.us2.make.com/sv2tup1yq1hddwnolhhngv67f8jttynh".to_string(),
            request_timeout_secs: 10,
            shared_secret: None,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            result_timeout_secs: 15 * 60,
            sweep_interval_secs: 30,
            poll_interval_secs: 5,
            event_bus_capacity: 1000,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            initial_balance: 500,
            analysis_cost: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: CompiledDefaults::for_current_platform().log_level,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Read and parse a config file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the config file, load it (or defaults) and apply environment overrides
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match locate_config_file(cli_path) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load_from_file(&path)?
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                info!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `POLYRADAR_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_PUBLIC_URL) {
            if !url.trim().is_empty() {
                self.server.public_base_url = url.trim().to_string();
            }
        }
        if let Ok(secret) = std::env::var(ENV_WEBHOOK_SECRET) {
            self.webhooks.shared_secret = if secret.is_empty() { None } else { Some(secret) };
        }
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.webhooks.models.is_empty() {
            return Err(Error::Config("At least one model webhook is required".to_string()));
        }

        let mut seen = HashSet::new();
        for model in &self.webhooks.models {
            if !is_valid_model_name(&model.name) {
                return Err(Error::Config(format!(
                    "Model name '{}' must be non-empty and contain only letters, digits, '-' or '_'",
                    model.name
                )));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(Error::Config(format!("Duplicate model name '{}'", model.name)));
            }
            check_url(&format!("webhooks.models.{}", model.name), &model.url)?;
        }

        check_url("webhooks.timeline_url", &self.webhooks.timeline_url)?;
        check_url("webhooks.insights_url", &self.webhooks.insights_url)?;
        check_url("server.public_base_url", &self.server.public_base_url)?;

        let positive = [
            ("webhooks.request_timeout_secs", self.webhooks.request_timeout_secs),
            ("lifecycle.result_timeout_secs", self.lifecycle.result_timeout_secs),
            ("lifecycle.sweep_interval_secs", self.lifecycle.sweep_interval_secs),
            ("lifecycle.poll_interval_secs", self.lifecycle.poll_interval_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", key)));
            }
        }
        if self.lifecycle.event_bus_capacity == 0 {
            return Err(Error::Config(
                "lifecycle.event_bus_capacity must be greater than zero".to_string(),
            ));
        }
        if self.billing.analysis_cost < 0 || self.billing.initial_balance < 0 {
            return Err(Error::Config("billing amounts must not be negative".to_string()));
        }

        Ok(())
    }

    /// Configured model names in declaration order
    pub fn model_names(&self) -> Vec<String> {
        self.webhooks.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.webhooks.request_timeout_secs)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.lifecycle.result_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle.sweep_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.lifecycle.poll_interval_secs)
    }
}

/// Model names become URL path segments
pub fn is_valid_model_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_url(key: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ('{}'): {}", key, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "{} must use http or https, got '{}'",
            key, other
        ))),
    }
}

/// Find the config file path to use, if any
fn locate_config_file(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(user_config) = dirs::config_dir().map(|d| d.join("polyradar").join("config.toml")) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/polyradar/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("polyradar"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/polyradar"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("polyradar"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/polyradar"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("polyradar"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\polyradar"))
    } else {
        PathBuf::from("./polyradar_data")
    }
}

/// Root folder resolution: CLI → `POLYRADAR_ROOT_FOLDER` → TOML → compiled default
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_value: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml_value(mut self, path: Option<PathBuf>) -> Self {
        self.toml_value = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("[{}] Root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
            if !path.is_empty() {
                info!("[{}] Root folder from {}: {}", self.module_name, ENV_ROOT_FOLDER, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            info!("[{}] Root folder from config file: {}", self.module_name, path.display());
            return path.clone();
        }

        let path = CompiledDefaults::for_current_platform().root_folder;
        info!("[{}] Root folder (compiled default): {}", self.module_name, path.display());
        path
    }
}

/// Creates the root folder and locates files inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }
}
