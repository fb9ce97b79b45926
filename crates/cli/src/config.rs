//! Gateway configuration.
//!
//! Loaded from an optional TOML file layered under `CODECO__`-prefixed
//! environment variables, using `__` as the nesting separator:
//!
//! ```text
//! CODECO__LOG__LEVEL=debug
//! CODECO__ENCODER__SENDER_CODE=DEPOT01
//! CODECO__STORE__PATH=/var/lib/codeco/transmissions.jsonl
//! ```
//!
//! Every section has defaults, so an empty configuration is valid and runs
//! the gateway against the sandbox with an in-memory log.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use codeco::{
    Credentials, EncoderOptions, Endpoint, PartnerCode, PartnerConfig, PartnerRegistry,
    SegmentCountScope, SizeFallback, TransportKind, DEFAULT_FILE_NAME_TEMPLATE,
    SANDBOX_SENDER_CODE,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// File read when `--config` is not given. Missing is not an error.
pub const DEFAULT_CONFIG_FILE: &str = "codeco.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CODECO";

/// Configuration errors. The gateway never starts with an invalid config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value failed validation.
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Deployment environment name, attached to telemetry.
    pub environment: String,
    pub log: LogConfig,
    pub telemetry: TelemetryConfig,
    pub bus: BusSettings,
    pub encoder: EncoderSettings,
    pub store: StoreSettings,
    pub outbox: OutboxSettings,
    pub http: HttpSettings,
    pub acknowledgment: AcknowledgmentSettings,
    /// Live partner configurations.
    pub partners: Vec<PartnerSettings>,
    /// Client name to partner code.
    pub clients: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log: LogConfig::default(),
            telemetry: TelemetryConfig::default(),
            bus: BusSettings::default(),
            encoder: EncoderSettings::default(),
            store: StoreSettings::default(),
            outbox: OutboxSettings::default(),
            http: HttpSettings::default(),
            acknowledgment: AcknowledgmentSettings::default(),
            partners: Vec::new(),
            clients: HashMap::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint. Export is off when absent.
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: "codeco-gateway".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub history_capacity: usize,
    /// Per-handler time limit; unbounded when absent.
    pub handler_timeout_ms: Option<u64>,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            history_capacity: bus::DEFAULT_HISTORY_CAPACITY,
            handler_timeout_ms: None,
        }
    }
}

impl BusSettings {
    pub fn bus_config(&self) -> bus::BusConfig {
        bus::BusConfig {
            history_capacity: self.history_capacity,
            handler_timeout: self.handler_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Sender identification used for the sandbox partner and for partners
    /// that do not set their own.
    pub sender_code: String,
    /// Depot UN/LOCODE.
    pub location_code: String,
    pub size_fallback: SizeFallback,
    pub segment_count: SegmentCountScope,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        let options = EncoderOptions::default();
        Self {
            sender_code: SANDBOX_SENDER_CODE.to_string(),
            location_code: options.location_code,
            size_fallback: options.size_fallback,
            segment_count: options.segment_count,
        }
    }
}

impl EncoderSettings {
    pub fn options(&self) -> EncoderOptions {
        EncoderOptions {
            location_code: self.location_code.clone(),
            size_fallback: self.size_fallback,
            segment_count: self.segment_count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON-lines log file. The log is kept in memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxSettings {
    pub directory: PathBuf,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("outbox"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = transport::HttpTransportConfig::default();
        Self {
            timeout_ms: defaults.timeout.as_millis() as u64,
            max_retries: defaults.max_retries,
            retry_delay_ms: defaults.retry_delay.as_millis() as u64,
        }
    }
}

impl HttpSettings {
    pub fn transport_config(&self) -> transport::HttpTransportConfig {
        transport::HttpTransportConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcknowledgmentSettings {
    pub poll_interval_secs: u64,
    /// Delay after which the simulated source acknowledges a sent message.
    pub simulated_delay_secs: u64,
}

impl Default for AcknowledgmentSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            simulated_delay_secs: 2,
        }
    }
}

/// One partner as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerSettings {
    pub partner_code: String,
    /// Falls back to `encoder.sender_code`.
    #[serde(default)]
    pub sender_code: Option<String>,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default = "default_template")]
    pub file_name_template: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_port() -> u16 {
    22
}

fn default_template() -> String {
    DEFAULT_FILE_NAME_TEMPLATE.to_string()
}

impl GatewayConfig {
    /// Loads and validates the configuration.
    ///
    /// An explicitly given `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let config = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(required))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parses a TOML document. Environment variables are not consulted.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks every value the gateway depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if EnvFilter::try_new(&self.log.level).is_err() {
            return Err(ConfigError::invalid(
                "log.level",
                format!("'{}' is not a valid filter directive", self.log.level),
            ));
        }
        if self.bus.history_capacity == 0 {
            return Err(ConfigError::invalid("bus.history_capacity", "must be positive"));
        }
        if self.bus.handler_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("bus.handler_timeout_ms", "must be positive"));
        }
        if self.encoder.sender_code.trim().is_empty() {
            return Err(ConfigError::invalid("encoder.sender_code", "must not be empty"));
        }
        if self.encoder.location_code.trim().is_empty() {
            return Err(ConfigError::invalid("encoder.location_code", "must not be empty"));
        }
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::invalid("http.timeout_ms", "must be positive"));
        }
        if self.acknowledgment.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "acknowledgment.poll_interval_secs",
                "must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for (index, partner) in self.partners.iter().enumerate() {
            let field = |name: &str| format!("partners[{index}].{name}");
            if partner.partner_code.trim().is_empty() {
                return Err(ConfigError::invalid(field("partner_code"), "must not be empty"));
            }
            if !seen.insert(partner.partner_code.as_str()) {
                return Err(ConfigError::invalid(
                    field("partner_code"),
                    format!("'{}' is configured twice", partner.partner_code),
                ));
            }
            if partner
                .sender_code
                .as_deref()
                .is_some_and(|s| s.trim().is_empty())
            {
                return Err(ConfigError::invalid(field("sender_code"), "must not be empty"));
            }
            if partner.host.trim().is_empty() {
                return Err(ConfigError::invalid(field("host"), "must not be empty"));
            }
            if partner.file_name_template.trim().is_empty() {
                return Err(ConfigError::invalid(
                    field("file_name_template"),
                    "must not be empty",
                ));
            }
        }

        for (client, partner) in &self.clients {
            if partner.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("clients.{client}"),
                    "partner code must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Builds the partner registry, with a sandbox fallback that uses the
    /// configured sender code.
    pub fn registry(&self) -> PartnerRegistry {
        let mut fallback = PartnerConfig::sandbox_default();
        fallback.sender_code = self.encoder.sender_code.clone();
        let registry = PartnerRegistry::new(fallback);

        for partner in &self.partners {
            let Some(code) = PartnerCode::new(partner.partner_code.clone()) else {
                continue;
            };
            registry.register(
                code.clone(),
                PartnerConfig {
                    partner_code: code,
                    sender_code: partner
                        .sender_code
                        .clone()
                        .unwrap_or_else(|| self.encoder.sender_code.clone()),
                    endpoint: Endpoint {
                        host: partner.host.clone(),
                        port: partner.port,
                    },
                    credentials: Credentials {
                        username: partner.username.clone(),
                        password: partner.password.clone(),
                    },
                    remote_path: partner.remote_path.clone(),
                    file_name_template: partner.file_name_template.clone(),
                    sandbox: partner.sandbox,
                    transport: partner.transport,
                },
            );
        }

        for (client, partner) in &self.clients {
            if let Some(code) = PartnerCode::new(partner.clone()) {
                registry.map_client(client, code);
            }
        }
        registry
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.acknowledgment.poll_interval_secs)
    }

    pub fn simulated_ack_delay(&self) -> Duration {
        Duration::from_secs(self.acknowledgment.simulated_delay_secs)
    }
}
