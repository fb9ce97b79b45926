//! Partner configuration registry.
//!
//! Resolves which endpoint, credentials and file naming apply to a client or
//! partner code. Lookups never fail: an unknown partner or client resolves to
//! the `DEFAULT` sandbox configuration and the caller decides whether a
//! sandbox delivery is acceptable.
//!
//! The registry is read-mostly. Readers take a cheap snapshot of the whole
//! state; [`PartnerRegistry::register`] builds a new state and swaps it in
//! atomically, so no reader ever observes a partially-applied update.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ClientCode, ContainerNumber, MessageReference, OperationKind, PartnerCode, Timestamp};

/// Default file name template.
pub const DEFAULT_FILE_NAME_TEMPLATE: &str = "CODECO_{timestamp}_{container}_{operation}.edi";

/// Sender identification used by the built-in sandbox configuration.
pub const SANDBOX_SENDER_CODE: &str = "DEPOT";

// ---------------------------------------------------------------------------
// Configuration values
// ---------------------------------------------------------------------------

/// Remote host and port of a partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name, IP address or base URL.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Login for a partner endpoint.
///
/// `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Secret.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How messages for a partner leave the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Written into the local outbox directory for pickup.
    #[default]
    Outbox,
    /// Uploaded with an HTTP `PUT`.
    Http,
}

/// Per-partner transmission settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerConfig {
    /// Partner this configuration belongs to.
    pub partner_code: PartnerCode,
    /// Our identification towards this partner (`UNB` sender).
    pub sender_code: String,
    /// Remote endpoint.
    pub endpoint: Endpoint,
    /// Login for the endpoint.
    #[serde(default)]
    pub credentials: Credentials,
    /// Directory on the remote side.
    #[serde(default)]
    pub remote_path: String,
    /// File name template; see [`PartnerConfig::render_file_name`].
    #[serde(default = "default_template")]
    pub file_name_template: String,
    /// When `true`, deliveries are simulated.
    #[serde(default)]
    pub sandbox: bool,
    /// Delivery mechanism for live deliveries.
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_template() -> String {
    DEFAULT_FILE_NAME_TEMPLATE.to_string()
}

/// Values substituted into a file name template.
#[derive(Debug, Clone, Copy)]
pub struct FileNameContext<'a> {
    /// Operation time, rendered as `YYYYMMDDHHMMSS`.
    pub occurred_at: Timestamp,
    /// First container of the operation.
    pub container: &'a ContainerNumber,
    /// Gate-in or gate-out.
    pub operation: OperationKind,
    /// Message reference of the attempt.
    pub reference: &'a MessageReference,
}

impl PartnerConfig {
    /// The built-in `DEFAULT` sandbox configuration.
    pub fn sandbox_default() -> Self {
        Self {
            partner_code: PartnerCode::default_partner(),
            sender_code: SANDBOX_SENDER_CODE.to_string(),
            endpoint: Endpoint {
                host: "localhost".to_string(),
                port: 22,
            },
            credentials: Credentials::default(),
            remote_path: "/sandbox".to_string(),
            file_name_template: default_template(),
            sandbox: true,
            transport: TransportKind::Outbox,
        }
    }

    /// Expands the file name template.
    ///
    /// Known placeholders are `{timestamp}`, `{container}`, `{operation}`,
    /// `{sender}`, `{partner}` and `{reference}`. Unknown placeholders are
    /// left as written. Path separators in the result are replaced by `_`.
    pub fn render_file_name(&self, ctx: &FileNameContext<'_>) -> String {
        let template = if self.file_name_template.trim().is_empty() {
            DEFAULT_FILE_NAME_TEMPLATE
        } else {
            self.file_name_template.as_str()
        };
        template
            .replace("{timestamp}", &ctx.occurred_at.format("%Y%m%d%H%M%S"))
            .replace("{container}", ctx.container.as_str())
            .replace("{operation}", ctx.operation.token())
            .replace("{sender}", &self.sender_code)
            .replace("{partner}", self.partner_code.as_str())
            .replace("{reference}", ctx.reference.as_str())
            .replace(['/', '\\'], "_")
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RegistryState {
    partners: HashMap<PartnerCode, Arc<PartnerConfig>>,
    // Keys are lower-cased client names.
    clients: HashMap<String, PartnerCode>,
    fallback: Arc<PartnerConfig>,
}

/// Partner and client mapping lookups with a sandbox fallback.
///
/// Cloning is cheap; clones share the same state.
#[derive(Debug, Clone)]
pub struct PartnerRegistry {
    state: Arc<RwLock<Arc<RegistryState>>>,
}

impl Default for PartnerRegistry {
    fn default() -> Self {
        Self::new(PartnerConfig::sandbox_default())
    }
}

impl PartnerRegistry {
    /// Creates an empty registry with the given fallback configuration.
    ///
    /// The fallback is forced into sandbox mode.
    pub fn new(mut fallback: PartnerConfig) -> Self {
        fallback.sandbox = true;
        Self {
            state: Arc::new(RwLock::new(Arc::new(RegistryState {
                partners: HashMap::new(),
                clients: HashMap::new(),
                fallback: Arc::new(fallback),
            }))),
        }
    }

    /// Builds a registry from a partner list and a client mapping.
    ///
    /// A partner listed with code `DEFAULT` replaces the built-in fallback.
    pub fn from_parts(
        partners: impl IntoIterator<Item = PartnerConfig>,
        clients: impl IntoIterator<Item = (String, PartnerCode)>,
    ) -> Self {
        let registry = Self::default();
        for partner in partners {
            let code = partner.partner_code.clone();
            registry.register(code, partner);
        }
        for (client, partner) in clients {
            registry.map_client(&client, partner);
        }
        registry
    }

    fn snapshot(&self) -> Arc<RegistryState> {
        Arc::clone(&self.state.read())
    }

    fn update(&self, apply: impl FnOnce(&mut RegistryState)) {
        let mut guard = self.state.write();
        let mut next = RegistryState::clone(&guard);
        apply(&mut next);
        *guard = Arc::new(next);
    }

    /// Configuration for `partner_code`, or the sandbox fallback.
    pub fn config(&self, partner_code: &PartnerCode) -> Arc<PartnerConfig> {
        let state = self.snapshot();
        match state.partners.get(partner_code) {
            Some(config) => Arc::clone(config),
            None => {
                if !partner_code.is_default() {
                    debug!(partner_code = %partner_code, "Unknown partner; using sandbox fallback");
                }
                Arc::clone(&state.fallback)
            }
        }
    }

    /// Partner code mapped to `client`, or `DEFAULT`.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    pub fn partner_code_for_client(&self, client: &str) -> PartnerCode {
        let key = client.trim().to_lowercase();
        self.snapshot()
            .clients
            .get(&key)
            .cloned()
            .unwrap_or_else(PartnerCode::default_partner)
    }

    /// Partner code and configuration for a container's client.
    pub fn resolve_for_client(&self, client: &ClientCode) -> (PartnerCode, Arc<PartnerConfig>) {
        let code = self.partner_code_for_client(client.as_str());
        let config = self.config(&code);
        (code, config)
    }

    /// Adds or replaces the configuration for `partner_code`.
    ///
    /// Registering `DEFAULT` replaces the fallback, which stays in sandbox
    /// mode.
    pub fn register(&self, partner_code: PartnerCode, mut config: PartnerConfig) {
        config.partner_code = partner_code.clone();
        info!(
            partner_code = %partner_code,
            sandbox = config.sandbox,
            transport = ?config.transport,
            "Registering partner configuration"
        );
        self.update(|state| {
            if partner_code.is_default() {
                config.sandbox = true;
                state.fallback = Arc::new(config);
            } else {
                state.partners.insert(partner_code, Arc::new(config));
            }
        });
    }

    /// Maps a client name to a partner code.
    pub fn map_client(&self, client: &str, partner_code: PartnerCode) {
        let key = client.trim().to_lowercase();
        self.update(|state| {
            state.clients.insert(key, partner_code);
        });
    }

    /// Registered partner codes, sorted.
    pub fn partner_codes(&self) -> Vec<PartnerCode> {
        let mut codes: Vec<_> = self.snapshot().partners.keys().cloned().collect();
        codes.sort();
        codes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn live(code: &str) -> PartnerConfig {
        PartnerConfig {
            partner_code: PartnerCode::new(code).unwrap(),
            sender_code: "DEPOT1".to_string(),
            endpoint: Endpoint {
                host: "edi.example.net".to_string(),
                port: 443,
            },
            credentials: Credentials {
                username: "depot".to_string(),
                password: "s3cret".to_string(),
            },
            remote_path: "/inbound".to_string(),
            file_name_template: DEFAULT_FILE_NAME_TEMPLATE.to_string(),
            sandbox: false,
            transport: TransportKind::Http,
        }
    }

    #[test]
    fn test_unknown_partner_falls_back_to_sandbox() {
        let registry = PartnerRegistry::default();
        let config = registry.config(&PartnerCode::new("NOPE").unwrap());

        assert!(config.partner_code.is_default());
        assert!(config.sandbox);
    }

    #[test]
    fn test_client_mapping_is_case_insensitive() {
        let registry = PartnerRegistry::from_parts(
            [live("MAEU")],
            [("Maersk Line".to_string(), PartnerCode::new("MAEU").unwrap())],
        );

        assert_eq!(registry.partner_code_for_client(" maersk line ").as_str(), "MAEU");
        assert!(registry.partner_code_for_client("Unknown Co").is_default());

        let (code, config) = registry.resolve_for_client(&ClientCode::new("MAERSK LINE").unwrap());
        assert_eq!(code.as_str(), "MAEU");
        assert!(!config.sandbox);
    }

    #[test]
    fn test_register_replaces_atomically() {
        let registry = PartnerRegistry::default();
        let code = PartnerCode::new("CMDU").unwrap();
        registry.register(code.clone(), live("CMDU"));

        let before = registry.config(&code);
        let mut changed = live("CMDU");
        changed.remote_path = "/v2".to_string();
        registry.register(code.clone(), changed);

        assert_eq!(before.remote_path, "/inbound");
        assert_eq!(registry.config(&code).remote_path, "/v2");
    }

    #[test]
    fn test_registering_default_keeps_sandbox() {
        let registry = PartnerRegistry::default();
        let mut fallback = live("DEFAULT");
        fallback.remote_path = "/test".to_string();
        registry.register(PartnerCode::default_partner(), fallback);

        let config = registry.config(&PartnerCode::new("ANY").unwrap());
        assert_eq!(config.remote_path, "/test");
        assert!(config.sandbox);
        assert!(registry.partner_codes().is_empty());
    }

    #[test]
    fn test_render_file_name() {
        let config = live("MAEU");
        let number = ContainerNumber::new("MSKU1234567").unwrap();
        let reference = MessageReference::new("COD10180916001").unwrap();
        let ctx = FileNameContext {
            occurred_at: Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 10, 18, 9, 15, 30).unwrap()),
            container: &number,
            operation: OperationKind::GateIn,
            reference: &reference,
        };

        assert_eq!(
            config.render_file_name(&ctx),
            "CODECO_20261018091530_MSKU1234567_GATE_IN.edi"
        );

        let mut custom = config.clone();
        custom.file_name_template = "{sender}/{partner}_{reference}.edi".to_string();
        assert_eq!(custom.render_file_name(&ctx), "DEPOT1_MAEU_COD10180916001.edi");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", live("MAEU").credentials);
        assert!(rendered.contains("depot"));
        assert!(!rendered.contains("s3cret"));
    }
}
