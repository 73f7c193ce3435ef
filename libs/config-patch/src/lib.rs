//! Configuration patching for the agent gateway.
//!
//! The gateway reads a single JSON document. On every boot the bootstrap
//! coordinator loads that document once, runs it through the pure
//! transformations in this crate, and persists the result once.
//!
//! # Invariants
//!
//! - Every transformation is idempotent: applying [`apply`] twice yields the
//!   same document as applying it once.
//! - Persisted channel fields outside the channel's allow-list are dropped,
//!   never silently kept. Every drop is reported in the [`PatchReport`].
//! - References to providers whose credentials are no longer present are
//!   cleared rather than left dangling.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

pub mod channels;
pub mod credentials;
pub mod env;
pub mod gateway;
pub mod models;
pub mod onboard;

pub use env::GatewayEnv;
pub use onboard::{select_onboard_auth, OnboardAuth};

/// Default gateway listen port.
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

/// Patch errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    /// Model reference was not in `provider/model-id` form.
    #[error("invalid model reference '{0}': expected provider/model-id")]
    InvalidModelRef(String),

    /// A required companion variable is missing.
    #[error("missing {0}")]
    MissingSetting(&'static str),
}

/// Settings that do not come from the environment snapshot.
#[derive(Debug, Clone)]
pub struct PatchSettings {
    /// Port the gateway listens on.
    pub port: u16,

    /// Proxy addresses the gateway trusts for forwarded headers.
    pub trusted_proxies: Vec<String>,
}

impl Default for PatchSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_GATEWAY_PORT,
            trusted_proxies: vec!["10.1.0.0".to_string()],
        }
    }
}

/// What a patch pass removed from the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Dotted paths of persisted keys dropped by allow-list filtering.
    pub dropped: Vec<String>,

    /// Dotted paths of stale references that were cleared.
    pub cleared: Vec<String>,

    /// Non-fatal problems with the environment (skipped sections).
    pub warnings: Vec<String>,
}

impl PatchReport {
    /// True when nothing was dropped or cleared.
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.cleared.is_empty()
    }
}

/// Apply every environment-derived patch to the document.
///
/// A document that is not a JSON object is replaced by an empty object
/// before patching.
pub fn apply(doc: &mut Value, env: &GatewayEnv, settings: &PatchSettings) -> PatchReport {
    let mut report = PatchReport::default();

    if !doc.is_object() {
        report.cleared.push("<root>".to_string());
        *doc = Value::Object(Map::new());
    }

    gateway::patch(doc, env, settings, &mut report);
    models::patch(doc, env, &mut report);
    channels::patch(doc, env, &mut report);
    models::clear_stale_refs(doc, env, &mut report);

    for path in &report.dropped {
        info!(path = %path, "dropped unsupported config key");
    }
    for path in &report.cleared {
        info!(path = %path, "cleared stale config reference");
    }
    for warning in &report.warnings {
        warn!(warning = %warning, "config patch skipped a setting");
    }

    report
}

/// Coerce a value into an object, replacing anything else with `{}`.
pub(crate) fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

/// Get `map[key]` as an object, creating or replacing it as needed.
pub(crate) fn child<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    as_object(
        map.entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new())),
    )
}

/// Get `doc[key]` as an object.
pub(crate) fn object_entry<'a>(doc: &'a mut Value, key: &str) -> &'a mut Map<String, Value> {
    child(as_object(doc), key)
}

/// Read a string at a dotted path.
pub(crate) fn str_at<'a>(doc: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cursor = doc;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor.as_str()
}
