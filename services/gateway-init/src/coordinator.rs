//! The bootstrap sequence.
//!
//! `ensure_running` is safe to call from any number of processes at once.
//! It returns early when the gateway already listens, otherwise it takes the
//! bootstrap lock and runs, strictly in order:
//!
//! 1. Restore from backup when the backup marker is newer
//! 2. Onboard when no configuration document exists
//! 3. Patch the document from the environment
//! 4. Inject the setup token into the credential store
//! 5. Persist the document once
//! 6. Release the lock and launch the gateway
//!
//! Restore, onboarding and credential injection failures are logged and the
//! sequence continues. Lock, persist and launch failures abort it.

use std::sync::Arc;

use claw_config_patch::credentials::{self, Injection};
use claw_config_patch::{select_onboard_auth, GatewayEnv, PatchSettings};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::BootstrapConfig;
use crate::document;
use crate::error::BootstrapError;
use crate::gateway::{Gateway, LaunchPlan, OnboardPlan};
use crate::health;
use crate::lock;
use crate::restore::{self, RestoreOutcome};

/// Result of a successful `ensure_running` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The gateway port was already accepting connections.
    AlreadyRunning,
    /// This call launched the gateway.
    Started { pid: u32 },
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::AlreadyRunning => write!(f, "already_running"),
            Outcome::Started { pid } => write!(f, "started pid={}", pid),
        }
    }
}

/// Runs the bootstrap sequence against one gateway implementation.
pub struct Coordinator {
    config: BootstrapConfig,
    env: GatewayEnv,
    settings: PatchSettings,
    gateway: Arc<dyn Gateway>,
}

impl Coordinator {
    pub fn new(config: BootstrapConfig, env: GatewayEnv, gateway: Arc<dyn Gateway>) -> Self {
        let settings = PatchSettings {
            port: config.port,
            ..PatchSettings::default()
        };
        Self {
            config,
            env,
            settings,
            gateway,
        }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Make sure exactly one gateway is running.
    pub async fn ensure_running(&self) -> Result<Outcome, BootstrapError> {
        let port = self.config.port;

        if health::probe(port, self.config.probe_timeout).await.is_listening() {
            info!(port, "gateway already listening");
            return Ok(Outcome::AlreadyRunning);
        }

        let guard = lock::acquire(&self.config.lock_path)?;

        // A gateway launched by the previous holder may have come up while
        // the lock was being acquired.
        if health::probe(port, self.config.probe_timeout).await.is_listening() {
            info!(port, "gateway came up while acquiring lock");
            guard.release();
            return Ok(Outcome::AlreadyRunning);
        }

        info!(port, lock = %guard.path().display(), "bootstrapping gateway");

        match restore::restore_if_newer(&self.config).await {
            RestoreOutcome::Restored { failed, .. } if !failed.is_empty() => {
                warn!(failed = ?failed, "continuing with partially restored state");
            }
            outcome => debug!(outcome = ?outcome, "restore step finished"),
        }

        self.onboard_if_unconfigured().await;

        let config_path = self.config.config_file();
        let mut doc = document::load_or_quarantine(&config_path)?;

        let report = claw_config_patch::apply(&mut doc, &self.env, &self.settings);
        if !report.is_clean() {
            info!(
                dropped = report.dropped.len(),
                cleared = report.cleared.len(),
                "configuration cleaned up"
            );
        }

        if let Some(token) = &self.env.setup_token {
            self.inject_setup_token(&mut doc, token);
        }

        document::persist(&config_path, &doc)?;

        let plan = LaunchPlan {
            port,
            bind: self.env.bind_mode().to_string(),
            token: self.env.gateway_token.clone(),
        };
        let pid = self.gateway.launch(&plan, guard).await?;
        Ok(Outcome::Started { pid })
    }

    async fn onboard_if_unconfigured(&self) {
        let config_path = self.config.config_file();
        if config_path.exists() {
            debug!(path = %config_path.display(), "configuration present, skipping onboarding");
            return;
        }

        let plan = OnboardPlan {
            auth: select_onboard_auth(&self.env),
            port: self.config.port,
        };
        info!(auth = plan.auth.label(), "no configuration found, onboarding");

        match self.gateway.onboard(&plan).await {
            Ok(()) if config_path.exists() => info!("onboarding complete"),
            Ok(()) => warn!("onboarding finished without writing a configuration"),
            Err(e) => warn!(error = %e, "onboarding failed, continuing with empty configuration"),
        }
    }

    fn inject_setup_token(&self, doc: &mut Value, token: &str) {
        let store_path = self.config.auth_store();
        let store = match document::load(&store_path) {
            Ok(Some(store)) => store,
            Ok(None) => credentials::empty_store(),
            Err(e) => {
                // Never rewrite a store that could hold credentials we
                // cannot read.
                warn!(path = %store_path.display(), error = %e, "credential store unreadable, skipping setup token");
                return;
            }
        };

        match stage_setup_token(doc, store, token, |store| document::persist(&store_path, store)) {
            Ok(Injection::AlreadyPresent) => {
                debug!(profile = credentials::SETUP_PROFILE_ID, "credential already present")
            }
            Ok(Injection::Written) => info!(profile = credentials::SETUP_PROFILE_ID, "setup token stored"),
            Err(e) => warn!(error = %e, "failed to store setup token"),
        }
    }
}

/// Inject the setup token, committing the document's profile stub only once
/// the credential store holding the token has been persisted.
fn stage_setup_token<F>(
    doc: &mut Value,
    mut store: Value,
    token: &str,
    persist_store: F,
) -> Result<Injection, BootstrapError>
where
    F: FnOnce(&Value) -> Result<(), BootstrapError>,
{
    let mut staged = doc.clone();
    let injection = credentials::inject_setup_token(&mut store, &mut staged, token);
    if injection == Injection::Written {
        persist_store(&store)?;
    }
    *doc = staged;
    Ok(injection)
}
