//! Coordinator settings: local and backup layout, port, timeouts.
//!
//! Every setting can be given as a flag or a `GATEWAY_INIT_*` variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;

/// Gateway configuration document name.
pub const CONFIG_FILE: &str = "openclaw.json";

/// Document name used by the legacy backup layout.
pub const LEGACY_CONFIG_FILE: &str = "clawdbot.json";

/// Sync marker file name, both locally and in the backup store.
pub const MARKER_FILE: &str = ".last-sync";

/// Command-line / environment surface for [`BootstrapConfig`].
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Gateway state directory holding the configuration document.
    #[arg(long, env = "GATEWAY_INIT_CONFIG_DIR", default_value = "/root/.openclaw")]
    pub config_dir: PathBuf,

    /// Agent workspace directory.
    #[arg(long, env = "GATEWAY_INIT_WORKSPACE_DIR", default_value = "/root/clawd")]
    pub workspace_dir: PathBuf,

    /// Skills directory.
    #[arg(long, env = "GATEWAY_INIT_SKILLS_DIR", default_value = "/root/clawd/skills")]
    pub skills_dir: PathBuf,

    /// Mount point of the backup bucket.
    #[arg(long, env = "GATEWAY_INIT_BACKUP_ROOT", default_value = "/data/moltbot")]
    pub backup_root: PathBuf,

    /// Mutual-exclusion lock file.
    #[arg(long, env = "GATEWAY_INIT_LOCK_PATH", default_value = "/tmp/openclaw-gateway.lock")]
    pub lock_path: PathBuf,

    /// Port the gateway listens on.
    #[arg(long, env = "GATEWAY_INIT_PORT", default_value_t = claw_config_patch::DEFAULT_GATEWAY_PORT)]
    pub port: u16,

    /// Liveness probe timeout in milliseconds.
    #[arg(long, env = "GATEWAY_INIT_PROBE_TIMEOUT_MS", default_value_t = 2000)]
    pub probe_timeout_ms: u64,

    /// Per-tree restore timeout in seconds.
    #[arg(long, env = "GATEWAY_INIT_COPY_TIMEOUT_SECS", default_value_t = 60)]
    pub copy_timeout_secs: u64,

    /// Onboarding timeout in seconds.
    #[arg(long, env = "GATEWAY_INIT_ONBOARD_TIMEOUT_SECS", default_value_t = 120)]
    pub onboard_timeout_secs: u64,

    /// Gateway binary.
    #[arg(long, env = "GATEWAY_INIT_GATEWAY_BIN", default_value = "openclaw")]
    pub gateway_bin: String,

    /// Boot log of the coordinator itself.
    #[arg(long, env = "GATEWAY_INIT_LOG_PATH", default_value = "/tmp/gateway-init.log")]
    pub log_path: PathBuf,

    /// Output log of a gateway started in the background.
    #[arg(long, env = "GATEWAY_INIT_GATEWAY_LOG_PATH", default_value = "/tmp/openclaw-gateway.log")]
    pub gateway_log_path: PathBuf,
}

/// Resolved coordinator settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub config_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub backup_root: PathBuf,
    pub lock_path: PathBuf,
    pub port: u16,
    pub probe_timeout: Duration,
    pub copy_timeout: Duration,
    pub onboard_timeout: Duration,
    pub gateway_bin: String,
    pub log_path: PathBuf,
    pub gateway_log_path: PathBuf,
}

impl From<ConfigArgs> for BootstrapConfig {
    fn from(args: ConfigArgs) -> Self {
        Self {
            config_dir: args.config_dir,
            workspace_dir: args.workspace_dir,
            skills_dir: args.skills_dir,
            backup_root: args.backup_root,
            lock_path: args.lock_path,
            port: args.port,
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
            copy_timeout: Duration::from_secs(args.copy_timeout_secs),
            onboard_timeout: Duration::from_secs(args.onboard_timeout_secs),
            gateway_bin: args.gateway_bin,
            log_path: args.log_path,
            gateway_log_path: args.gateway_log_path,
        }
    }
}

impl BootstrapConfig {
    /// Layout rooted under one directory, used by tests and local runs.
    pub fn rooted(root: &Path, port: u16) -> Self {
        Self {
            config_dir: root.join("home/.openclaw"),
            workspace_dir: root.join("home/clawd"),
            skills_dir: root.join("home/clawd/skills"),
            backup_root: root.join("backup"),
            lock_path: root.join("run/openclaw-gateway.lock"),
            port,
            probe_timeout: Duration::from_millis(200),
            copy_timeout: Duration::from_secs(10),
            onboard_timeout: Duration::from_secs(10),
            gateway_bin: "openclaw".to_string(),
            log_path: root.join("run/gateway-init.log"),
            gateway_log_path: root.join("run/openclaw-gateway.log"),
        }
    }

    /// Local configuration document.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Local sync marker.
    pub fn local_marker(&self) -> PathBuf {
        self.config_dir.join(MARKER_FILE)
    }

    /// Credential store of the default agent.
    pub fn auth_store(&self) -> PathBuf {
        self.config_dir
            .join("agents")
            .join("main")
            .join("agent")
            .join("auth-profiles.json")
    }

    /// Backup mirror of the config tree.
    pub fn backup_config_dir(&self) -> PathBuf {
        self.backup_root.join("openclaw")
    }

    /// Config tree in the legacy backup layout.
    pub fn backup_legacy_config_dir(&self) -> PathBuf {
        self.backup_root.join("clawdbot")
    }

    pub fn backup_workspace_dir(&self) -> PathBuf {
        self.backup_root.join("workspace")
    }

    pub fn backup_skills_dir(&self) -> PathBuf {
        self.backup_root.join("skills")
    }

    /// Backup sync marker.
    pub fn backup_marker(&self) -> PathBuf {
        self.backup_root.join(MARKER_FILE)
    }
}
