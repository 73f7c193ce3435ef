//! Environment snapshot consumed by the patch and onboarding steps.
//!
//! Empty variables are treated as unset.

/// AI gateway proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiGatewayEnv {
    pub api_key: Option<String>,
    pub account_id: Option<String>,
    pub gateway_id: Option<String>,
    /// Model override in `provider/model-id` form.
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelegramEnv {
    pub bot_token: Option<String>,
    pub dm_policy: Option<String>,
    /// Comma-separated sender ids.
    pub dm_allow_from: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscordEnv {
    pub bot_token: Option<String>,
    pub dm_policy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlackEnv {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
}

/// Snapshot of every environment variable the bootstrap reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayEnv {
    /// Shared token required by gateway clients.
    pub gateway_token: Option<String>,

    /// Relaxes control UI auth for local development.
    pub dev_mode: bool,

    /// Bind mode passed to the gateway (`lan`, `loopback`, ...).
    pub bind_mode: Option<String>,

    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_api_key: Option<String>,

    pub ai_gateway: AiGatewayEnv,
    pub telegram: TelegramEnv,
    pub discord: DiscordEnv,
    pub slack: SlackEnv,

    /// One-time setup token written to the credential store if absent.
    pub setup_token: Option<String>,
}

impl GatewayEnv {
    /// Snapshot the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a snapshot from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            gateway_token: get("OPENCLAW_GATEWAY_TOKEN"),
            dev_mode: get("OPENCLAW_DEV_MODE")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            bind_mode: get("OPENCLAW_BIND_MODE"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL"),
            openai_api_key: get("OPENAI_API_KEY"),
            ai_gateway: AiGatewayEnv {
                api_key: get("CLOUDFLARE_AI_GATEWAY_API_KEY"),
                account_id: get("CF_AI_GATEWAY_ACCOUNT_ID"),
                gateway_id: get("CF_AI_GATEWAY_GATEWAY_ID"),
                model: get("CF_AI_GATEWAY_MODEL"),
            },
            telegram: TelegramEnv {
                bot_token: get("TELEGRAM_BOT_TOKEN"),
                dm_policy: get("TELEGRAM_DM_POLICY"),
                dm_allow_from: get("TELEGRAM_DM_ALLOW_FROM"),
            },
            discord: DiscordEnv {
                bot_token: get("DISCORD_BOT_TOKEN"),
                dm_policy: get("DISCORD_DM_POLICY"),
            },
            slack: SlackEnv {
                bot_token: get("SLACK_BOT_TOKEN"),
                app_token: get("SLACK_APP_TOKEN"),
            },
            setup_token: get("CLAUDE_SETUP_TOKEN"),
        }
    }

    /// Bind mode, defaulting to `lan`.
    pub fn bind_mode(&self) -> &str {
        self.bind_mode.as_deref().unwrap_or("lan")
    }

    /// True when some credential for the Anthropic family is present.
    pub fn has_anthropic_credential(&self) -> bool {
        self.anthropic_api_key.is_some() || self.setup_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> GatewayEnv {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayEnv::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_empty_values_are_unset() {
        let env = lookup(&[("ANTHROPIC_API_KEY", ""), ("OPENAI_API_KEY", "  ")]);
        assert!(env.anthropic_api_key.is_none());
        assert!(env.openai_api_key.is_none());
    }

    #[test]
    fn test_dev_mode_flag() {
        assert!(lookup(&[("OPENCLAW_DEV_MODE", "true")]).dev_mode);
        assert!(lookup(&[("OPENCLAW_DEV_MODE", "1")]).dev_mode);
        assert!(!lookup(&[("OPENCLAW_DEV_MODE", "false")]).dev_mode);
        assert!(!lookup(&[]).dev_mode);
    }

    #[test]
    fn test_channel_and_gateway_vars() {
        let env = lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("DISCORD_DM_POLICY", "open"),
            ("CF_AI_GATEWAY_MODEL", "anthropic/claude-sonnet-4-5"),
        ]);
        assert_eq!(env.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(env.discord.dm_policy.as_deref(), Some("open"));
        assert_eq!(
            env.ai_gateway.model.as_deref(),
            Some("anthropic/claude-sonnet-4-5")
        );
        assert_eq!(env.bind_mode(), "lan");
    }
}
