//! Credential selection for first-boot onboarding.

use crate::GatewayEnv;

/// Credentials handed to the gateway's non-interactive onboarding.
#[derive(Clone, PartialEq, Eq)]
pub enum OnboardAuth {
    /// AI gateway proxy in front of the model providers.
    AiGateway {
        account_id: String,
        gateway_id: String,
        api_key: String,
    },
    Anthropic { api_key: String },
    OpenAi { api_key: String },
    /// No credentials; the gateway starts unconfigured.
    None,
}

// Keys never appear in logs.
impl std::fmt::Debug for OnboardAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OnboardAuth({})", self.label())
    }
}

impl OnboardAuth {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AiGateway { .. } => "ai-gateway",
            Self::Anthropic { .. } => "anthropic",
            Self::OpenAi { .. } => "openai",
            Self::None => "none",
        }
    }

    /// Auth arguments for `openclaw onboard`.
    pub fn args(&self) -> Vec<String> {
        let args: Vec<&str> = match self {
            Self::AiGateway {
                account_id,
                gateway_id,
                api_key,
            } => vec![
                "--auth-choice",
                "cloudflare-ai-gateway-api-key",
                "--cloudflare-ai-gateway-account-id",
                account_id.as_str(),
                "--cloudflare-ai-gateway-gateway-id",
                gateway_id.as_str(),
                "--cloudflare-ai-gateway-api-key",
                api_key.as_str(),
            ],
            Self::Anthropic { api_key } => {
                vec!["--auth-choice", "apiKey", "--anthropic-api-key", api_key.as_str()]
            }
            Self::OpenAi { api_key } => {
                vec!["--auth-choice", "openai-api-key", "--openai-api-key", api_key.as_str()]
            }
            Self::None => vec![],
        };
        args.into_iter().map(str::to_string).collect()
    }
}

/// Pick onboarding credentials: AI gateway proxy key, then the primary
/// provider key, then the secondary provider key.
///
/// The proxy key only counts when its account and gateway ids are present.
pub fn select_onboard_auth(env: &GatewayEnv) -> OnboardAuth {
    let gw = &env.ai_gateway;
    if let (Some(api_key), Some(account_id), Some(gateway_id)) =
        (&gw.api_key, &gw.account_id, &gw.gateway_id)
    {
        return OnboardAuth::AiGateway {
            account_id: account_id.clone(),
            gateway_id: gateway_id.clone(),
            api_key: api_key.clone(),
        };
    }
    if let Some(api_key) = &env.anthropic_api_key {
        return OnboardAuth::Anthropic {
            api_key: api_key.clone(),
        };
    }
    if let Some(api_key) = &env.openai_api_key {
        return OnboardAuth::OpenAi {
            api_key: api_key.clone(),
        };
    }
    OnboardAuth::None
}
