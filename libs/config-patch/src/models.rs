//! Model provider overrides and stale model references.

use serde_json::{json, Value};

use crate::{child, object_entry, str_at, GatewayEnv, PatchError, PatchReport};

/// Prefix for providers registered from the AI gateway override.
pub const AI_GATEWAY_PROVIDER_PREFIX: &str = "cf-ai-gw-";

const AI_GATEWAY_BASE: &str = "https://gateway.ai.cloudflare.com/v1";

/// A `provider/model-id` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub model_id: String,
}

impl ModelRef {
    /// Parse `provider/model-id`. The model id may itself contain slashes.
    pub fn parse(raw: &str) -> Result<Self, PatchError> {
        match raw.trim().split_once('/') {
            Some((provider, model_id)) if !provider.is_empty() && !model_id.is_empty() => {
                Ok(Self {
                    provider: provider.to_string(),
                    model_id: model_id.to_string(),
                })
            }
            _ => Err(PatchError::InvalidModelRef(raw.to_string())),
        }
    }
}

/// Provider entry for an AI gateway model override.
pub fn ai_gateway_provider(
    model: &ModelRef,
    account_id: &str,
    gateway_id: &str,
    api_key: Option<&str>,
) -> Value {
    let mut base_url = format!(
        "{AI_GATEWAY_BASE}/{account_id}/{gateway_id}/{}",
        model.provider
    );
    if model.provider == "workers-ai" {
        base_url.push_str("/v1");
    }
    let api = if model.provider == "anthropic" {
        "anthropic-messages"
    } else {
        "openai-completions"
    };

    let mut provider = json!({
        "baseUrl": base_url,
        "api": api,
        "models": [{
            "id": model.model_id,
            "name": model.model_id,
            "contextWindow": 131072,
            "maxTokens": 8192
        }]
    });
    if let Some(key) = api_key {
        provider["apiKey"] = json!(key);
    }
    provider
}

/// Register provider overrides derived from the environment.
pub fn patch(doc: &mut Value, env: &GatewayEnv, report: &mut PatchReport) {
    if let Some(raw) = &env.ai_gateway.model {
        match ai_gateway_override(env, raw) {
            Ok((name, provider, primary)) => {
                let models = object_entry(doc, "models");
                child(models, "providers").insert(name, provider);
                let agents = object_entry(doc, "agents");
                let defaults = child(agents, "defaults");
                child(defaults, "model").insert("primary".to_string(), json!(primary));
            }
            Err(e) => report.warnings.push(format!("CF_AI_GATEWAY_MODEL ignored: {e}")),
        }
    }

    if let (Some(base_url), Some(_)) = (&env.anthropic_base_url, &env.anthropic_api_key) {
        let models = object_entry(doc, "models");
        let anthropic = child(child(models, "providers"), "anthropic");
        anthropic.insert("baseUrl".to_string(), json!(base_url));
        anthropic.insert("api".to_string(), json!("anthropic-messages"));
        anthropic
            .entry("models".to_string())
            .or_insert_with(|| json!([]));
    }
}

fn ai_gateway_override(env: &GatewayEnv, raw: &str) -> Result<(String, Value, String), PatchError> {
    let model = ModelRef::parse(raw)?;
    let account = env
        .ai_gateway
        .account_id
        .as_deref()
        .ok_or(PatchError::MissingSetting("CF_AI_GATEWAY_ACCOUNT_ID"))?;
    let gateway = env
        .ai_gateway
        .gateway_id
        .as_deref()
        .ok_or(PatchError::MissingSetting("CF_AI_GATEWAY_GATEWAY_ID"))?;

    let name = format!("{AI_GATEWAY_PROVIDER_PREFIX}{}", model.provider);
    let provider = ai_gateway_provider(&model, account, gateway, env.ai_gateway.api_key.as_deref());
    let primary = format!("{name}/{}", model.model_id);
    Ok((name, provider, primary))
}

/// Name of the AI gateway provider the environment currently asks for.
fn active_ai_gateway_provider(env: &GatewayEnv) -> Option<String> {
    let raw = env.ai_gateway.model.as_deref()?;
    env.ai_gateway.account_id.as_ref()?;
    env.ai_gateway.gateway_id.as_ref()?;
    let model = ModelRef::parse(raw).ok()?;
    Some(format!("{AI_GATEWAY_PROVIDER_PREFIX}{}", model.provider))
}

/// Clear providers and default-model pointers whose credentials are gone.
pub fn clear_stale_refs(doc: &mut Value, env: &GatewayEnv, report: &mut PatchReport) {
    let active = active_ai_gateway_provider(env);

    if let Some(providers) = doc
        .get_mut("models")
        .and_then(|m| m.get_mut("providers"))
        .and_then(Value::as_object_mut)
    {
        let stale: Vec<String> = providers
            .keys()
            .filter(|name| name.starts_with(AI_GATEWAY_PROVIDER_PREFIX))
            .filter(|name| active.as_deref() != Some(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            providers.remove(&name);
            report.cleared.push(format!("models.providers.{name}"));
        }
    }

    let Some(primary) = str_at(doc, &["agents", "defaults", "model", "primary"]) else {
        return;
    };
    let family = primary.split_once('/').map(|(p, _)| p).unwrap_or(primary);
    let registered = doc
        .get("models")
        .and_then(|m| m.get("providers"))
        .and_then(|p| p.get(family))
        .is_some();

    let stale = if family.starts_with(AI_GATEWAY_PROVIDER_PREFIX) {
        !registered
    } else {
        match family {
            "anthropic" => !env.has_anthropic_credential() && !registered,
            "openai" => env.openai_api_key.is_none() && !registered,
            _ => false,
        }
    };

    if stale {
        if let Some(model) = doc
            .get_mut("agents")
            .and_then(|a| a.get_mut("defaults"))
            .and_then(|d| d.get_mut("model"))
            .and_then(Value::as_object_mut)
        {
            model.remove("primary");
        }
        report
            .cleared
            .push("agents.defaults.model.primary".to_string());
    }
}
