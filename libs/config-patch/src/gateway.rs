//! Network bind, auth token and control UI settings.

use serde_json::{json, Value};

use crate::{child, object_entry, GatewayEnv, PatchReport, PatchSettings};

/// Patch the `gateway` block.
pub fn patch(doc: &mut Value, env: &GatewayEnv, settings: &PatchSettings, report: &mut PatchReport) {
    let gateway = object_entry(doc, "gateway");
    gateway.insert("port".to_string(), json!(settings.port));
    gateway.insert("mode".to_string(), json!("local"));
    gateway.insert(
        "trustedProxies".to_string(),
        json!(settings.trusted_proxies),
    );

    if let Some(token) = &env.gateway_token {
        child(gateway, "auth").insert("token".to_string(), json!(token));
    }

    if env.dev_mode {
        child(gateway, "controlUi").insert("allowInsecureAuth".to_string(), json!(true));
    } else if let Some(ui) = gateway.get_mut("controlUi").and_then(Value::as_object_mut) {
        // Restored from a dev-mode backup.
        if ui.remove("allowInsecureAuth").is_some() {
            report
                .cleared
                .push("gateway.controlUi.allowInsecureAuth".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(doc: &mut Value, env: &GatewayEnv) -> PatchReport {
        let mut report = PatchReport::default();
        patch(doc, env, &PatchSettings::default(), &mut report);
        report
    }

    #[test]
    fn test_sets_bind_parameters() {
        let mut doc = json!({});
        run(&mut doc, &GatewayEnv::default());
        assert_eq!(doc["gateway"]["port"], json!(18789));
        assert_eq!(doc["gateway"]["mode"], json!("local"));
        assert_eq!(doc["gateway"]["trustedProxies"], json!(["10.1.0.0"]));
        assert!(doc["gateway"].get("auth").is_none());
    }

    #[test]
    fn test_token_preserves_other_auth_fields() {
        let mut doc = json!({ "gateway": { "auth": { "mode": "token" }, "bind": "lan" } });
        let env = GatewayEnv {
            gateway_token: Some("secret".to_string()),
            ..Default::default()
        };
        run(&mut doc, &env);
        assert_eq!(doc["gateway"]["auth"], json!({ "mode": "token", "token": "secret" }));
        assert_eq!(doc["gateway"]["bind"], json!("lan"));
    }

    #[test]
    fn test_dev_mode_toggle() {
        let mut doc = json!({});
        let dev = GatewayEnv {
            dev_mode: true,
            ..Default::default()
        };
        run(&mut doc, &dev);
        assert_eq!(doc["gateway"]["controlUi"]["allowInsecureAuth"], json!(true));

        let report = run(&mut doc, &GatewayEnv::default());
        assert!(doc["gateway"]["controlUi"].get("allowInsecureAuth").is_none());
        assert_eq!(report.cleared, vec!["gateway.controlUi.allowInsecureAuth"]);
    }
}
