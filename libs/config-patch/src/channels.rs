//! Channel integration blocks with allow-list merging.
//!
//! Persisted channel blocks may come from an older backup written by a
//! different gateway version. Fields outside the known-valid set would fail
//! the gateway's schema validation, so they are dropped before environment
//! values are overlaid. Fields inside the set are user customizations and
//! are kept.

use serde_json::{json, Map, Value};

use crate::{child, object_entry, GatewayEnv, PatchReport};

/// Known-valid keys for one channel block.
pub struct ChannelSchema {
    pub name: &'static str,
    pub keys: &'static [&'static str],
    /// Keys holding nested objects that are filtered with their own set.
    pub nested: &'static [(&'static str, &'static [&'static str])],
}

pub const TELEGRAM: ChannelSchema = ChannelSchema {
    name: "telegram",
    keys: &[
        "enabled",
        "botToken",
        "tokenFile",
        "dmPolicy",
        "allowFrom",
        "groupPolicy",
        "groupAllowFrom",
        "groups",
        "replyToMode",
        "streamMode",
        "textChunkLimit",
        "mediaMaxMb",
        "proxy",
        "webhookUrl",
        "webhookSecret",
        "webhookPath",
        "actions",
        "capabilities",
        "configWrites",
    ],
    nested: &[],
};

pub const DISCORD: ChannelSchema = ChannelSchema {
    name: "discord",
    keys: &[
        "enabled",
        "token",
        "dm",
        "guilds",
        "groupPolicy",
        "replyToMode",
        "textChunkLimit",
        "mediaMaxMb",
        "historyLimit",
        "actions",
        "capabilities",
        "configWrites",
    ],
    nested: &[(
        "dm",
        &["enabled", "policy", "allowFrom", "groupEnabled", "groupChannels"],
    )],
};

pub const SLACK: ChannelSchema = ChannelSchema {
    name: "slack",
    keys: &[
        "enabled",
        "mode",
        "botToken",
        "appToken",
        "signingSecret",
        "dm",
        "channels",
        "groupPolicy",
        "replyToMode",
        "textChunkLimit",
        "mediaMaxMb",
        "historyLimit",
        "actions",
        "slashCommand",
        "capabilities",
        "configWrites",
    ],
    nested: &[(
        "dm",
        &["enabled", "policy", "allowFrom", "groupEnabled", "groupChannels"],
    )],
};

/// Every schema this crate knows.
pub const SCHEMAS: &[&ChannelSchema] = &[&TELEGRAM, &DISCORD, &SLACK];

/// Filter a persisted block down to the schema's key set.
///
/// Returns the dotted paths of dropped keys.
pub fn filter_block(schema: &ChannelSchema, block: &mut Map<String, Value>) -> Vec<String> {
    let mut dropped = Vec::new();
    let prefix = format!("channels.{}", schema.name);

    block.retain(|key, _| {
        let keep = schema.keys.contains(&key.as_str());
        if !keep {
            dropped.push(format!("{prefix}.{key}"));
        }
        keep
    });

    for (key, allowed) in schema.nested {
        if let Some(Value::Object(inner)) = block.get_mut(*key) {
            inner.retain(|inner_key, _| {
                let keep = allowed.contains(&inner_key.as_str());
                if !keep {
                    dropped.push(format!("{prefix}.{key}.{inner_key}"));
                }
                keep
            });
        }
    }

    dropped.sort();
    dropped
}

/// Patch all channel blocks.
pub fn patch(doc: &mut Value, env: &GatewayEnv, report: &mut PatchReport) {
    let wants_any = env.telegram.bot_token.is_some()
        || env.discord.bot_token.is_some()
        || env.slack.bot_token.is_some();
    let has_channels = doc.get("channels").is_some_and(Value::is_object);
    if !wants_any && !has_channels {
        return;
    }

    let channels = object_entry(doc, "channels");

    for schema in SCHEMAS {
        if let Some(Value::Object(block)) = channels.get_mut(schema.name) {
            report.dropped.extend(filter_block(schema, block));
        }
    }

    if let Some(token) = &env.telegram.bot_token {
        let block = child(channels, TELEGRAM.name);
        let policy = env.telegram.dm_policy.as_deref().unwrap_or("pairing");
        block.insert("botToken".to_string(), json!(token));
        block.insert("enabled".to_string(), json!(true));
        block.insert("dmPolicy".to_string(), json!(policy));
        if let Some(allow) = &env.telegram.dm_allow_from {
            block.insert("allowFrom".to_string(), json!(split_list(allow)));
        } else if policy == "open" {
            block.insert("allowFrom".to_string(), json!(["*"]));
        }
    }

    if let Some(token) = &env.discord.bot_token {
        let block = child(channels, DISCORD.name);
        let policy = env.discord.dm_policy.as_deref().unwrap_or("pairing");
        block.insert("token".to_string(), json!(token));
        block.insert("enabled".to_string(), json!(true));
        let dm = child(block, "dm");
        dm.insert("policy".to_string(), json!(policy));
        if policy == "open" {
            dm.insert("allowFrom".to_string(), json!(["*"]));
        }
    }

    if let Some(token) = &env.slack.bot_token {
        let block = child(channels, SLACK.name);
        block.insert("botToken".to_string(), json!(token));
        block.insert("enabled".to_string(), json!(true));
        if let Some(app) = &env.slack.app_token {
            block.insert("appToken".to_string(), json!(app));
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
