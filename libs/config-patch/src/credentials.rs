//! Credential store entries for one-time setup tokens.
//!
//! The gateway keeps provider credentials in a separate auth-profile store
//! and resolves them through `auth.profiles` stubs in the main document.

use serde_json::{json, Value};

use crate::{as_object, child, object_entry};

/// Profile id used for the setup token.
pub const SETUP_PROFILE_ID: &str = "anthropic:default";

/// Result of a setup-token injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    /// The token was written to the store.
    Written,
    /// A credential already exists for the profile and was left alone.
    AlreadyPresent,
}

/// An empty credential store document.
pub fn empty_store() -> Value {
    json!({ "version": 1, "profiles": {} })
}

/// True when the store already holds a credential for `profile_id`.
pub fn has_profile(store: &Value, profile_id: &str) -> bool {
    store
        .get("profiles")
        .and_then(|p| p.get(profile_id))
        .is_some()
}

/// Write the setup token into the store unless the profile already exists,
/// and make sure the document carries a stub pointing at the profile.
///
/// An existing profile, whatever its type, is never overwritten. An existing
/// stub is never modified.
pub fn inject_setup_token(store: &mut Value, doc: &mut Value, token: &str) -> Injection {
    let injection = if has_profile(store, SETUP_PROFILE_ID) {
        Injection::AlreadyPresent
    } else {
        let root = as_object(store);
        root.entry("version".to_string()).or_insert(json!(1));
        child(root, "profiles").insert(
            SETUP_PROFILE_ID.to_string(),
            json!({
                "type": "token",
                "provider": "anthropic",
                "token": token
            }),
        );
        Injection::Written
    };

    let auth = object_entry(doc, "auth");
    child(auth, "profiles")
        .entry(SETUP_PROFILE_ID.to_string())
        .or_insert_with(|| json!({ "provider": "anthropic", "mode": "token" }));

    injection
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_into_empty_store() {
        let mut store = empty_store();
        let mut doc = json!({});
        let result = inject_setup_token(&mut store, &mut doc, "sk-setup");

        assert_eq!(result, Injection::Written);
        assert_eq!(store["profiles"][SETUP_PROFILE_ID]["token"], json!("sk-setup"));
        assert_eq!(
            doc["auth"]["profiles"][SETUP_PROFILE_ID],
            json!({ "provider": "anthropic", "mode": "token" })
        );
    }

    #[test]
    fn test_never_overwrites_operator_credential() {
        let mut store = json!({
            "version": 1,
            "profiles": {
                "anthropic:default": { "type": "api_key", "provider": "anthropic", "key": "op" }
            }
        });
        let before = store.clone();
        let mut doc = json!({
            "auth": { "profiles": { "anthropic:default": { "provider": "anthropic", "mode": "api_key" } } }
        });
        let result = inject_setup_token(&mut store, &mut doc, "sk-setup");

        assert_eq!(result, Injection::AlreadyPresent);
        assert_eq!(store, before);
        assert_eq!(
            doc["auth"]["profiles"][SETUP_PROFILE_ID]["mode"],
            json!("api_key")
        );
    }

    #[test]
    fn test_repairs_non_object_store() {
        let mut store = json!("garbage");
        let mut doc = json!({});
        assert_eq!(
            inject_setup_token(&mut store, &mut doc, "t"),
            Injection::Written
        );
        assert_eq!(store["version"], json!(1));
    }
}
