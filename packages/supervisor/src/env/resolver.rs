// packages/supervisor/src/env/resolver.rs
//! Translation of the host configuration into the child process environment
//!
//! Precedence for the provider credential:
//! 1. `AI_GATEWAY_API_KEY` wins whenever present
//! 2. otherwise `OPENROUTER_API_KEY` is forwarded unchanged
//!
//! `OPENROUTER_BASE_URL` is additive and never competes with the gateway pair.
//! Everything else is a fixed pass-through table.

use crate::env::raw_config::RawConfig;
use std::collections::BTreeMap;

/// Resolved name of the provider credential
pub const PROVIDER_API_KEY: &str = "OPENROUTER_API_KEY";

/// Resolved name of the direct provider base URL
pub const PROVIDER_BASE_URL: &str = "OPENROUTER_BASE_URL";

/// Resolved name of the normalized gateway base URL
pub const GATEWAY_BASE_URL: &str = "AI_GATEWAY_BASE_URL";

/// Environment handed to the gateway process at launch
///
/// Only determined keys are present; no value is ever empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
    vars: BTreeMap<String, String>,
}

impl ResolvedEnv {
    /// Value of a resolved variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Whether the variable will be set for the gateway
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Number of resolved variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Variable names in sorted order, safe to log
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Name/value pairs in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn insert(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.vars.insert(key.to_string(), value.to_string());
        }
    }
}

impl<'a> IntoIterator for &'a ResolvedEnv {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.iter()
    }
}

/// Strip every trailing `/` from a base URL. Idempotent.
pub fn normalize_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Resolve the child environment. Pure: no I/O, no errors.
pub fn resolve(raw: &RawConfig) -> ResolvedEnv {
    let mut env = ResolvedEnv::default();

    let api_key = raw
        .gateway
        .api_key
        .as_deref()
        .or(raw.provider.api_key.as_deref());
    env.insert(PROVIDER_API_KEY, api_key);

    env.insert(PROVIDER_BASE_URL, raw.provider.base_url.as_deref());
    env.insert(
        GATEWAY_BASE_URL,
        raw.gateway.base_url.as_deref().map(normalize_base_url),
    );

    for (name, value) in pass_through(raw) {
        env.insert(name, value);
    }

    env
}

/// Verbatim forwards, keyed by the name the gateway expects
fn pass_through(raw: &RawConfig) -> [(&'static str, Option<&str>); 11] {
    let runtime = &raw.runtime;
    let channels = &raw.channels;
    let service = &raw.service;

    [
        ("OPENCLAW_GATEWAY_TOKEN", runtime.gateway_token.as_deref()),
        ("OPENCLAW_DEV_MODE", runtime.dev_mode.as_deref()),
        ("OPENCLAW_BIND_MODE", runtime.bind_mode.as_deref()),
        ("TELEGRAM_BOT_TOKEN", channels.telegram_bot_token.as_deref()),
        ("TELEGRAM_DM_POLICY", channels.telegram_dm_policy.as_deref()),
        ("DISCORD_BOT_TOKEN", channels.discord_bot_token.as_deref()),
        ("DISCORD_DM_POLICY", channels.discord_dm_policy.as_deref()),
        ("SLACK_BOT_TOKEN", channels.slack_bot_token.as_deref()),
        ("SLACK_APP_TOKEN", channels.slack_app_token.as_deref()),
        ("CDP_SECRET", service.cdp_secret.as_deref()),
        ("WORKER_URL", service.worker_url.as_deref()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolve_vars(vars: &[(&str, &str)]) -> ResolvedEnv {
        resolve(&RawConfig::from_vars(vars.iter().copied()))
    }

    fn pairs(env: &ResolvedEnv) -> Vec<(&str, &str)> {
        env.iter().collect()
    }

    #[test]
    fn test_empty_config_resolves_to_empty_env() {
        let env = resolve_vars(&[]);
        assert!(env.is_empty());
    }

    #[test]
    fn test_gateway_key_with_trailing_slashes() {
        let env = resolve_vars(&[
            ("AI_GATEWAY_API_KEY", "k1"),
            ("AI_GATEWAY_BASE_URL", "https://gw.example/v1/x/openai///"),
        ]);
        assert_eq!(
            pairs(&env),
            vec![
                ("AI_GATEWAY_BASE_URL", "https://gw.example/v1/x/openai"),
                ("OPENROUTER_API_KEY", "k1"),
            ]
        );
    }

    #[test]
    fn test_direct_key_and_channel_token() {
        let env = resolve_vars(&[("OPENROUTER_API_KEY", "d1"), ("TELEGRAM_BOT_TOKEN", "t1")]);
        assert_eq!(
            pairs(&env),
            vec![("OPENROUTER_API_KEY", "d1"), ("TELEGRAM_BOT_TOKEN", "t1")]
        );
    }

    #[test]
    fn test_gateway_key_overrides_direct_key() {
        let env = resolve_vars(&[
            ("AI_GATEWAY_API_KEY", "gateway-key"),
            ("OPENROUTER_API_KEY", "direct-key"),
        ]);
        assert_eq!(env.get(PROVIDER_API_KEY), Some("gateway-key"));
    }

    #[test]
    fn test_unrelated_provider_key_is_not_forwarded() {
        let env = resolve_vars(&[
            ("AI_GATEWAY_API_KEY", "gateway-key"),
            ("AI_GATEWAY_BASE_URL", "https://gateway.example.com/openai"),
            ("OPENAI_API_KEY", "direct-key"),
        ]);
        assert_eq!(env.len(), 2);
        assert_eq!(env.get(PROVIDER_API_KEY), Some("gateway-key"));
    }

    #[test]
    fn test_gateway_base_url_without_key() {
        let env = resolve_vars(&[(
            "AI_GATEWAY_BASE_URL",
            "https://gateway.ai.cloudflare.com/v1/123/my-gw/anthropic",
        )]);
        assert_eq!(
            pairs(&env),
            vec![(
                "AI_GATEWAY_BASE_URL",
                "https://gateway.ai.cloudflare.com/v1/123/my-gw/anthropic"
            )]
        );
    }

    #[test]
    fn test_direct_base_url_is_additive() {
        let env = resolve_vars(&[("OPENROUTER_BASE_URL", "https://api.openrouter.ai/")]);
        assert_eq!(
            pairs(&env),
            vec![("OPENROUTER_BASE_URL", "https://api.openrouter.ai/")]
        );

        let env = resolve_vars(&[
            ("AI_GATEWAY_API_KEY", "gw"),
            ("AI_GATEWAY_BASE_URL", "https://gw.example/"),
            ("OPENROUTER_BASE_URL", "https://api.openrouter.ai"),
        ]);
        assert_eq!(env.get(PROVIDER_BASE_URL), Some("https://api.openrouter.ai"));
        assert_eq!(env.get(GATEWAY_BASE_URL), Some("https://gw.example"));
    }

    #[test]
    fn test_runtime_flags_are_renamed() {
        let env = resolve_vars(&[
            ("DEV_MODE", "true"),
            ("OPENCLAW_BIND_MODE", "lan"),
            ("OPENCLAW_GATEWAY_TOKEN", "my-token"),
        ]);
        assert_eq!(
            pairs(&env),
            vec![
                ("OPENCLAW_BIND_MODE", "lan"),
                ("OPENCLAW_DEV_MODE", "true"),
                ("OPENCLAW_GATEWAY_TOKEN", "my-token"),
            ]
        );
        assert!(!env.contains("DEV_MODE"));
    }

    #[test]
    fn test_all_channel_tokens() {
        let env = resolve_vars(&[
            ("TELEGRAM_BOT_TOKEN", "tg-token"),
            ("TELEGRAM_DM_POLICY", "pairing"),
            ("DISCORD_BOT_TOKEN", "discord-token"),
            ("DISCORD_DM_POLICY", "open"),
            ("SLACK_BOT_TOKEN", "slack-bot"),
            ("SLACK_APP_TOKEN", "slack-app"),
            ("CDP_SECRET", "cdp"),
            ("WORKER_URL", "https://worker.example"),
        ]);
        assert_eq!(env.len(), 8);
        assert_eq!(env.get("DISCORD_DM_POLICY"), Some("open"));
        assert_eq!(env.get("SLACK_APP_TOKEN"), Some("slack-app"));
        assert_eq!(env.get("WORKER_URL"), Some("https://worker.example"));
    }

    #[test]
    fn test_storage_credentials_never_forwarded() {
        let env = resolve_vars(&[
            ("R2_ACCESS_KEY_ID", "a"),
            ("R2_SECRET_ACCESS_KEY", "s"),
            ("CF_ACCOUNT_ID", "c"),
            ("R2_BUCKET_NAME", "b"),
        ]);
        assert!(env.is_empty());
    }

    #[test]
    fn test_slash_only_gateway_url_is_omitted() {
        let env = resolve_vars(&[("AI_GATEWAY_BASE_URL", "///")]);
        assert!(!env.contains(GATEWAY_BASE_URL));
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://a/b"), "https://a/b");
        assert_eq!(normalize_base_url("https://a/b/"), "https://a/b");
        assert_eq!(normalize_base_url("https://a/b//////"), "https://a/b");
    }

    const KNOWN_KEYS: &[&str] = &[
        "OPENROUTER_API_KEY",
        "OPENROUTER_BASE_URL",
        "AI_GATEWAY_API_KEY",
        "AI_GATEWAY_BASE_URL",
        "OPENCLAW_GATEWAY_TOKEN",
        "DEV_MODE",
        "OPENCLAW_BIND_MODE",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_DM_POLICY",
        "DISCORD_BOT_TOKEN",
        "DISCORD_DM_POLICY",
        "SLACK_BOT_TOKEN",
        "SLACK_APP_TOKEN",
        "CDP_SECRET",
        "WORKER_URL",
        "R2_ACCESS_KEY_ID",
    ];

    fn raw_vars() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(
            (prop::sample::select(KNOWN_KEYS), "[a-z/ ]{0,6}"),
            0..12,
        )
        .prop_map(|v| v.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    proptest! {
        #[test]
        fn prop_no_empty_values(vars in raw_vars()) {
            let env = resolve(&RawConfig::from_vars(vars));
            for (_, value) in env.iter() {
                prop_assert!(!value.is_empty());
            }
        }

        #[test]
        fn prop_normalize_idempotent(base in "[a-z:/.]{0,16}", slashes in 0usize..8) {
            let url = format!("{}{}", base, "/".repeat(slashes));
            let once = normalize_base_url(&url);
            prop_assert_eq!(normalize_base_url(once), once);
            prop_assert_eq!(once, normalize_base_url(&base));
        }

        #[test]
        fn prop_gateway_key_always_wins(gw in "[a-z0-9]{1,8}", direct in proptest::option::of("[a-z0-9]{1,8}")) {
            let mut vars = vec![("AI_GATEWAY_API_KEY".to_string(), gw.clone())];
            if let Some(direct) = direct {
                vars.push(("OPENROUTER_API_KEY".to_string(), direct));
            }
            let env = resolve(&RawConfig::from_vars(vars));
            prop_assert_eq!(env.get(PROVIDER_API_KEY), Some(gw.as_str()));
        }

        #[test]
        fn prop_channel_pass_through_iff_present(token in proptest::option::of("[a-z0-9]{1,8}")) {
            let vars: Vec<(String, String)> = token
                .iter()
                .map(|t| ("SLACK_BOT_TOKEN".to_string(), t.clone()))
                .collect();
            let env = resolve(&RawConfig::from_vars(vars));
            prop_assert_eq!(env.get("SLACK_BOT_TOKEN"), token.as_deref());
        }
    }
}
