// packages/supervisor/src/env/raw_config.rs
//! Typed snapshot of the configuration supplied by the hosting environment
//!
//! The host hands over a flat bag of optional strings. Each family gets its
//! own struct so adding a channel or credential is a visible change here and
//! in the resolver, never a stringly-typed lookup somewhere else.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;

/// Direct provider credential
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// `OPENROUTER_API_KEY`
    pub api_key: Option<String>,
    /// `OPENROUTER_BASE_URL`
    pub base_url: Option<String>,
}

/// Proxy-issued gateway credential
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GatewayCredentials {
    /// `AI_GATEWAY_API_KEY`
    pub api_key: Option<String>,
    /// `AI_GATEWAY_BASE_URL`
    pub base_url: Option<String>,
}

/// Container runtime flags
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RuntimeFlags {
    /// `OPENCLAW_GATEWAY_TOKEN`
    pub gateway_token: Option<String>,
    /// `DEV_MODE`
    pub dev_mode: Option<String>,
    /// `OPENCLAW_BIND_MODE`
    pub bind_mode: Option<String>,
}

/// Per-channel bot tokens and DM policies
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ChannelTokens {
    pub telegram_bot_token: Option<String>,
    pub telegram_dm_policy: Option<String>,
    pub discord_bot_token: Option<String>,
    pub discord_dm_policy: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
}

/// Service identifiers shared with the hosting worker
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ServiceSettings {
    /// `CDP_SECRET`
    pub cdp_secret: Option<String>,
    /// `WORKER_URL`
    pub worker_url: Option<String>,
}

/// Object storage credentials; consumed by the mount, never forwarded
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StorageCredentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub account_id: Option<String>,
    pub bucket_name: Option<String>,
}

impl StorageCredentials {
    /// All three of key id, secret and account id are present
    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some() && self.account_id.is_some()
    }
}

/// Debug rendering of a secret: presence only
fn redacted(value: &Option<String>) -> Option<&'static str> {
    value.as_ref().map(|_| "<set>")
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &redacted(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("api_key", &redacted(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFlags")
            .field("gateway_token", &redacted(&self.gateway_token))
            .field("dev_mode", &self.dev_mode)
            .field("bind_mode", &self.bind_mode)
            .finish()
    }
}

impl fmt::Debug for ChannelTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelTokens")
            .field("telegram_bot_token", &redacted(&self.telegram_bot_token))
            .field("telegram_dm_policy", &self.telegram_dm_policy)
            .field("discord_bot_token", &redacted(&self.discord_bot_token))
            .field("discord_dm_policy", &self.discord_dm_policy)
            .field("slack_bot_token", &redacted(&self.slack_bot_token))
            .field("slack_app_token", &redacted(&self.slack_app_token))
            .finish()
    }
}

impl fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("cdp_secret", &redacted(&self.cdp_secret))
            .field("worker_url", &self.worker_url)
            .finish()
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &redacted(&self.access_key_id))
            .field("secret_access_key", &redacted(&self.secret_access_key))
            .field("account_id", &self.account_id)
            .field("bucket_name", &self.bucket_name)
            .finish()
    }
}

/// Process environment entries whose name and value are both valid UTF-8
pub fn utf8_vars() -> impl Iterator<Item = (String, String)> {
    utf8_only(std::env::vars_os())
}

fn utf8_only(vars: impl Iterator<Item = (OsString, OsString)>) -> impl Iterator<Item = (String, String)> {
    vars.filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
}

/// Immutable configuration snapshot for one activation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    pub provider: ProviderCredentials,
    pub gateway: GatewayCredentials,
    pub runtime: RuntimeFlags,
    pub channels: ChannelTokens,
    pub service: ServiceSettings,
    pub storage: StorageCredentials,
}

impl RawConfig {
    /// Snapshot the current process environment. Entries that are not valid
    /// UTF-8 are skipped.
    pub fn from_env() -> Self {
        Self::from_vars(utf8_vars())
    }

    /// Build from flat key/value pairs. Unknown keys are ignored and empty
    /// values count as absent.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let mut take = |key: &str| map.remove(key);

        Self {
            provider: ProviderCredentials {
                api_key: take("OPENROUTER_API_KEY"),
                base_url: take("OPENROUTER_BASE_URL"),
            },
            gateway: GatewayCredentials {
                api_key: take("AI_GATEWAY_API_KEY"),
                base_url: take("AI_GATEWAY_BASE_URL"),
            },
            runtime: RuntimeFlags {
                gateway_token: take("OPENCLAW_GATEWAY_TOKEN"),
                dev_mode: take("DEV_MODE"),
                bind_mode: take("OPENCLAW_BIND_MODE"),
            },
            channels: ChannelTokens {
                telegram_bot_token: take("TELEGRAM_BOT_TOKEN"),
                telegram_dm_policy: take("TELEGRAM_DM_POLICY"),
                discord_bot_token: take("DISCORD_BOT_TOKEN"),
                discord_dm_policy: take("DISCORD_DM_POLICY"),
                slack_bot_token: take("SLACK_BOT_TOKEN"),
                slack_app_token: take("SLACK_APP_TOKEN"),
            },
            service: ServiceSettings {
                cdp_secret: take("CDP_SECRET"),
                worker_url: take("WORKER_URL"),
            },
            storage: StorageCredentials {
                access_key_id: take("R2_ACCESS_KEY_ID"),
                secret_access_key: take("R2_SECRET_ACCESS_KEY"),
                account_id: take("CF_ACCOUNT_ID"),
                bucket_name: take("R2_BUCKET_NAME"),
            },
        }
    }
}
