//! Named downlink profiles.
//!
//! A TOML file declares `[defaults]` and any number of `[downlinks.<name>]`
//! tables; `DOWNLINK_`-prefixed environment variables override both (nested
//! keys split on `__`, e.g. `DOWNLINK_DEFAULTS__KEEP_SYNCED=true`). A
//! resolved profile yields the address, view flags, and kind needed to open
//! a `downlink_core::DownlinkView`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use downlink_core::{DownlinkConfig, DownlinkType, LinkAddress};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no downlink named '{name}'")]
    UnknownDownlink { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Values every profile inherits unless it overrides them.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named downlink profiles.
    #[serde(default)]
    pub downlinks: BTreeMap<String, DownlinkProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Host endpoint used by profiles that don't name one.
    pub host: Option<String>,

    pub mesh: Option<String>,

    #[serde(default = "default_true")]
    pub keep_linked: bool,

    #[serde(default)]
    pub keep_synced: bool,

    #[serde(default = "default_true")]
    pub stateful: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            host: None,
            mesh: None,
            keep_linked: true,
            keep_synced: false,
            stateful: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One named downlink.
#[derive(Debug, Deserialize, Serialize)]
pub struct DownlinkProfile {
    /// Host endpoint (e.g. "warp://localhost:9001"). Falls back to
    /// `defaults.host`.
    pub host: Option<String>,

    pub mesh: Option<String>,

    /// Node URI.
    pub node: String,

    /// Lane URI.
    pub lane: String,

    /// "value", "list", "map", or "event".
    #[serde(default = "default_kind")]
    pub kind: DownlinkType,

    pub prio: Option<f32>,

    pub rate: Option<f32>,

    /// Body sent with the initial Link/Sync request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    pub keep_linked: Option<bool>,

    pub keep_synced: Option<bool>,

    pub stateful: Option<bool>,
}

fn default_kind() -> DownlinkType {
    DownlinkType::Value
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "downlink", "downlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("downlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment. A missing file is not an error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DOWNLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Profile resolution ──────────────────────────────────────────────

impl Config {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.downlinks.keys().map(String::as_str)
    }

    pub fn profile(&self, name: &str) -> Result<&DownlinkProfile, ConfigError> {
        self.downlinks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDownlink { name: name.into() })
    }
}

/// Resolve a named profile against the defaults.
pub fn resolve_profile(
    cfg: &Config,
    name: &str,
) -> Result<(LinkAddress, DownlinkConfig, DownlinkType), ConfigError> {
    let profile = cfg.profile(name)?;
    let defaults = &cfg.defaults;

    if profile.node.trim().is_empty() {
        return Err(invalid("node", format!("downlink '{name}' has an empty node URI")));
    }
    if profile.lane.trim().is_empty() {
        return Err(invalid("lane", format!("downlink '{name}' has an empty lane URI")));
    }

    let mut address = LinkAddress::new(profile.node.as_str(), profile.lane.as_str());
    if let Some(host) = profile.host.as_ref().or(defaults.host.as_ref()) {
        let url: Url = host
            .parse()
            .map_err(|_| invalid("host", format!("invalid URL: {host}")))?;
        address = address.with_host(url);
    }
    if let Some(mesh) = profile.mesh.as_ref().or(defaults.mesh.as_ref()) {
        address = address.with_mesh(mesh.as_str());
    }
    if let Some(prio) = profile.prio {
        address = address.with_prio(finite("prio", prio)?);
    }
    if let Some(rate) = profile.rate {
        address = address.with_rate(finite("rate", rate)?);
    }
    if let Some(ref body) = profile.body {
        address = address.with_body(body.clone());
    }

    let config = DownlinkConfig::default()
        .keep_linked(profile.keep_linked.unwrap_or(defaults.keep_linked))
        .keep_synced(profile.keep_synced.unwrap_or(defaults.keep_synced))
        .stateful(profile.stateful.unwrap_or(defaults.stateful));

    Ok((address, config, profile.kind))
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason,
    }
}

fn finite(field: &str, value: f32) -> Result<f32, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(invalid(field, format!("expected a non-negative number, got {value}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn profile(node: &str, lane: &str) -> DownlinkProfile {
        DownlinkProfile {
            host: None,
            mesh: None,
            node: node.into(),
            lane: lane.into(),
            kind: DownlinkType::Value,
            prio: None,
            rate: None,
            body: None,
            keep_linked: None,
            keep_synced: None,
            stateful: None,
        }
    }

    #[test]
    fn unknown_name_is_reported() {
        let cfg = Config::default();
        let err = resolve_profile(&cfg, "nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDownlink { ref name } if name == "nope"));
    }

    #[test]
    fn profile_overrides_defaults() {
        let mut cfg = Config::default();
        cfg.defaults.keep_synced = true;
        let mut p = profile("/a", "b");
        p.keep_synced = Some(false);
        p.stateful = Some(false);
        cfg.downlinks.insert("a".into(), p);

        let (_, flags, _) = resolve_profile(&cfg, "a").unwrap();
        assert!(flags.keep_linked);
        assert!(!flags.keep_synced);
        assert!(!flags.stateful);
    }

    #[test]
    fn negative_rate_is_rejected() {
        let mut cfg = Config::default();
        let mut p = profile("/a", "b");
        p.rate = Some(-1.0);
        cfg.downlinks.insert("a".into(), p);
        let err = resolve_profile(&cfg, "a").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "rate"));
    }

    #[test]
    fn empty_lane_is_rejected() {
        let mut cfg = Config::default();
        cfg.downlinks.insert("a".into(), profile("/a", " "));
        assert!(resolve_profile(&cfg, "a").is_err());
    }
}
