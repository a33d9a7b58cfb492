//! Configuration loading (§6, component M): a TOML instance config plus
//! CLI `name=value` macro overrides, matching the teacher's own `toml` +
//! `serde` dependency pair.
//!
//! The config-file *grammar* beyond flat TOML is an explicit non-goal
//! (§1); this loader only needs flat `key = value` sections, which is
//! already everything §3's scoped settings trees and the numeric knobs
//! named throughout §4 require.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::domain::AutohostError;

#[derive(Debug, Clone, Deserialize)]
pub struct LobbyConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    pub password: String,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: String,
    #[serde(default)]
    pub follow_redirect: bool,
    #[serde(default = "default_lobby_client")]
    pub lobby_client: String,
}

fn default_reconnect_delay() -> String {
    "10-30".to_string()
}

fn default_lobby_client() -> String {
    "autohostd 0.1.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BattleConfig {
    pub engine_version: String,
    pub mod_archive: String,
    pub map_name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default)]
    pub min_players: u32,
    #[serde(default)]
    pub disabled_units: Vec<String>,
}

fn default_max_players() -> u32 {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_send_record_period_secs")]
    pub send_record_period_secs: u64,
    #[serde(default = "default_max_bytes_sent")]
    pub max_bytes_sent: usize,
    #[serde(default = "default_max_low_prio_bytes_sent")]
    pub max_low_prio_bytes_sent: usize,
}

fn default_send_record_period_secs() -> u64 {
    5
}
fn default_max_bytes_sent() -> usize {
    2048
}
fn default_max_low_prio_bytes_sent() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            send_record_period_secs: default_send_record_period_secs(),
            max_bytes_sent: default_max_bytes_sent(),
            max_low_prio_bytes_sent: default_max_low_prio_bytes_sent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InstanceConfig {
    pub instance_dir: String,
    #[serde(default)]
    pub skill_bot_name: Option<String>,
}

/// Top-level instance configuration (§6: "Persisted state under
/// `instanceDir`": `spads.pid`, `spads.lock`, `unitsync.lock`,
/// `autoUpdate.lock`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub lobby: LobbyConfig,
    pub battle: BattleConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
    /// Flat macro table, collecting every other TOML key not captured by a
    /// typed field above plus any `name=value` CLI override — the
    /// settings-tree loader (§3) reads scoped values out of this.
    #[serde(flatten)]
    pub macros: HashMap<String, toml::Value>,
}

impl Config {
    /// Parses the TOML file at `path`, then applies `name=value` macro
    /// overrides from the CLI tail in order (later overrides win), per §6's
    /// `<configFile> name=value...` grammar.
    pub fn load(path: &Path, macro_overrides: &[String]) -> Result<Self, AutohostError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AutohostError::Configuration(format!("reading {}: {e}", path.display())))?;
        let mut value: toml::Value = toml::from_str(&text)
            .map_err(|e| AutohostError::Configuration(format!("parsing {}: {e}", path.display())))?;

        for raw in macro_overrides {
            let (key, val) = raw.split_once('=').ok_or_else(|| {
                AutohostError::Usage(format!("macro override '{raw}' is not of the form name=value"))
            })?;
            apply_macro(&mut value, key, val);
        }

        value.try_into().map_err(|e| AutohostError::Configuration(format!("validating config: {e}")))
    }
}

/// Applies one `dotted.path=value` macro override onto the parsed TOML
/// tree, creating intermediate tables as needed. Values are parsed as TOML
/// scalars when possible, falling back to a bare string.
fn apply_macro(root: &mut toml::Value, dotted_key: &str, raw_value: &str) {
    let mut cursor = root;
    let parts: Vec<&str> = dotted_key.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if !cursor.is_table() {
            *cursor = toml::Value::Table(Default::default());
        }
        let table = cursor.as_table_mut().expect("just ensured table");
        if i + 1 == parts.len() {
            table.insert(part.to_string(), parse_macro_value(raw_value));
            return;
        }
        cursor = table.entry(part.to_string()).or_insert_with(|| toml::Value::Table(Default::default()));
    }
}

fn parse_macro_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_override_sets_nested_path() {
        let mut value = toml::Value::Table(Default::default());
        apply_macro(&mut value, "lobby.port", "8201");
        assert_eq!(value.get("lobby").unwrap().get("port").unwrap().as_integer(), Some(8201));
    }

    #[test]
    fn macro_value_parses_bool_before_falling_back_to_string() {
        assert_eq!(parse_macro_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_macro_value("hello"), toml::Value::String("hello".into()));
    }

    #[test]
    fn load_rejects_malformed_macro() {
        let dir = std::env::temp_dir().join(format!("autohostd-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("config.toml");
        std::fs::write(&path, "[lobby]\nhost=\"x\"\nport=8200\ntls=false\nusername=\"u\"\npassword=\"p\"\n[battle]\nengine_version=\"105\"\nmod_archive=\"BA\"\nmap_name=\"M\"\n").unwrap();
        let err = Config::load(&path, &["badmacro".to_string()]).unwrap_err();
        assert!(matches!(err, AutohostError::Usage(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
