//! Command-line parsing (§6), component M. `clap` derive mirrors the
//! pack's own `clap` use in `edg-l-ddnet-rs`'s server binaries.

use clap::Parser;

/// `autohostd <configFile> [name=value ...] [--doc|--tls-cert-trust[=..]|--tls-cert-revoke=..|--tls-cert-list[=..]]`
#[derive(Debug, Parser)]
#[command(name = "autohostd", version, about = "Autonomous battle-lobby hosting agent")]
pub struct Cli {
    /// Path to the instance's TOML config file.
    pub config_file: String,

    /// Trailing `name=value` macro overrides merged onto the config file.
    pub macros: Vec<String>,

    /// Print the resolved configuration documentation and exit.
    #[arg(long)]
    pub doc: bool,

    /// Atomically trust a certificate fingerprint for a host: `host:hash`
    /// or, reusing the lobby host from the config file, a bare `hash`.
    #[arg(long, value_name = "HOST:HASH|HASH")]
    pub tls_cert_trust: Option<String>,

    /// Revoke a previously trusted fingerprint, same `host:hash|hash` form.
    #[arg(long, value_name = "HOST:HASH|HASH")]
    pub tls_cert_revoke: Option<String>,

    /// List trusted fingerprints, optionally scoped to one host.
    #[arg(long, value_name = "HOST")]
    pub tls_cert_list: Option<Option<String>>,
}

/// Splits a `host:hash` CLI argument into its parts, defaulting the host to
/// `fallback_host` when only a bare hash was given.
pub fn split_host_hash(arg: &str, fallback_host: &str) -> (String, String) {
    match arg.split_once(':') {
        Some((host, hash)) => (host.to_string(), hash.to_string()),
        None => (fallback_host.to_string(), arg.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_host_hash_with_explicit_host() {
        assert_eq!(split_host_hash("lobby.example:aabb", "other"), ("lobby.example".to_string(), "aabb".to_string()));
    }

    #[test]
    fn split_host_hash_falls_back_to_config_host() {
        assert_eq!(split_host_hash("aabb", "lobby.example"), ("lobby.example".to_string(), "aabb".to_string()));
    }

    #[test]
    fn parses_config_file_and_macros() {
        let cli = Cli::parse_from(["autohostd", "instance.toml", "lobby.port=8201", "--doc"]);
        assert_eq!(cli.config_file, "instance.toml");
        assert_eq!(cli.macros, vec!["lobby.port=8201".to_string()]);
        assert!(cli.doc);
    }
}
