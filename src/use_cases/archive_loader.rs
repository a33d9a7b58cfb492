//! Archive enumeration: map/mod/option resolution behind the exclusive
//! archive-cache lock (§4.L, component L).
//!
//! The actual unit-archive cache format is an external collaborator (§1
//! non-goals); this module only models the resolution algorithms the core
//! depends on — rapid-tag scanning, mod-name regex resolution, and the
//! post-action that updates in-memory caches — and expects a byte
//! provider for the `versions.gz` lookups so it never touches the
//! filesystem itself.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Full,
    GameOnly,
}

#[derive(Debug, Clone)]
pub struct MapInfo {
    pub name: String,
    pub hash: String,
    pub width: u32,
    pub height: u32,
    pub start_positions: Vec<(f32, f32)>,
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    pub maps: Vec<MapInfo>,
    pub mod_names: Vec<String>,
}

/// Result of resolving the mod archive to host, per §4.L.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModResolution {
    Literal(String),
    Regex(String),
    Rapid(String),
    NotFound,
}

/// Resolves the configured mod spec against the enumerated catalog:
/// `~pattern` picks the max-matching name, `rapid://group:version` is
/// resolved via `resolve_rapid_tag`, anything else is a literal lookup.
pub fn resolve_mod(spec: &str, catalog: &ArchiveCatalog, rapid_lookup: impl Fn(&str, &str) -> Option<String>) -> ModResolution {
    if let Some(pattern) = spec.strip_prefix('~') {
        let Ok(re) = Regex::new(pattern) else { return ModResolution::NotFound };
        let best = catalog
            .mod_names
            .iter()
            .filter(|name| re.is_match(name))
            .max_by_key(|name| name.len());
        return match best {
            Some(name) => ModResolution::Regex(name.clone()),
            None => ModResolution::NotFound,
        };
    }
    if let Some(rapid) = spec.strip_prefix("rapid://") {
        let Some((group, version)) = rapid.split_once(':') else { return ModResolution::NotFound };
        return match rapid_lookup(group, version) {
            Some(name) => ModResolution::Rapid(name),
            None => ModResolution::NotFound,
        };
    }
    if catalog.mod_names.iter().any(|name| name == spec) {
        ModResolution::Literal(spec.to_string())
    } else {
        ModResolution::NotFound
    }
}

/// Parses a gzip-compressed `rapid/*/group/versions.gz` CSV blob and
/// returns the archive name for the row whose first two fields are
/// `(group, version)` (§4.L).
pub fn resolve_rapid_tag(gz_bytes: &[u8], group: &str, version: &str) -> Option<String> {
    let mut decoder = GzDecoder::new(gz_bytes);
    let mut text = String::new();
    decoder.read_to_string(&mut text).ok()?;
    for line in text.lines() {
        let mut fields = line.split(',');
        let row_group = fields.next()?;
        let row_version = fields.next()?;
        if row_group == group && row_version == version {
            return fields.next().map(|s| s.to_string());
        }
    }
    None
}

/// A map name configured but not present locally: the hash is retained so
/// the room can still be advertised, per §4.L "ghost map".
#[derive(Debug, Clone)]
pub struct GhostMap {
    pub name: String,
    pub hash: String,
}

/// Applies an enumeration result: updates the in-memory catalog and
/// resolves any configured map not found locally to a `GhostMap` entry
/// served from `ghost_table` (§4.L "post-action").
pub fn apply_post_action(
    configured_maps: &[String],
    catalog: &ArchiveCatalog,
    ghost_table: &HashMap<String, String>,
) -> (Vec<MapInfo>, Vec<GhostMap>) {
    let mut present = Vec::new();
    let mut ghosts = Vec::new();
    for name in configured_maps {
        if let Some(map) = catalog.maps.iter().find(|m| &m.name == name) {
            present.push(map.clone());
        } else if let Some(hash) = ghost_table.get(name) {
            ghosts.push(GhostMap { name: name.clone(), hash: hash.clone() });
        }
    }
    (present, ghosts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gzip(data: &str) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn rapid_tag_resolves_matching_row() {
        let csv = "byar,105,Balanced Annihilation V105\nzk,1.10,Zero-K v1.10\n";
        let gz = gzip(csv);
        assert_eq!(resolve_rapid_tag(&gz, "byar", "105"), Some("Balanced Annihilation V105".to_string()));
        assert_eq!(resolve_rapid_tag(&gz, "byar", "999"), None);
    }

    #[test]
    fn regex_mod_resolution_picks_longest_match() {
        let catalog = ArchiveCatalog {
            maps: Vec::new(),
            mod_names: vec!["Balanced Annihilation V12".into(), "Balanced Annihilation V12.1".into()],
        };
        let res = resolve_mod("~Balanced Annihilation.*", &catalog, |_, _| None);
        assert_eq!(res, ModResolution::Regex("Balanced Annihilation V12.1".to_string()));
    }

    #[test]
    fn no_match_yields_not_found() {
        let catalog = ArchiveCatalog { maps: Vec::new(), mod_names: vec!["Other Mod".into()] };
        assert_eq!(resolve_mod("rapid://missing:1", &catalog, |_, _| None), ModResolution::NotFound);
    }

    #[test]
    fn unresolved_map_falls_back_to_ghost_entry() {
        let catalog = ArchiveCatalog { maps: Vec::new(), mod_names: Vec::new() };
        let mut ghost_table = HashMap::new();
        ghost_table.insert("Comet Catcher".to_string(), "abc123".to_string());
        let (present, ghosts) = apply_post_action(&["Comet Catcher".to_string()], &catalog, &ghost_table);
        assert!(present.is_empty());
        assert_eq!(ghosts[0].name, "Comet Catcher");
    }
}
