//! `!`-command parsing, access resolution, and JSON-RPC façade (§4.H,
//! component H).

use std::collections::HashMap;

use crate::domain::QuitIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    PrivateMessage,
    Channel,
    Battle,
    Game,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerStatus {
    Outside,
    Spec,
    Player,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameState {
    Stopped,
    Running,
    Voting,
}

/// Tokenizes a `!cmd params...` line. Commands in `quoted_params` use
/// shell-like quoting; everything else splits on whitespace (§4.H
/// "Parsing").
pub fn tokenize(line: &str, quoted_params: &[&str]) -> Option<(String, Vec<String>)> {
    let rest = line.strip_prefix('!')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let cmd = parts.next()?.to_string();
    let tail = parts.next().unwrap_or("").trim();
    if tail.is_empty() {
        return Some((cmd, Vec::new()));
    }
    let params = if quoted_params.contains(&cmd.as_str()) {
        split_shell_like(tail)
    } else {
        tail.split_whitespace().map(str::to_string).collect()
    };
    Some((cmd, params))
}

fn split_shell_like(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// An alias expands one token into a replacement command list, with `%N%`
/// positional placeholders substituted from the caller's params (§4.H).
#[derive(Debug, Clone)]
pub struct Alias {
    pub expansion: Vec<String>,
}

pub fn expand_alias(alias: &Alias, params: &[String]) -> Vec<String> {
    alias
        .expansion
        .iter()
        .map(|token| {
            let mut out = token.clone();
            for (i, p) in params.iter().enumerate() {
                out = out.replace(&format!("%{}%", i + 1), p);
            }
            out
        })
        .collect()
}

/// Resolves a `!<setting>` settings-shortcut to the scope-specific setter
/// command, per §4.H. Hidden settings are excluded by the caller before
/// calling this (they never reach the shortcut table).
pub fn settings_shortcut(scope: &crate::domain::SettingsScope) -> &'static str {
    use crate::domain::SettingsScope::*;
    match scope {
        Global => "set",
        HostingPreset => "hset",
        BattlePreset => "bset",
        Preset | MapPreset | Plugin(_) => "pset",
    }
}

/// The `(directLevel, voteLevel)` pair looked up for a `(cmd, source,
/// player_status, game_state)` tuple (§4.H "Access resolution").
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLevels {
    pub direct: u8,
    pub vote: u8,
}

#[derive(Debug, Clone, Default)]
pub struct RightsMatrix {
    entries: HashMap<(String, Source, PlayerStatus, GameState), AccessLevels>,
    default_entries: HashMap<String, AccessLevels>,
}

impl RightsMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, cmd: &str, source: Source, status: PlayerStatus, state: GameState, levels: AccessLevels) {
        self.entries.insert((cmd.to_string(), source, status, state), levels);
    }

    pub fn define_default(&mut self, cmd: &str, levels: AccessLevels) {
        self.default_entries.insert(cmd.to_string(), levels);
    }

    pub fn lookup(&self, cmd: &str, source: Source, status: PlayerStatus, state: GameState) -> AccessLevels {
        self.entries
            .get(&(cmd.to_string(), source, status, state))
            .copied()
            .or_else(|| self.default_entries.get(cmd).copied())
            .unwrap_or_default()
    }
}

/// Resolves the effective direct-execution access level for a user,
/// applying the plugin-override max and the boss-mode override (§4.E
/// "Boss mode", §4.H "Access resolution").
pub fn effective_access_level(
    base_direct: u8,
    plugin_override: Option<u8>,
    user: &str,
    boss_set: &[String],
    is_boss_override_command: bool,
) -> u8 {
    let overlaid = match plugin_override {
        Some(level) => base_direct.max(level),
        None => base_direct,
    };
    if boss_set.is_empty() || boss_set.iter().any(|b| b == user) || is_boss_override_command {
        overlaid
    } else {
        0
    }
}

/// Tri-value command-handler contract from §7: handlers never raise, they
/// return `(ok, canonical_form, deny_reason)`.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub ok: bool,
    pub canonical_form: Option<Vec<String>>,
    pub deny_reason: Option<String>,
}

impl CommandOutcome {
    pub fn accepted(canonical_form: Vec<String>) -> Self {
        Self { ok: true, canonical_form: Some(canonical_form), deny_reason: None }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self { ok: false, canonical_form: None, deny_reason: Some(reason.into()) }
    }
}

/// Canonicalizes a `!force * (a+b,c)(d)`-style team/id assignment string
/// into a normalized `team→id` map, so re-emitting it is idempotent per
/// the round-trip property in §8. The exact shorthand grammar
/// (`(ids)(teams)`, comma/plus-separated) is the one already implied by
/// the balancer's output contract; unknown tokens are skipped rather than
/// erroring, matching the tri-value "never raise" handler contract.
pub fn canonical_force_assignment(spec: &str) -> HashMap<u8, u8> {
    let mut out = HashMap::new();
    let groups: Vec<&str> = spec
        .trim()
        .trim_start_matches('*')
        .trim()
        .split(')')
        .map(|g| g.trim_start_matches('(').trim())
        .filter(|g| !g.is_empty())
        .collect();
    for (team_idx, group) in groups.iter().enumerate() {
        for id_token in group.split(|c| c == ',' || c == '+') {
            if let Ok(id) = id_token.trim().parse::<u8>() {
                out.insert(id, team_idx as u8);
            }
        }
    }
    out
}

/// A request for a command already under vote is translated to `!vote y`
/// (§4.H "Invocation").
pub fn is_duplicate_of_active_vote(requested_cmd: &[String], active_vote_cmd: &[String]) -> bool {
    requested_cmd == active_vote_cmd
}

/// JSON-RPC 2.0 envelope validated per §4.H/§6. `id` is optional
/// (notification) and, when present, must be scalar; no extra members are
/// allowed (enforced at the `serde` boundary by `deny_unknown_fields`).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(deny_unknown_fields)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn validate(&self) -> Result<(), JsonRpcError> {
        if self.jsonrpc != "2.0" {
            return Err(JsonRpcError::invalid_request());
        }
        if let Some(id) = &self.id {
            if id.is_array() || id.is_object() {
                return Err(JsonRpcError::invalid_request());
            }
        }
        if let Some(params) = &self.params {
            if !params.is_array() && !params.is_object() {
                return Err(JsonRpcError::invalid_params());
            }
        }
        Ok(())
    }

    /// `true` when this is a notification and must not receive a reply
    /// (§9 Open Question: the spec follows "`id?`" wording and emits no
    /// response when `id` is absent).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    pub fn invalid_request() -> Self {
        Self { code: -32600, message: "Invalid Request".into() }
    }
    pub fn invalid_params() -> Self {
        Self { code: -32602, message: "Invalid params".into() }
    }
    pub fn method_not_found() -> Self {
        Self { code: -32601, message: "Method not found".into() }
    }
    pub fn parse_error() -> Self {
        Self { code: -32700, message: "Parse error".into() }
    }
    pub fn rate_limited() -> Self {
        Self { code: -1, message: "rate limit exceeded".into() }
    }
    pub fn forbidden() -> Self {
        Self { code: -2, message: "forbidden".into() }
    }
    pub fn unknown() -> Self {
        Self { code: -3, message: "unknown".into() }
    }
}

/// Reassembles `!#JSONRPC(k/n)` chunks, rejecting non-increasing chunk
/// numbers and mismatched totals (§4.H, §8 boundary: "arriving out of
/// order is dropped").
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    expected_total: Option<u32>,
    next_chunk: u32,
    buffer: String,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one `(k, n, payload)` chunk. Returns `Some(full_json)` once
    /// the final chunk of a well-ordered sequence arrives, `None`
    /// otherwise (including on any ordering/total violation, which also
    /// resets the reassembler).
    pub fn feed(&mut self, k: u32, n: u32, payload: &str) -> Option<String> {
        if k == 0 || n == 0 || k > n {
            self.reset();
            return None;
        }
        match self.expected_total {
            Some(total) if total != n => {
                self.reset();
                return None;
            }
            None => self.expected_total = Some(n),
            _ => {}
        }
        if k != self.next_chunk + 1 {
            self.reset();
            return None;
        }
        self.next_chunk = k;
        self.buffer.push_str(payload);
        if k == n {
            let out = std::mem::take(&mut self.buffer);
            self.reset();
            Some(out)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.expected_total = None;
        self.next_chunk = 0;
        self.buffer.clear();
    }
}

/// Splits a JSON-RPC reply into `(k/n)`-chunked lines that fit the lobby's
/// line-length limit (§4.H), mirroring the chunk scheme used for requests.
pub fn chunk_reply(prefix: &str, body: &str, max_line_len: usize) -> Vec<String> {
    let budget = max_line_len.saturating_sub(prefix.len() + 16);
    if budget == 0 {
        return vec![body.to_string()];
    }
    let chunks: Vec<&str> = {
        let bytes = body.as_bytes();
        let mut v = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let end = (i + budget).min(bytes.len());
            v.push(std::str::from_utf8(&bytes[i..end]).unwrap_or(""));
            i = end;
        }
        if v.is_empty() {
            v.push("");
        }
        v
    };
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| format!("{prefix}({}/{total}) {chunk}", i + 1))
        .collect()
}

/// Resolves the built-in quit/restart/close/rehost family of commands into
/// a `QuitIntent` merge call, keeping the dispatcher itself free of the
/// reduction logic (component K lives in `crate::domain::quit`).
pub fn apply_quit_command(intent: &mut QuitIntent, action: crate::domain::QuitAction, condition: Option<crate::domain::QuitCondition>, exit_code: u8) {
    intent.merge(Some(action), condition, exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_command() {
        let (cmd, params) = tokenize("!kick alice flooding", &[]).unwrap();
        assert_eq!(cmd, "kick");
        assert_eq!(params, vec!["alice", "flooding"]);
    }

    #[test]
    fn quoted_params_preserve_spaces() {
        let (cmd, params) = tokenize(r#"!say "hello there" now"#, &["say"]).unwrap();
        assert_eq!(cmd, "say");
        assert_eq!(params, vec!["hello there", "now"]);
    }

    #[test]
    fn alias_expands_with_positional_substitution() {
        let alias = Alias { expansion: vec!["kick".into(), "%1%".into(), "flooding".into()] };
        let expanded = expand_alias(&alias, &["bob".to_string()]);
        assert_eq!(expanded, vec!["kick", "bob", "flooding"]);
    }

    #[test]
    fn boss_mode_zeroes_non_boss_access() {
        let level = effective_access_level(50, None, "eve", &["alice".to_string()], false);
        assert_eq!(level, 0);
        let boss_level = effective_access_level(50, None, "alice", &["alice".to_string()], false);
        assert_eq!(boss_level, 50);
    }

    #[test]
    fn canonical_force_round_trips_to_equivalent_assignment() {
        let map = canonical_force_assignment("* (1+2,3)(4)");
        assert_eq!(map.get(&1), Some(&0));
        assert_eq!(map.get(&2), Some(&0));
        assert_eq!(map.get(&3), Some(&0));
        assert_eq!(map.get(&4), Some(&1));
    }

    #[test]
    fn out_of_order_chunk_is_dropped() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed(2, 3, "b").is_none());
        assert!(r.feed(1, 3, "a").is_none());
        assert!(r.feed(3, 3, "c").is_none());
    }

    #[test]
    fn well_ordered_chunks_reassemble() {
        let mut r = ChunkReassembler::new();
        assert!(r.feed(1, 2, "{\"jsonrpc\":").is_none());
        assert_eq!(r.feed(2, 2, "\"2.0\"}"), Some("{\"jsonrpc\":\"2.0\"}".to_string()));
    }

    #[test]
    fn chunk_reply_splits_to_fit_budget_and_labels_each_part() {
        let chunks = chunk_reply("!#JSONRPC", &"x".repeat(50), 30);
        assert!(chunks.len() > 1);
        assert!(chunks[0].starts_with("!#JSONRPC(1/"));
    }

    #[test]
    fn jsonrpc_request_without_id_is_a_notification() {
        let req = JsonRpcRequest { jsonrpc: "2.0".into(), method: "status".into(), params: None, id: None };
        assert!(req.validate().is_ok());
        assert!(req.is_notification());
    }
}
