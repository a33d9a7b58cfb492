//! The hosted battle room's membership and settings model (§3, §4.E).

use std::collections::HashMap;

use regex::Regex;

/// A player or spectator's in-battle status, mutated on every
/// `CLIENTBATTLESTATUS` (§3: "every mutation timestamps `battleChange`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleStatus {
    pub is_spectator: bool,
    pub ally_team: u8,
    pub id: u8,
    pub ready: bool,
    pub sync: bool,
    pub side: Side,
    pub bonus: u8,
}

impl Default for BattleStatus {
    fn default() -> Self {
        Self {
            is_spectator: true,
            ally_team: 0,
            id: 0,
            ready: false,
            sync: false,
            side: Side(0),
            bonus: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Side(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A human or bridged member of the hosted battle, created on
/// `JOINEDBATTLE`, destroyed on `LEFTBATTLE`/`KICKFROMBATTLE`.
#[derive(Debug, Clone)]
pub struct BattleMember {
    pub name: String,
    pub account_id: u32,
    pub status: BattleStatus,
    pub color: Color,
    pub script_password: Option<String>,
    /// Room-assigned join sequence, stamped by `BattleRoom::add_member`
    /// (§4.E "newest" enforcement order). Zero until then.
    pub join_order: u64,
}

impl BattleMember {
    pub fn new(name: impl Into<String>, account_id: u32) -> Self {
        Self {
            name: name.into(),
            account_id,
            status: BattleStatus::default(),
            color: Color::default(),
            script_password: None,
            join_order: 0,
        }
    }

    /// Generates a fresh script password for this member (§3: sent via
    /// `/adduser` to the game and re-sent whenever it changes while the
    /// game runs). A random v4 UUID is plenty of entropy for a
    /// per-session join secret and is cheap to regenerate on rejoin.
    pub fn with_generated_script_password(mut self) -> Self {
        self.script_password = Some(uuid::Uuid::new_v4().simple().to_string());
        self
    }
}

/// A locally hosted AI, owned by `crate::use_cases::battle_room`.
#[derive(Debug, Clone)]
pub struct Bot {
    pub name: String,
    pub owner_name: String,
    pub ai_spec: String,
    pub status: BattleStatus,
    pub color: Color,
    /// Room-assigned join sequence, stamped by `BattleRoom::add_bot` (§4.E
    /// "newest" enforcement order). Zero until then.
    pub join_order: u64,
}

/// An integer rectangle in `0..200` describing where an allyteam may place
/// its start position (§3, §4.E "start-rect expansion").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartRect {
    pub team_nb: u8,
    pub left: u16,
    pub top: u16,
    pub right: u16,
    pub bottom: u16,
}

impl StartRect {
    pub const MAX: u16 = 200;

    /// Validates the numeric form: `left<=right, top<=bottom, all<=200`.
    pub fn new(team_nb: u8, left: u16, top: u16, right: u16, bottom: u16) -> Option<Self> {
        if left > right || top > bottom || [left, top, right, bottom].iter().any(|v| *v > Self::MAX) {
            return None;
        }
        Some(Self { team_nb, left, top, right, bottom })
    }

    /// Expands a shorthand `(side, size)` pair into the mirrored rectangles
    /// described in §4.E. `size` must be in `1..=50`; thickness is `2*size`.
    pub fn expand_shorthand(team_nb: u8, shape: ShorthandShape, size: u16) -> Vec<StartRect> {
        if !(1..=50).contains(&size) {
            return Vec::new();
        }
        let thickness = 2 * size;
        let max = Self::MAX;
        match shape {
            ShorthandShape::Horizontal => vec![
                StartRect { team_nb, left: 0, top: 0, right: max, bottom: thickness },
            ],
            ShorthandShape::Vertical => vec![
                StartRect { team_nb, left: 0, top: 0, right: thickness, bottom: max },
            ],
            ShorthandShape::Corner1 => vec![
                StartRect { team_nb, left: 0, top: 0, right: thickness, bottom: thickness },
            ],
            ShorthandShape::Corner2 => vec![
                StartRect { team_nb, left: max - thickness, top: max - thickness, right: max, bottom: max },
            ],
            ShorthandShape::Corners => vec![
                StartRect { team_nb, left: 0, top: 0, right: thickness, bottom: thickness },
                StartRect { team_nb, left: max - thickness, top: max - thickness, right: max, bottom: max },
            ],
            ShorthandShape::Sides => vec![
                StartRect { team_nb, left: 0, top: 0, right: max, bottom: thickness },
                StartRect { team_nb, left: 0, top: max - thickness, right: max, bottom: max },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShorthandShape {
    Horizontal,
    Vertical,
    Corner1,
    Corner2,
    Corners,
    Sides,
}

impl ShorthandShape {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "h" => Some(Self::Horizontal),
            "v" => Some(Self::Vertical),
            "c1" => Some(Self::Corner1),
            "c2" => Some(Self::Corner2),
            "c" => Some(Self::Corners),
            "s" => Some(Self::Sides),
            _ => None,
        }
    }
}

/// Scope of a settings tree node (§3: "global, preset, hostingPreset,
/// battlePreset, mapPreset, and per-plugin").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingsScope {
    Global,
    Preset,
    HostingPreset,
    BattlePreset,
    MapPreset,
    Plugin(String),
}

/// The constraint a setting's value must satisfy.
#[derive(Debug, Clone)]
pub enum AllowedValues {
    /// Enumerated literal values.
    Literal(Vec<String>),
    /// `a-b[%step]` numeric range.
    Range { min: f64, max: f64, step: Option<f64> },
    /// `~`-prefixed regex over string values.
    Pattern(Regex),
}

impl AllowedValues {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            AllowedValues::Literal(values) => values.iter().any(|v| v == value),
            AllowedValues::Range { min, max, step } => {
                let Ok(n) = value.parse::<f64>() else { return false };
                if n < *min || n > *max {
                    return false;
                }
                match step {
                    Some(step) if *step > 0.0 => {
                        let offset = n - min;
                        let steps = offset / step;
                        (steps - steps.round()).abs() < 1e-9
                    }
                    _ => true,
                }
            }
            AllowedValues::Pattern(re) => re.is_match(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Setting {
    pub name: String,
    pub allowed: AllowedValues,
    pub default: String,
    pub current: String,
}

impl Setting {
    /// Assigns `value`, enforcing the invariant from §3 that it must satisfy
    /// the setting's allowed-value constraint.
    pub fn try_set(&mut self, value: impl Into<String>) -> Result<(), SettingError> {
        let value = value.into();
        if !self.allowed.accepts(&value) {
            return Err(SettingError::NotAllowed { name: self.name.clone(), value });
        }
        self.current = value;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingError {
    #[error("value '{value}' is not allowed for setting '{name}'")]
    NotAllowed { name: String, value: String },
    #[error("unknown setting '{0}'")]
    Unknown(String),
}

/// The scoped settings tree (§3).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    scopes: HashMap<SettingsScope, HashMap<String, Setting>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, scope: SettingsScope, setting: Setting) {
        self.scopes.entry(scope).or_default().insert(setting.name.clone(), setting);
    }

    pub fn get(&self, scope: &SettingsScope, name: &str) -> Option<&Setting> {
        self.scopes.get(scope).and_then(|s| s.get(name))
    }

    pub fn set(&mut self, scope: &SettingsScope, name: &str, value: impl Into<String>) -> Result<(), SettingError> {
        let setting = self
            .scopes
            .get_mut(scope)
            .and_then(|s| s.get_mut(name))
            .ok_or_else(|| SettingError::Unknown(name.to_string()))?;
        setting.try_set(value)
    }

    /// Finds which scope (if any) contains `name`, for the `!<setting>`
    /// settings-shortcut resolution in §4.H.
    pub fn find_scope(&self, name: &str) -> Option<&SettingsScope> {
        self.scopes.iter().find(|(_, settings)| settings.contains_key(name)).map(|(scope, _)| scope)
    }

    pub fn current_value(&self, scope: &SettingsScope, name: &str) -> Option<&str> {
        self.get(scope, name).map(|s| s.current.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_script_password_is_present_and_unique_per_call() {
        let a = BattleMember::new("alice", 1).with_generated_script_password();
        let b = BattleMember::new("alice", 1).with_generated_script_password();
        assert!(a.script_password.is_some());
        assert_ne!(a.script_password, b.script_password);
    }
}
