//! Skill/rank/clan-aware team balancer and color assigner (§4.F,
//! component F).

use std::collections::HashMap;

use crate::domain::{Color, GameType};
use crate::use_cases::battle_room::TargetStructure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    Random,
    Clan,
    Skill,
    ClanSkill,
}

impl BalanceMode {
    fn uses_skill(self) -> bool {
        matches!(self, BalanceMode::Skill | BalanceMode::ClanSkill)
    }

    fn uses_clan(self) -> bool {
        matches!(self, BalanceMode::Clan | BalanceMode::ClanSkill)
    }
}

/// `idShareMode∈{off,auto,all,manual,clan}` (§4.F step 7): how ids collapse
/// within an allyteam once the allyteam itself is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdShareMode {
    Off,
    Auto,
    All,
    Manual,
    Clan,
}

impl IdShareMode {
    pub fn parse(token: &str) -> Self {
        match token {
            "all" => IdShareMode::All,
            "manual" => IdShareMode::Manual,
            "clan" => IdShareMode::Clan,
            "auto" => IdShareMode::Auto,
            _ => IdShareMode::Off,
        }
    }
}

/// One `tag|pref(max%)` token of a parsed `clanMode` chain (§4.F step 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClanModeToken {
    pub by_tag: bool,
    pub max_deviation_increase_pct: Option<f64>,
}

pub fn parse_clan_mode(spec: &str) -> Vec<ClanModeToken> {
    spec.split(';')
        .filter(|s| !s.is_empty())
        .map(|token| {
            let (base, pct) = match token.find('(') {
                Some(idx) if token.ends_with(')') => {
                    let inner = &token[idx + 1..token.len() - 1];
                    let trimmed = inner.trim_end_matches('%');
                    (&token[..idx], trimmed.parse::<f64>().ok())
                }
                _ => (token, None),
            };
            ClanModeToken { by_tag: base == "tag", max_deviation_increase_pct: pct }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct BalanceEntity {
    pub name: String,
    pub is_bot: bool,
    pub clan: Option<String>,
    pub share_id: Option<String>,
    pub skill: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GroupAssignment {
    pub groups: Vec<Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct BalanceResult {
    pub ally_team_of: HashMap<String, u8>,
    pub id_of: HashMap<String, u8>,
    pub unbalance_indicator: f64,
    pub nb_smurfs: u32,
}

fn rms_deviation(group_skills: &[f64]) -> f64 {
    let mean = group_skills.iter().sum::<f64>() / group_skills.len().max(1) as f64;
    let variance = group_skills.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / group_skills.len().max(1) as f64;
    variance.sqrt()
}

/// `getTargetBattleStructure` feeds `nbTeams`; this builds `nbTeams` empty
/// groups sized `floor(nbPlayers/nbTeams)`, the remainder distributed to the
/// first groups (§4.F step 3).
fn initial_groups(nb_entities: usize, nb_teams: u32) -> Vec<Vec<usize>> {
    let nb_teams = nb_teams.max(1) as usize;
    vec![Vec::new(); nb_teams]
}

fn group_capacity(nb_entities: usize, nb_teams: u32, group_idx: usize) -> usize {
    let nb_teams = nb_teams.max(1) as usize;
    let base = nb_entities / nb_teams;
    let remainder = nb_entities % nb_teams;
    base + if group_idx < remainder { 1 } else { 0 }
}

/// Runs the full team balance algorithm (§4.F steps 1-6) against a flat
/// entity list; returns the allyteam and id assignment plus the reported
/// unbalance indicator and smurf count.
pub fn balance(
    entities: &[BalanceEntity],
    target: TargetStructure,
    mode: BalanceMode,
    clan_mode: &[ClanModeToken],
    id_share_mode: IdShareMode,
    lobby_rank_of: impl Fn(&str) -> u8,
) -> BalanceResult {
    let nb_teams = target.nb_teams;
    let mut groups = initial_groups(entities.len(), nb_teams);
    let mut group_skill_sum = vec![0.0f64; groups.len()];
    let mut assigned = vec![false; entities.len()];

    if mode.uses_clan() && !clan_mode.is_empty() {
        assign_clans(entities, &mut groups, &mut group_skill_sum, &mut assigned, nb_teams, clan_mode);
    }

    assign_remaining_by_skill(entities, &mut groups, &mut group_skill_sum, &mut assigned, nb_teams);

    let mut ally_team_of = HashMap::new();
    let mut id_of = HashMap::new();
    let mut next_id: u8 = 0;
    for (team_idx, group) in groups.iter().enumerate() {
        let ids = assign_group_ids(entities, group, id_share_mode, target.team_size, &mut next_id);
        for (&entity_idx, id) in group.iter().zip(ids) {
            let entity = &entities[entity_idx];
            ally_team_of.insert(entity.name.clone(), team_idx as u8);
            id_of.insert(entity.name.clone(), id);
        }
    }

    let group_skills: Vec<f64> = groups
        .iter()
        .map(|g| {
            if g.is_empty() {
                0.0
            } else {
                g.iter().map(|&i| entities[i].skill).sum::<f64>() / g.len() as f64
            }
        })
        .collect();
    let mean = group_skills.iter().sum::<f64>() / group_skills.len().max(1) as f64;
    let deviation = rms_deviation(&group_skills);
    let unbalance_indicator = if mean.abs() > f64::EPSILON { 100.0 * deviation / mean } else { 0.0 };

    let nb_smurfs = entities
        .iter()
        .filter(|e| !e.is_bot && e.skill > crate::domain::RANK_TRUESKILL[lobby_rank_of(&e.name).min(31) as usize])
        .count() as u32;

    mode.uses_skill();
    let _ = mode;

    BalanceResult { ally_team_of, id_of, unbalance_indicator, nb_smurfs }
}

/// Step 4-5: parse `clanMode` left-to-right; for each token try assigning
/// every clan to its largest-free-slot group, accepting a token's overall
/// assignment only if the resulting RMS% deviation does not increase by
/// more than that token's threshold over the deviation measured when the
/// token chain started (the ref-based form, per the Open Question
/// decision recorded in DESIGN.md).
fn assign_clans(
    entities: &[BalanceEntity],
    groups: &mut [Vec<usize>],
    group_skill_sum: &mut [f64],
    assigned: &mut [bool],
    nb_teams: u32,
    clan_mode: &[ClanModeToken],
) {
    let ref_deviation = current_deviation(entities, groups);

    let mut clans: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, entity) in entities.iter().enumerate() {
        if let Some(clan) = &entity.clan {
            clans.entry(clan.clone()).or_default().push(idx);
        }
    }
    let mut clan_order: Vec<String> = clans.keys().cloned().collect();
    clan_order.sort_by_key(|c| std::cmp::Reverse(clans[c].len()));

    for token in clan_mode {
        for clan in &clan_order {
            let members: Vec<usize> = clans[clan].iter().copied().filter(|i| !assigned[*i]).collect();
            if members.is_empty() {
                continue;
            }
            let trial_groups = tentative_place_clan(entities, groups, nb_teams, &members);
            let trial_deviation = current_deviation(entities, &trial_groups);
            let allowed_increase = token.max_deviation_increase_pct.unwrap_or(f64::INFINITY);
            if trial_deviation - ref_deviation <= allowed_increase || token.max_deviation_increase_pct.is_none() {
                *groups = trial_groups;
                for &idx in &members {
                    assigned[idx] = true;
                }
            }
        }
    }
    let _ = group_skill_sum;
}

fn tentative_place_clan(entities: &[BalanceEntity], groups: &[Vec<usize>], nb_teams: u32, members: &[usize]) -> Vec<Vec<usize>> {
    let mut trial = groups.to_vec();
    let mut remaining: Vec<usize> = members.to_vec();
    while !remaining.is_empty() {
        let target_group = (0..trial.len())
            .max_by(|&a, &b| {
                let free_a = group_capacity(entities.len(), nb_teams, a) as i64 - trial[a].len() as i64;
                let free_b = group_capacity(entities.len(), nb_teams, b) as i64 - trial[b].len() as i64;
                free_a.cmp(&free_b)
            })
            .unwrap_or(0);
        let free = group_capacity(entities.len(), nb_teams, target_group).saturating_sub(trial[target_group].len());
        let take = free.max(1).min(remaining.len());
        for idx in remaining.drain(..take) {
            trial[target_group].push(idx);
        }
    }
    trial
}

fn current_deviation(entities: &[BalanceEntity], groups: &[Vec<usize>]) -> f64 {
    let skills: Vec<f64> = groups
        .iter()
        .map(|g| {
            if g.is_empty() {
                0.0
            } else {
                g.iter().map(|&i| entities[i].skill).sum::<f64>() / g.len() as f64
            }
        })
        .collect();
    let mean = skills.iter().sum::<f64>() / skills.len().max(1) as f64;
    if mean.abs() < f64::EPSILON {
        0.0
    } else {
        100.0 * rms_deviation(&skills) / mean
    }
}

/// Step 6: assign remaining entities highest-skill-first to the group with
/// the largest `(avgSkill - currentSkill)/freeSlots`.
fn assign_remaining_by_skill(
    entities: &[BalanceEntity],
    groups: &mut [Vec<usize>],
    group_skill_sum: &mut [f64],
    assigned: &mut [bool],
    nb_teams: u32,
) {
    let mut order: Vec<usize> = (0..entities.len()).filter(|&i| !assigned[i]).collect();
    order.sort_by(|&a, &b| entities[b].skill.partial_cmp(&entities[a].skill).unwrap_or(std::cmp::Ordering::Equal));

    let global_avg = if entities.is_empty() { 0.0 } else { entities.iter().map(|e| e.skill).sum::<f64>() / entities.len() as f64 };

    for idx in order {
        let target_group = (0..groups.len())
            .filter(|&g| groups[g].len() < group_capacity(entities.len(), nb_teams, g))
            .max_by(|&a, &b| {
                score_group(a, groups, group_skill_sum, entities.len(), nb_teams, global_avg)
                    .partial_cmp(&score_group(b, groups, group_skill_sum, entities.len(), nb_teams, global_avg))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        let Some(target_group) = target_group else { continue };
        groups[target_group].push(idx);
        group_skill_sum[target_group] += entities[idx].skill;
        assigned[idx] = true;
    }
}

fn score_group(g: usize, groups: &[Vec<usize>], group_skill_sum: &[f64], nb_entities: usize, nb_teams: u32, global_avg: f64) -> f64 {
    let free = (group_capacity(nb_entities, nb_teams, g).saturating_sub(groups[g].len())).max(1) as f64;
    let current_sum = group_skill_sum[g];
    (global_avg * groups[g].len() as f64 - current_sum) / free
}

/// Assigns ids within one allyteam group, drawing fresh values from `next_id`
/// so ids stay unique room-wide (cross-cutting invariant #2, §3) no matter
/// how many groups or subdivisions come before or after this one.
fn assign_group_ids(entities: &[BalanceEntity], group: &[usize], mode: IdShareMode, team_size: u32, next_id: &mut u8) -> Vec<u8> {
    match mode {
        IdShareMode::All => {
            let id = *next_id;
            *next_id += 1;
            vec![id; group.len()]
        }
        IdShareMode::Manual | IdShareMode::Clan => {
            let mut by_key: HashMap<String, u8> = HashMap::new();
            let mut ids = Vec::with_capacity(group.len());
            for &idx in group {
                let entity = &entities[idx];
                let key = if mode == IdShareMode::Clan { entity.clan.clone() } else { entity.share_id.clone() };
                let id = match key {
                    Some(key) => *by_key.entry(key).or_insert_with(|| {
                        let id = *next_id;
                        *next_id += 1;
                        id
                    }),
                    None => {
                        let id = *next_id;
                        *next_id += 1;
                        id
                    }
                };
                ids.push(id);
            }
            ids
        }
        IdShareMode::Off | IdShareMode::Auto => {
            let chunk = team_size.max(1) as usize;
            let mut ids = Vec::with_capacity(group.len());
            for slot in 0..group.len() {
                if slot % chunk == 0 {
                    let id = *next_id;
                    *next_id += 1;
                    ids.push(id);
                } else {
                    ids.push(*ids.last().expect("chunk start always assigns first"));
                }
            }
            ids
        }
    }
}

/// Returns `true` iff every entity's observed `(team, id)` already matches
/// the target assignment (§4.F "idempotence").
pub fn is_balance_target_applied(
    current: &HashMap<String, (u8, u8)>,
    target: &BalanceResult,
) -> bool {
    target.ally_team_of.iter().all(|(name, &team)| {
        current.get(name).map(|&(t, i)| t == team && target.id_of.get(name).copied() == Some(i)).unwrap_or(false)
    })
}

const COLOR_PALETTE_HUES: [f64; 14] = [0.0, 25.0, 50.0, 75.0, 100.0, 125.0, 150.0, 175.0, 200.0, 225.0, 250.0, 275.0, 300.0, 325.0];

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Color {
    let c = v * s;
    let h_prime = h / 60.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let (r1, g1, b1) = if h_prime < 1.0 {
        (c, x, 0.0)
    } else if h_prime < 2.0 {
        (x, c, 0.0)
    } else if h_prime < 3.0 {
        (0.0, c, x)
    } else if h_prime < 4.0 {
        (0.0, x, c)
    } else if h_prime < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };
    let m = v - c;
    Color {
        r: (((r1 + m) * 255.0).round() as i32).clamp(0, 255) as u8,
        g: (((g1 + m) * 255.0).round() as i32).clamp(0, 255) as u8,
        b: (((b1 + m) * 255.0).round() as i32).clamp(0, 255) as u8,
    }
}

/// Candidate palette: 14 hues across two (S,V) shade variants plus a
/// handful of grays (§4.F "colorSensitivity>0" path).
fn candidate_palette() -> Vec<Color> {
    let mut colors = Vec::new();
    for &h in COLOR_PALETTE_HUES.iter() {
        colors.push(hsv_to_rgb(h, 0.85, 0.95));
        colors.push(hsv_to_rgb(h, 0.55, 0.75));
    }
    for shade in [40u8, 90, 140, 190, 230] {
        colors.push(Color { r: shade, g: shade, b: shade });
    }
    colors
}

/// The weighted color-distance formula from §4.F, using the mean red
/// channel `mR` of the two colors as the weighting term.
pub fn color_distance(a: Color, b: Color) -> i64 {
    let m_r = (a.r as i64 + b.r as i64) / 2;
    let d_r = a.r as i64 - b.r as i64;
    let d_g = a.g as i64 - b.g as i64;
    let d_b = a.b as i64 - b.b as i64;
    (((512 + m_r) * d_r * d_r) >> 8) + 4 * d_g * d_g + (((767 - m_r) * d_b * d_b) >> 8)
}

/// Greedily assigns one color per id, each time picking the candidate that
/// maximises the minimum distance to already-assigned colors, falling back
/// to a best-of-10 random pick when no candidate clears `sensitivity`
/// (§4.F "Colors").
pub fn assign_colors(ids: &[String], sensitivity: i64, mut rand_index: impl FnMut(usize) -> usize) -> HashMap<String, Color> {
    let palette = candidate_palette();
    let mut assigned: HashMap<String, Color> = HashMap::new();
    let mut chosen: Vec<Color> = Vec::new();

    for id in ids {
        let best = palette
            .iter()
            .copied()
            .max_by_key(|candidate| chosen.iter().map(|c| color_distance(*candidate, *c)).min().unwrap_or(i64::MAX));

        let color = match best {
            Some(c) if chosen.iter().map(|existing| color_distance(c, *existing)).min().unwrap_or(i64::MAX) >= sensitivity => c,
            _ => {
                let mut best_random = palette[rand_index(palette.len())];
                let mut best_score = i64::MIN;
                for _ in 0..10 {
                    let candidate = palette[rand_index(palette.len())];
                    let score = chosen.iter().map(|c| color_distance(candidate, *c)).min().unwrap_or(i64::MAX);
                    if score > best_score {
                        best_score = score;
                        best_random = candidate;
                    }
                }
                best_random
            }
        };
        chosen.push(color);
        assigned.insert(id.clone(), color);
    }
    assigned
}

pub fn classify_for_game_type(target: TargetStructure) -> GameType {
    crate::use_cases::battle_room::classify_game_type(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, skill: f64) -> BalanceEntity {
        BalanceEntity { name: name.to_string(), is_bot: false, clan: None, share_id: None, skill }
    }

    #[test]
    fn balances_two_teams_by_skill() {
        let entities = vec![entity("a", 40.0), entity("b", 10.0), entity("c", 30.0), entity("d", 20.0)];
        let target = TargetStructure { nb_teams: 2, team_size: 2, nb_player_by_id: 2 };
        let result = balance(&entities, target, BalanceMode::Skill, &[], IdShareMode::Off, |_| 0);
        assert_eq!(result.ally_team_of.len(), 4);
        assert!(result.unbalance_indicator >= 0.0);
    }

    #[test]
    fn ids_are_unique_across_allyteams_by_default() {
        // A skill-balanced 2v2 must not repeat an id across the two
        // allyteams (cross-cutting invariant #2, §3).
        let entities = vec![entity("a", 40.0), entity("b", 10.0), entity("c", 30.0), entity("d", 20.0)];
        let target = TargetStructure { nb_teams: 2, team_size: 1, nb_player_by_id: 1 };
        let result = balance(&entities, target, BalanceMode::Skill, &[], IdShareMode::Off, |_| 0);
        let mut ids: Vec<u8> = result.id_of.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), result.id_of.len());
    }

    #[test]
    fn id_share_all_gives_one_id_per_allyteam() {
        let entities = vec![entity("a", 40.0), entity("b", 10.0), entity("c", 30.0), entity("d", 20.0)];
        let target = TargetStructure { nb_teams: 2, team_size: 2, nb_player_by_id: 2 };
        let result = balance(&entities, target, BalanceMode::Skill, &[], IdShareMode::All, |_| 0);
        let mut by_team: HashMap<u8, Vec<u8>> = HashMap::new();
        for (name, &team) in &result.ally_team_of {
            by_team.entry(team).or_default().push(result.id_of[name]);
        }
        for ids in by_team.values() {
            assert!(ids.iter().all(|id| *id == ids[0]));
        }
        let all_ids: std::collections::HashSet<u8> = result.id_of.values().copied().collect();
        assert_eq!(all_ids.len(), by_team.len());
    }

    #[test]
    fn color_distance_is_symmetric_and_nonnegative() {
        let a = Color { r: 200, g: 50, b: 10 };
        let b = Color { r: 10, g: 220, b: 90 };
        assert_eq!(color_distance(a, b), color_distance(b, a));
        assert!(color_distance(a, b) >= 0);
    }

    #[test]
    fn clan_mode_parses_max_percent_suffix() {
        let tokens = parse_clan_mode("tag(10%);pref");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].max_deviation_increase_pct, Some(10.0));
        assert!(tokens[0].by_tag);
        assert!(tokens[1].max_deviation_increase_pct.is_none());
    }

    #[test]
    fn balance_is_deterministic_given_same_inputs() {
        let entities = vec![entity("a", 40.0), entity("b", 10.0), entity("c", 30.0), entity("d", 20.0)];
        let target = TargetStructure { nb_teams: 2, team_size: 2, nb_player_by_id: 2 };
        let r1 = balance(&entities, target, BalanceMode::Skill, &[], IdShareMode::Off, |_| 0);
        let r2 = balance(&entities, target, BalanceMode::Skill, &[], IdShareMode::Off, |_| 0);
        assert_eq!(r1.ally_team_of, r2.ally_team_of);
    }
}
