use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Sports with a configured feature set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Nfl,
    Ncaaf,
    Nba,
    Ncaab,
    Mlb,
    Nhl,
    Tennis,
    Mma,
}

/// Static configuration for one sport
#[derive(Debug, Clone, Serialize)]
pub struct SportConfig {
    pub sport: Sport,
    pub display_name: &'static str,
    /// Ordered model inputs; order must match between training and inference
    pub feature_names: &'static [&'static str],
    /// Side 1 / side 2 moneyline feature names
    pub moneyline_features: [&'static str; 2],
    /// Side 1 / side 2 rolling-form feature names
    pub form_features: [&'static str; 2],
    pub is_team_season_sport: bool,
    pub supports_spread: bool,
    pub supports_total: bool,
}

const TEAM_FEATURES: &[&str] = &[
    "team1_moneyline",
    "team2_moneyline",
    "team1_last5",
    "team2_last5",
];

const TENNIS_FEATURES: &[&str] = &[
    "player1_moneyline",
    "player2_moneyline",
    "player1_ranking",
    "player2_ranking",
    "player1_last5",
    "player2_last5",
    "surface_code",
];

const MMA_FEATURES: &[&str] = &[
    "fighter1_moneyline",
    "fighter2_moneyline",
    "fighter1_last5",
    "fighter2_last5",
];

const fn team_sport(
    sport: Sport,
    display_name: &'static str,
    supports_spread: bool,
    supports_total: bool,
) -> SportConfig {
    SportConfig {
        sport,
        display_name,
        feature_names: TEAM_FEATURES,
        moneyline_features: ["team1_moneyline", "team2_moneyline"],
        form_features: ["team1_last5", "team2_last5"],
        is_team_season_sport: true,
        supports_spread,
        supports_total,
    }
}

static REGISTRY: [SportConfig; 8] = [
    team_sport(Sport::Nfl, "NFL", true, true),
    team_sport(Sport::Ncaaf, "College Football", true, true),
    team_sport(Sport::Nba, "NBA", true, true),
    team_sport(Sport::Ncaab, "College Basketball", true, true),
    team_sport(Sport::Mlb, "MLB", false, true),
    team_sport(Sport::Nhl, "NHL", false, true),
    SportConfig {
        sport: Sport::Tennis,
        display_name: "Tennis",
        feature_names: TENNIS_FEATURES,
        moneyline_features: ["player1_moneyline", "player2_moneyline"],
        form_features: ["player1_last5", "player2_last5"],
        is_team_season_sport: false,
        supports_spread: false,
        supports_total: false,
    },
    SportConfig {
        sport: Sport::Mma,
        display_name: "MMA",
        feature_names: MMA_FEATURES,
        moneyline_features: ["fighter1_moneyline", "fighter2_moneyline"],
        form_features: ["fighter1_last5", "fighter2_last5"],
        is_team_season_sport: false,
        supports_spread: false,
        supports_total: false,
    },
];

impl Sport {
    pub const ALL: [Sport; 8] = [
        Sport::Nfl,
        Sport::Ncaaf,
        Sport::Nba,
        Sport::Ncaab,
        Sport::Mlb,
        Sport::Nhl,
        Sport::Tennis,
        Sport::Mma,
    ];

    pub fn config(self) -> &'static SportConfig {
        // Registry entries are declared in `Sport::ALL` order
        &REGISTRY[self as usize]
    }

    /// Stable lowercase identifier used for storage keys and URLs
    pub fn key(self) -> &'static str {
        match self {
            Sport::Nfl => "nfl",
            Sport::Ncaaf => "ncaaf",
            Sport::Nba => "nba",
            Sport::Ncaab => "ncaab",
            Sport::Mlb => "mlb",
            Sport::Nhl => "nhl",
            Sport::Tennis => "tennis",
            Sport::Mma => "mma",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Sport {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Sport::ALL
            .into_iter()
            .find(|sport| sport.key() == wanted)
            .ok_or_else(|| ModelError::UnknownSport(s.to_string()))
    }
}

impl SportConfig {
    /// Whether a feature name carries raw American odds that must be de-vigged
    pub fn is_moneyline_feature(&self, name: &str) -> bool {
        name.contains("moneyline")
    }
}

/// Check every registry entry once at startup
pub fn validate_registry() -> Result<(), String> {
    for (idx, sport) in Sport::ALL.iter().enumerate() {
        let config = &REGISTRY[idx];
        if config.sport != *sport {
            return Err(format!(
                "registry slot {} holds {} instead of {}",
                idx, config.sport, sport
            ));
        }
        if config.feature_names.is_empty() {
            return Err(format!("{} has no features", sport));
        }

        let mut seen = HashSet::new();
        for name in config.feature_names {
            if !seen.insert(*name) {
                return Err(format!("{} lists feature {} twice", sport, name));
            }
        }

        for name in config
            .moneyline_features
            .iter()
            .chain(config.form_features.iter())
        {
            if !seen.contains(name) {
                return Err(format!(
                    "{} references {} outside its feature list",
                    sport, name
                ));
            }
        }
    }
    Ok(())
}
