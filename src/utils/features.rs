//! Feature engineering
//!
//! Turns raw uploaded rows into model inputs: de-vigged moneyline
//! probabilities and chronological rolling form per competitor. Training,
//! prediction and backtesting all derive feature vectors through
//! [`derive_features`] so the preprocessing can never drift between them.

use crate::error::ModelError;
use crate::models::{GameRecord, SportConfig};
use crate::utils::ev_calculator::{remove_vig, try_moneyline_to_probability};
use crate::utils::prediction::{spread_winner, SpreadOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Number of prior outcomes that make up a competitor's recent form
pub const FORM_WINDOW: usize = 5;

/// Form assigned to a competitor with no prior games
pub const NEUTRAL_FORM: f64 = 0.5;

/// How the binary training label is derived when a row has no explicit winner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LabelMode {
    /// Side 1 won outright
    #[default]
    Straight,
    /// Side 1 covered the spread (falls back to outright when no spread)
    AgainstTheSpread,
}

/// Counts of the soft fallbacks taken while preparing data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Odds that were zero or non-finite and became a 0.5 probability
    pub neutral_probability_fallbacks: usize,
    /// Features whose training std was 0 and was replaced by 1
    pub zero_variance_features: Vec<String>,
    /// Rows dropped for missing labels or unusable features
    pub rows_skipped: usize,
}

impl Diagnostics {
    pub fn merge(&mut self, other: Diagnostics) {
        self.neutral_probability_fallbacks += other.neutral_probability_fallbacks;
        self.zero_variance_features
            .extend(other.zero_variance_features);
        self.rows_skipped += other.rows_skipped;
    }
}

/// A record with its derived form features and training label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedGame {
    pub record: GameRecord,
    pub label: Option<u8>,
}

/// Outcome history per competitor, in insertion order
#[derive(Debug, Default)]
pub struct RollingForm {
    history: HashMap<String, Vec<u8>>,
}

impl RollingForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Win rate over the last `FORM_WINDOW` recorded outcomes
    pub fn form(&self, competitor: &str) -> f64 {
        match self.history.get(competitor) {
            Some(outcomes) if !outcomes.is_empty() => {
                let recent = &outcomes[outcomes.len().saturating_sub(FORM_WINDOW)..];
                let wins: u32 = recent.iter().map(|&o| u32::from(o)).sum();
                wins as f64 / recent.len() as f64
            }
            _ => NEUTRAL_FORM,
        }
    }

    pub fn record(&mut self, competitor: &str, won: bool) {
        self.history
            .entry(competitor.to_string())
            .or_default()
            .push(u8::from(won));
    }
}

/// Stable sort by chronological key; rows without a key keep upload order
/// and come first
pub fn sort_chronologically(rows: &mut [GameRecord]) {
    rows.sort_by_key(GameRecord::chrono_key);
}

/// Outright winner: explicit label, else final scores. Ties give `None`.
pub fn straight_winner(record: &GameRecord) -> Option<u8> {
    if let Some(winner @ (0 | 1)) = record.winner {
        return Some(winner);
    }
    let (s1, s2) = scores(record)?;
    if s1 > s2 {
        Some(1)
    } else if s1 < s2 {
        Some(0)
    } else {
        None
    }
}

/// Training label for a row under `mode`. Pushes give `None`.
pub fn determine_winner(record: &GameRecord, mode: LabelMode) -> Option<u8> {
    if let Some(winner @ (0 | 1)) = record.winner {
        return Some(winner);
    }

    match (mode, record.spread.filter(|s| s.is_finite())) {
        (LabelMode::AgainstTheSpread, Some(spread)) => {
            let (s1, s2) = scores(record)?;
            match spread_winner(s1, s2, spread) {
                SpreadOutcome::Home => Some(1),
                SpreadOutcome::Away => Some(0),
                SpreadOutcome::Push => None,
            }
        }
        _ => straight_winner(record),
    }
}

fn scores(record: &GameRecord) -> Option<(f64, f64)> {
    match (record.team1_score, record.team2_score) {
        (Some(s1), Some(s2)) if s1.is_finite() && s2.is_finite() => Some((s1, s2)),
        _ => None,
    }
}

/// Assign each row its pre-game rolling form and label.
///
/// Rows must already be in chronological order. A row's form reflects only
/// earlier rows; its own outcome is appended to the history afterwards.
pub fn compute_rolling_form(
    rows: &[GameRecord],
    config: &SportConfig,
    mode: LabelMode,
) -> Vec<PreparedGame> {
    let mut form = RollingForm::new();
    let [form1, form2] = config.form_features;

    rows.iter()
        .map(|row| {
            let mut record = row.clone();
            record
                .features
                .insert(form1.to_string(), form.form(&record.team1));
            record
                .features
                .insert(form2.to_string(), form.form(&record.team2));

            let label = determine_winner(&record, mode);
            if let Some(label) = label {
                form.record(&record.team1, label == 1);
                form.record(&record.team2, label == 0);
            }

            PreparedGame { record, label }
        })
        .collect()
}

/// Build one feature vector in `feature_names` order.
///
/// Moneyline features are replaced by implied probabilities, de-vigged
/// when both sides of the market are model inputs. Returns the names of
/// missing or non-finite inputs on failure.
pub fn derive_features<S, F>(
    config: &SportConfig,
    feature_names: &[S],
    lookup: F,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<f64>, Vec<String>>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<f64>,
{
    let invalid: Vec<String> = feature_names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !lookup(*name).is_some_and(f64::is_finite))
        .map(str::to_string)
        .collect();
    if !invalid.is_empty() {
        return Err(invalid);
    }

    let [ml1, ml2] = config.moneyline_features;
    let has_both_sides = [ml1, ml2]
        .iter()
        .all(|side| feature_names.iter().any(|n| n.as_ref() == *side));

    let mut implied = |name: &str| -> f64 {
        let raw = lookup(name).unwrap_or(f64::NAN);
        try_moneyline_to_probability(raw).unwrap_or_else(|| {
            diagnostics.neutral_probability_fallbacks += 1;
            0.5
        })
    };

    let fair = if has_both_sides {
        let p1 = implied(ml1);
        let p2 = implied(ml2);
        Some(remove_vig(p1, p2))
    } else {
        None
    };

    let mut values = Vec::with_capacity(feature_names.len());
    for name in feature_names.iter().map(AsRef::as_ref) {
        let value = match fair {
            Some((p1, _)) if name == ml1 => p1,
            Some((_, p2)) if name == ml2 => p2,
            _ if config.is_moneyline_feature(name) => implied(name),
            _ => lookup(name).unwrap_or(0.0),
        };
        values.push(value);
    }

    Ok(values)
}

/// Design matrix and labels for training
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

/// Keep rows with a binary label and usable features; silently drop the rest
pub fn build_feature_matrix<S: AsRef<str>>(
    games: &[PreparedGame],
    config: &SportConfig,
    feature_names: &[S],
    diagnostics: &mut Diagnostics,
) -> Result<FeatureMatrix, ModelError> {
    let mut matrix = FeatureMatrix::default();
    let mut labeled = 0usize;

    for game in games {
        let Some(label) = game.label else {
            diagnostics.rows_skipped += 1;
            continue;
        };
        labeled += 1;

        match derive_features(
            config,
            feature_names,
            |name| game.record.raw_feature(config, name),
            diagnostics,
        ) {
            Ok(row) => {
                matrix.x.push(row);
                matrix.y.push(f64::from(label));
            }
            Err(missing) => {
                debug!(
                    "Skipping {} for training, unusable features: {}",
                    game.record.matchup(),
                    missing.join(", ")
                );
                diagnostics.rows_skipped += 1;
            }
        }
    }

    if labeled == 0 {
        return Err(ModelError::NoLabels);
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn game(team1: &str, team2: &str, s1: f64, s2: f64) -> GameRecord {
        let mut g = GameRecord::new(team1, team2);
        g.team1_moneyline = Some(-150);
        g.team2_moneyline = Some(130);
        g.team1_score = Some(s1);
        g.team2_score = Some(s2);
        g
    }

    #[test]
    fn test_form_uses_only_prior_games() {
        let config = Sport::Nfl.config();
        // "Hawks" wins twice, then loses the third game
        let rows = vec![
            game("Hawks", "Bears", 21.0, 10.0),
            game("Lions", "Hawks", 7.0, 14.0),
            game("Hawks", "Rams", 3.0, 30.0),
        ];
        let prepared = compute_rolling_form(&rows, config, LabelMode::Straight);

        assert_eq!(prepared[0].record.features["team1_last5"], NEUTRAL_FORM);
        assert_eq!(prepared[1].record.features["team2_last5"], 1.0);
        // Third game's form reflects rows 1 and 2 only, not its own loss
        assert_eq!(prepared[2].record.features["team1_last5"], 1.0);
        assert_eq!(prepared[2].label, Some(0));
        assert_eq!(prepared[2].record.features["team2_last5"], NEUTRAL_FORM);
    }

    #[test]
    fn test_form_window_is_bounded() {
        let mut form = RollingForm::new();
        for _ in 0..5 {
            form.record("A", false);
        }
        for _ in 0..5 {
            form.record("A", true);
        }
        assert_eq!(form.form("A"), 1.0);
        form.record("A", false);
        assert_relative_eq!(form.form("A"), 0.8);
        form.record("A", false);
        assert_relative_eq!(form.form("A"), 0.6);
        assert_eq!(form.form("unknown"), NEUTRAL_FORM);
    }

    #[test]
    fn test_determine_winner() {
        let mut g = game("A", "B", 20.0, 17.0);
        assert_eq!(determine_winner(&g, LabelMode::Straight), Some(1));

        // Home favored by 3.5 wins by 3: away covers
        g.spread = Some(-3.5);
        assert_eq!(determine_winner(&g, LabelMode::AgainstTheSpread), Some(0));
        assert_eq!(determine_winner(&g, LabelMode::Straight), Some(1));

        // Push against the spread has no label
        g.spread = Some(-3.0);
        assert_eq!(determine_winner(&g, LabelMode::AgainstTheSpread), None);

        // Explicit label wins over scores
        g.winner = Some(0);
        assert_eq!(determine_winner(&g, LabelMode::Straight), Some(0));

        let tie = game("A", "B", 10.0, 10.0);
        assert_eq!(straight_winner(&tie), None);
        assert_eq!(straight_winner(&GameRecord::new("A", "B")), None);
    }

    #[test]
    fn test_sort_chronologically_is_stable() {
        let mut rows: Vec<GameRecord> = (0..3)
            .map(|i| GameRecord::new(format!("T{}", i), "X"))
            .collect();
        rows[0].date = NaiveDate::from_ymd_opt(2023, 10, 1);
        rows[1].date = NaiveDate::from_ymd_opt(2023, 9, 1);
        sort_chronologically(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.team1.as_str()).collect();
        assert_eq!(order, vec!["T2", "T1", "T0"]);
    }

    #[test]
    fn test_derive_features_devigs_moneylines() {
        let config = Sport::Nfl.config();
        let inputs = HashMap::from([
            ("team1_moneyline", -150.0),
            ("team2_moneyline", 130.0),
            ("team1_last5", 0.6),
            ("team2_last5", 0.4),
        ]);
        let mut diagnostics = Diagnostics::default();
        let values = derive_features(
            config,
            config.feature_names,
            |name| inputs.get(name).copied(),
            &mut diagnostics,
        )
        .unwrap();

        assert_relative_eq!(values[0] + values[1], 1.0, epsilon = 1e-12);
        assert!(values[0] > values[1]);
        assert_eq!(&values[2..], &[0.6, 0.4]);
        assert_eq!(diagnostics, Diagnostics::default());
    }

    #[test]
    fn test_derive_features_reports_missing_and_fallbacks() {
        let config = Sport::Nfl.config();
        let mut diagnostics = Diagnostics::default();
        let err = derive_features(
            config,
            config.feature_names,
            |name| match name {
                "team1_moneyline" => Some(f64::NAN),
                "team2_moneyline" => Some(120.0),
                _ => None,
            },
            &mut diagnostics,
        )
        .unwrap_err();
        assert_eq!(err, vec!["team1_moneyline", "team1_last5", "team2_last5"]);

        let values = derive_features(
            config,
            config.feature_names,
            |name| if name.contains("moneyline") { Some(0.0) } else { Some(0.5) },
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(values, vec![0.5, 0.5, 0.5, 0.5]);
        assert_eq!(diagnostics.neutral_probability_fallbacks, 2);
    }

    #[test]
    fn test_build_feature_matrix_filters_rows() {
        let config = Sport::Nfl.config();
        let mut unusable = game("C", "D", 3.0, 0.0);
        unusable.team2_moneyline = None;
        let rows = vec![
            game("A", "B", 10.0, 3.0),
            game("A", "B", 10.0, 10.0), // tie, no label
            unusable,
        ];
        let prepared = compute_rolling_form(&rows, config, LabelMode::Straight);
        let mut diagnostics = Diagnostics::default();
        let matrix =
            build_feature_matrix(&prepared, config, config.feature_names, &mut diagnostics)
                .unwrap();

        assert_eq!(matrix.y.len(), 1);
        assert_eq!(matrix.y, vec![1.0]);
        assert_eq!(matrix.x[0].len(), 4);
        assert_eq!(diagnostics.rows_skipped, 2);
    }

    #[test]
    fn test_build_feature_matrix_without_labels() {
        let config = Sport::Nfl.config();
        let rows = vec![GameRecord::new("A", "B")];
        let prepared = compute_rolling_form(&rows, config, LabelMode::Straight);
        let result = build_feature_matrix(
            &prepared,
            config,
            config.feature_names,
            &mut Diagnostics::default(),
        );
        assert!(matches!(result, Err(ModelError::NoLabels)));
    }
}
