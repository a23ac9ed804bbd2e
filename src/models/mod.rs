pub mod sport;

pub use sport::{Sport, SportConfig};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One historical matchup. Side 1 is the home side when a spread applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub team1: String,
    pub team2: String,
    pub team1_moneyline: Option<i32>, // American odds format (e.g., -110, +150)
    pub team2_moneyline: Option<i32>,
    /// Negative when side 1 is favored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1_spread_odds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2_spread_odds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_odds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub under_odds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team1_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team2_score: Option<f64>,
    /// 1 = side 1 won, 0 = side 2 won
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,
    /// Sport-specific numeric columns and derived form values
    #[serde(default, flatten, deserialize_with = "finite_numbers")]
    pub features: BTreeMap<String, f64>,
}

/// Keep extra columns that hold a finite number (or a numeric string);
/// labels, notes and nulls are not model inputs
fn finite_numbers<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number.filter(|v| v.is_finite()).map(|v| (name, v))
        })
        .collect())
}

impl GameRecord {
    pub fn new(team1: impl Into<String>, team2: impl Into<String>) -> Self {
        Self {
            team1: team1.into(),
            team2: team2.into(),
            ..Default::default()
        }
    }

    /// Chronological ordering key: date, else year+week, else season+week
    pub fn chrono_key(&self) -> Option<(i32, u32)> {
        if let Some(date) = self.date {
            return Some((date.year(), date.ordinal()));
        }
        let week = self.week.unwrap_or(0) * 7;
        self.year
            .or(self.season)
            .map(|year| (year, week))
    }

    /// Raw value for a named feature, before any de-vigging
    pub fn raw_feature(&self, config: &SportConfig, name: &str) -> Option<f64> {
        if name == config.moneyline_features[0] {
            self.team1_moneyline.map(f64::from)
        } else if name == config.moneyline_features[1] {
            self.team2_moneyline.map(f64::from)
        } else {
            self.features.get(name).copied()
        }
    }

    /// Human-readable matchup label
    pub fn matchup(&self) -> String {
        format!("{} vs {}", self.team1, self.team2)
    }
}

/// Parameters of one training run. Created atomically and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub features: Vec<String>,
}

impl TrainedModel {
    /// Verify all per-feature vectors agree in length and every parameter
    /// is finite, with strictly positive stds
    pub fn check_shape(&self) -> Result<(), crate::error::ModelError> {
        let n = self.features.len();
        if self.weights.len() != n || self.means.len() != n || self.stds.len() != n {
            return Err(crate::error::ModelError::ModelShape(format!(
                "{} features, {} weights, {} means, {} stds",
                n,
                self.weights.len(),
                self.means.len(),
                self.stds.len()
            )));
        }

        let mut params = self
            .weights
            .iter()
            .chain(&self.means)
            .chain(&self.stds)
            .chain(std::iter::once(&self.bias));
        if params.any(|v| !v.is_finite()) {
            return Err(crate::error::ModelError::ModelShape(
                "non-finite parameter".to_string(),
            ));
        }
        if let Some(pos) = self.stds.iter().position(|&std| std <= 0.0) {
            return Err(crate::error::ModelError::ModelShape(format!(
                "std for {} must be positive, got {}",
                self.features[pos], self.stds[pos]
            )));
        }
        Ok(())
    }

    /// Feature names ranked by absolute weight, strongest first
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut ranked: Vec<FeatureImportance> = self
            .features
            .iter()
            .zip(&self.weights)
            .map(|(name, &weight)| FeatureImportance {
                feature: name.clone(),
                weight,
                importance: weight.abs(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub weight: f64,
    pub importance: f64,
}

/// Training-set accuracy at a 0.5 threshold and the sample count used
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub accuracy: f64,
    pub samples: usize,
}

/// Persisted model blob: `{weights, bias, means, stds, features}` plus stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredModel {
    #[serde(flatten)]
    pub model: TrainedModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<TrainingStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrono_key_prefers_date() {
        let mut game = GameRecord::new("A", "B");
        game.year = Some(2020);
        game.week = Some(3);
        assert_eq!(game.chrono_key(), Some((2020, 21)));

        game.date = NaiveDate::from_ymd_opt(2023, 1, 10);
        assert_eq!(game.chrono_key(), Some((2023, 10)));

        let mut season_only = GameRecord::new("A", "B");
        season_only.season = Some(2019);
        season_only.week = Some(1);
        assert_eq!(season_only.chrono_key(), Some((2019, 7)));
        assert_eq!(GameRecord::new("A", "B").chrono_key(), None);
    }

    #[test]
    fn test_extra_columns_keep_only_numbers() {
        let rows: Vec<GameRecord> = serde_json::from_str(
            r#"[{"team1":"Celtics","team2":"Heat","team1_moneyline":-200,"team2_moneyline":170,
                "sport":"nba","venue":null,"team1_rest_days":2,"team2_rest_days":"1","tags":[1]}]"#,
        )
        .unwrap();
        assert_eq!(rows[0].team1_moneyline, Some(-200));
        assert_eq!(
            rows[0].features,
            BTreeMap::from([
                ("team1_rest_days".to_string(), 2.0),
                ("team2_rest_days".to_string(), 1.0),
            ])
        );
    }

    #[test]
    fn test_feature_importance_ranks_by_magnitude() {
        let model = TrainedModel {
            weights: vec![0.2, -1.5, 0.7],
            bias: 0.0,
            means: vec![0.0; 3],
            stds: vec![1.0; 3],
            features: vec!["a".into(), "b".into(), "c".into()],
        };
        let ranked: Vec<String> = model
            .feature_importance()
            .into_iter()
            .map(|f| f.feature)
            .collect();
        assert_eq!(ranked, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_check_shape() {
        let mut model = TrainedModel {
            weights: vec![0.0; 2],
            bias: 0.0,
            means: vec![0.0; 2],
            stds: vec![1.0; 2],
            features: vec!["a".into(), "b".into()],
        };
        assert!(model.check_shape().is_ok());
        model.stds.pop();
        assert!(model.check_shape().is_err());

        model.stds.push(1.0);
        model.weights[0] = f64::NAN;
        assert!(model.check_shape().is_err());
        model.weights[0] = 0.0;
        model.bias = f64::INFINITY;
        assert!(model.check_shape().is_err());
        model.bias = 0.0;
        model.stds[1] = 0.0;
        assert!(model.check_shape().is_err());
        model.stds[1] = 2.0;
        assert!(model.check_shape().is_ok());
    }

    #[test]
    fn test_stored_model_json_shape() {
        let stored = StoredModel {
            model: TrainedModel {
                weights: vec![0.5],
                bias: 0.1,
                means: vec![0.5],
                stds: vec![0.2],
                features: vec!["team1_moneyline".into()],
            },
            stats: Some(TrainingStats {
                accuracy: 0.75,
                samples: 40,
            }),
            trained_at: None,
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["bias"], 0.1);
        assert_eq!(json["features"][0], "team1_moneyline");
        assert_eq!(json["stats"]["samples"], 40);
    }
}
