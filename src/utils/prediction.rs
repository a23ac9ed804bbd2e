//! Prediction and edge engine
//!
//! Applies a trained model to a matchup and prices the moneyline, spread and
//! totals markets against book odds. All functions here are pure.

use crate::error::ModelError;
use crate::models::{GameRecord, SportConfig, TrainedModel};
use crate::utils::ev_calculator::{
    expected_value_per_100, probability_to_moneyline, STANDARD_JUICE,
};
use crate::utils::features::{derive_features, Diagnostics};
use crate::utils::training::sigmoid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Win probabilities and fair lines for one matchup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub team1_win_prob: f64,
    pub team2_win_prob: f64,
    /// Fair moneylines implied by the model, `None` at 0 or 1
    pub implied_line1: Option<i32>,
    pub implied_line2: Option<i32>,
    /// 0 at a coin flip, 100 at certainty
    pub confidence: f64,
    pub diagnostics: Diagnostics,
}

/// Parse raw `name=value` style inputs, reporting every non-numeric field
pub fn parse_inputs<I, K, V>(pairs: I) -> Result<HashMap<String, f64>, ModelError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
{
    let mut values = HashMap::new();
    let mut invalid = Vec::new();
    for (name, raw) in pairs {
        let name = name.into();
        match raw.as_ref().trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                values.insert(name, value);
            }
            _ => invalid.push(name),
        }
    }

    if invalid.is_empty() {
        Ok(values)
    } else {
        Err(ModelError::Validation { fields: invalid })
    }
}

/// Predict a matchup from raw inputs keyed by feature name.
///
/// Moneylines are de-vigged exactly as during training, then every input is
/// normalized with the model's frozen means and stds.
pub fn predict(
    model: &TrainedModel,
    config: &SportConfig,
    inputs: &HashMap<String, f64>,
) -> Result<Prediction, ModelError> {
    model.check_shape()?;

    let mut diagnostics = Diagnostics::default();
    let values = derive_features(
        config,
        &model.features,
        |name| inputs.get(name).copied(),
        &mut diagnostics,
    )
    .map_err(|fields| ModelError::Validation { fields })?;

    Ok(predict_values(model, &values, diagnostics))
}

/// Predict from an already-derived feature vector in model order
pub fn predict_values(model: &TrainedModel, values: &[f64], diagnostics: Diagnostics) -> Prediction {
    let z = model.bias
        + values
            .iter()
            .zip(&model.weights)
            .zip(model.means.iter().zip(&model.stds))
            .map(|((value, weight), (mean, std))| weight * (value - mean) / std)
            .sum::<f64>();
    let p = sigmoid(z);

    Prediction {
        team1_win_prob: p,
        team2_win_prob: 1.0 - p,
        implied_line1: probability_to_moneyline(p),
        implied_line2: probability_to_moneyline(1.0 - p),
        confidence: (p - 0.5).abs() * 200.0,
        diagnostics,
    }
}

/// Markets the edge engine prices
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Moneyline,
    Spread,
    Total,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Moneyline => write!(f, "moneyline"),
            Market::Spread => write!(f, "spread"),
            Market::Total => write!(f, "total"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetSide {
    Team1,
    Team2,
    Over,
    Under,
}

impl fmt::Display for BetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetSide::Team1 => write!(f, "team1"),
            BetSide::Team2 => write!(f, "team2"),
            BetSide::Over => write!(f, "over"),
            BetSide::Under => write!(f, "under"),
        }
    }
}

/// One market evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeResult {
    pub market: Market,
    /// Model probability of the first side (team1 or over)
    pub prob1: f64,
    pub prob2: f64,
    pub odds1: i32,
    pub odds2: i32,
    /// Stake-inclusive edge score per $100 on each side. Exceeds expected
    /// net profit by `prob * 100`, see [`expected_value_per_100`].
    pub ev1: f64,
    pub ev2: f64,
    pub best_side: BetSide,
    pub best_ev: f64,
}

impl EdgeResult {
    fn price(market: Market, sides: [BetSide; 2], prob1: f64, odds1: i32, odds2: i32) -> Self {
        let prob2 = 1.0 - prob1;
        let ev1 = expected_value_per_100(prob1, odds1);
        let ev2 = expected_value_per_100(prob2, odds2);
        // Ties go to the first side
        let (best_side, best_ev) = if ev1 >= ev2 {
            (sides[0], ev1)
        } else {
            (sides[1], ev2)
        };

        Self {
            market,
            prob1,
            prob2,
            odds1,
            odds2,
            ev1,
            ev2,
            best_side,
            best_ev,
        }
    }

    /// Price of the recommended side
    pub fn best_odds(&self) -> i32 {
        match self.best_side {
            BetSide::Team1 | BetSide::Over => self.odds1,
            BetSide::Team2 | BetSide::Under => self.odds2,
        }
    }

    /// Model probability of the recommended side
    pub fn best_prob(&self) -> f64 {
        match self.best_side {
            BetSide::Team1 | BetSide::Over => self.prob1,
            BetSide::Team2 | BetSide::Under => self.prob2,
        }
    }

    pub fn format(&self) -> String {
        format!(
            "{} | Bet: {} ({:+}) | EV: {:+.2} per $100 | Model: {:.1}% / {:.1}%",
            self.market,
            self.best_side,
            self.best_odds(),
            self.best_ev,
            self.prob1 * 100.0,
            self.prob2 * 100.0
        )
    }
}

/// Moneyline EV for both sides given side-1 win probability `p`
pub fn moneyline_ev(p: f64, book_ml1: i32, book_ml2: i32) -> EdgeResult {
    EdgeResult::price(
        Market::Moneyline,
        [BetSide::Team1, BetSide::Team2],
        p,
        book_ml1,
        book_ml2,
    )
}

/// Ad hoc constants turning a win probability into spread and total
/// probabilities.
///
/// These are NOT fitted to data. They are approximations carried so the
/// spread and totals markets can be priced at all, and should be
/// recalibrated against real outcomes before their edges are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeHeuristics {
    /// Share of the win edge kept when pricing a pick'em spread
    pub spread_base_factor: f64,
    /// Reduction of that share per point of spread
    pub spread_decay_per_point: f64,
    pub spread_min_factor: f64,
    /// Over probability gained per unit of |p - 0.5|
    pub total_slope: f64,
    pub total_min_prob: f64,
    pub total_max_prob: f64,
}

impl Default for EdgeHeuristics {
    fn default() -> Self {
        Self {
            spread_base_factor: 0.85,
            spread_decay_per_point: 0.02,
            spread_min_factor: 0.3,
            total_slope: 0.3,
            total_min_prob: 0.4,
            total_max_prob: 0.6,
        }
    }
}

impl EdgeHeuristics {
    /// Heuristic probability that side 1 covers `spread`
    pub fn spread_cover_probability(&self, p: f64, spread: f64) -> f64 {
        let factor = (self.spread_base_factor - spread.abs() * self.spread_decay_per_point)
            .max(self.spread_min_factor);
        (0.5 + (p - 0.5) * factor).clamp(0.01, 0.99)
    }

    /// Heuristic over probability; lopsided matchups lean over
    pub fn over_probability(&self, p: f64) -> f64 {
        (0.5 + (p - 0.5).abs() * self.total_slope).clamp(self.total_min_prob, self.total_max_prob)
    }
}

/// Spread EV for both sides. Heuristic, see [`EdgeHeuristics`].
pub fn spread_ev(
    p: f64,
    spread: f64,
    odds1: i32,
    odds2: i32,
    heuristics: &EdgeHeuristics,
) -> EdgeResult {
    EdgeResult::price(
        Market::Spread,
        [BetSide::Team1, BetSide::Team2],
        heuristics.spread_cover_probability(p, spread),
        odds1,
        odds2,
    )
}

/// Totals EV for over and under. Heuristic, see [`EdgeHeuristics`].
pub fn total_ev(p: f64, over_odds: i32, under_odds: i32, heuristics: &EdgeHeuristics) -> EdgeResult {
    EdgeResult::price(
        Market::Total,
        [BetSide::Over, BetSide::Under],
        heuristics.over_probability(p),
        over_odds,
        under_odds,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadOutcome {
    Home,
    Away,
    Push,
}

/// Resolve a spread: `spread` is added to the home score and is negative
/// when home is favored
pub fn spread_winner(home_score: f64, away_score: f64, spread: f64) -> SpreadOutcome {
    let adjusted = home_score + spread;
    if adjusted > away_score {
        SpreadOutcome::Home
    } else if adjusted < away_score {
        SpreadOutcome::Away
    } else {
        SpreadOutcome::Push
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalOutcome {
    Over,
    Under,
    Push,
}

pub fn total_winner(score1: f64, score2: f64, line: f64) -> TotalOutcome {
    let combined = score1 + score2;
    if combined > line {
        TotalOutcome::Over
    } else if combined < line {
        TotalOutcome::Under
    } else {
        TotalOutcome::Push
    }
}

/// Book lines offered for a matchup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketLines {
    pub moneyline1: Option<i32>,
    pub moneyline2: Option<i32>,
    pub spread: Option<f64>,
    pub spread_odds1: Option<i32>,
    pub spread_odds2: Option<i32>,
    pub total: Option<f64>,
    pub over_odds: Option<i32>,
    pub under_odds: Option<i32>,
}

impl MarketLines {
    pub fn from_record(record: &GameRecord) -> Self {
        Self {
            moneyline1: record.team1_moneyline,
            moneyline2: record.team2_moneyline,
            spread: record.spread,
            spread_odds1: record.team1_spread_odds,
            spread_odds2: record.team2_spread_odds,
            total: record.total,
            over_odds: record.over_odds,
            under_odds: record.under_odds,
        }
    }
}

fn usable_odds(odds: Option<i32>) -> Option<i32> {
    odds.filter(|&o| o != 0)
}

/// Price every market the sport supports and the lines make available.
/// Spread and total prices default to standard juice when only the line is
/// known.
pub fn evaluate_markets(
    p: f64,
    config: &SportConfig,
    lines: &MarketLines,
    heuristics: &EdgeHeuristics,
) -> Vec<EdgeResult> {
    let mut edges = Vec::new();

    if let (Some(ml1), Some(ml2)) = (usable_odds(lines.moneyline1), usable_odds(lines.moneyline2)) {
        edges.push(moneyline_ev(p, ml1, ml2));
    }

    if config.supports_spread {
        if let Some(spread) = lines.spread.filter(|s| s.is_finite()) {
            edges.push(spread_ev(
                p,
                spread,
                usable_odds(lines.spread_odds1).unwrap_or(STANDARD_JUICE),
                usable_odds(lines.spread_odds2).unwrap_or(STANDARD_JUICE),
                heuristics,
            ));
        }
    }

    if config.supports_total && lines.total.is_some_and(f64::is_finite) {
        edges.push(total_ev(
            p,
            usable_odds(lines.over_odds).unwrap_or(STANDARD_JUICE),
            usable_odds(lines.under_odds).unwrap_or(STANDARD_JUICE),
            heuristics,
        ));
    }

    edges
}
