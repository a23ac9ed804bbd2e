//! Backtest Simulator
//!
//! Replays a trained model over historical games in chronological order,
//! placing flat-stake bets wherever the computed edge clears a threshold.

use crate::error::ModelError;
use crate::models::{GameRecord, SportConfig, TrainedModel};
use crate::utils::cancel::CancelToken;
use crate::utils::ev_calculator::winning_profit;
use crate::utils::features::{
    compute_rolling_form, derive_features, sort_chronologically, straight_winner, Diagnostics,
    LabelMode,
};
use crate::utils::prediction::{
    evaluate_markets, predict_values, spread_winner, total_winner, BetSide, EdgeHeuristics,
    EdgeResult, Market, MarketLines, SpreadOutcome, TotalOutcome,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Fewest historical rows a backtest accepts
pub const MIN_BACKTEST_SAMPLES: usize = 50;

/// Backtest simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub starting_bankroll: f64,
    /// Flat stake per bet
    pub stake: f64,
    /// Leading rows that only seed rolling form
    pub warmup: usize,
    /// Minimum EV per $100 staked before a bet is placed
    pub min_ev: f64,
    pub min_samples: usize,
    pub label_mode: LabelMode,
    pub heuristics: EdgeHeuristics,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            starting_bankroll: 1000.0,
            stake: 100.0,
            warmup: 20,
            min_ev: 2.0,
            min_samples: MIN_BACKTEST_SAMPLES,
            label_mode: LabelMode::Straight,
            heuristics: EdgeHeuristics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetOutcome {
    Win,
    Loss,
    Push,
}

/// Counters for one market
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub profit: f64,
}

impl MarketStats {
    fn record(&mut self, outcome: BetOutcome, profit: f64) {
        self.bets += 1;
        match outcome {
            BetOutcome::Win => self.wins += 1,
            BetOutcome::Loss => self.losses += 1,
            BetOutcome::Push => self.pushes += 1,
        }
        self.profit += profit;
    }

    /// Wins over decided (non-push) bets
    pub fn hit_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            0.0
        } else {
            self.wins as f64 / decided as f64
        }
    }

    /// Profit as a percentage of amount staked
    pub fn roi(&self, stake: f64) -> f64 {
        if self.bets == 0 {
            0.0
        } else {
            self.profit / (self.bets as f64 * stake) * 100.0
        }
    }
}

/// Individual bet record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub date: Option<NaiveDate>,
    pub team1: String,
    pub team2: String,
    pub market: Market,
    pub side: BetSide,
    pub odds: i32,
    pub model_prob: f64,
    pub expected_value: f64,
    pub outcome: BetOutcome,
    pub profit: f64,
    pub bankroll_after: f64,
}

/// Running bankroll and per-market counters, mutated in replay order
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestState {
    pub bankroll: f64,
    pub markets: BTreeMap<Market, MarketStats>,
    peak: f64,
    max_drawdown: f64,
}

impl BacktestState {
    fn new(starting_bankroll: f64) -> Self {
        Self {
            bankroll: starting_bankroll,
            markets: BTreeMap::new(),
            peak: starting_bankroll,
            max_drawdown: 0.0,
        }
    }

    fn settle(&mut self, market: Market, outcome: BetOutcome, profit: f64) {
        self.bankroll += profit;
        self.markets.entry(market).or_default().record(outcome, profit);
        self.peak = self.peak.max(self.bankroll);
        self.max_drawdown = self.max_drawdown.max(self.peak - self.bankroll);
    }
}

/// Backtest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub starting_bankroll: f64,
    pub final_bankroll: f64,
    pub stake: f64,
    pub total_bets: usize,
    pub total_wins: usize,
    pub total_profit: f64,
    /// Profit as a percentage of total amount staked
    pub roi: f64,
    pub max_drawdown: f64,
    pub markets: BTreeMap<Market, MarketStats>,
    pub bets: Vec<BetRecord>,
    pub bankroll_history: Vec<f64>,
    pub rows_replayed: usize,
    pub rows_skipped: usize,
    pub diagnostics: Diagnostics,
}

/// A backtest that has not started yet. [`Backtest::run`] consumes it, so
/// each instance replays exactly once.
pub struct Backtest<'a> {
    model: &'a TrainedModel,
    sport: &'a SportConfig,
    config: BacktestConfig,
}

impl<'a> Backtest<'a> {
    pub fn new(model: &'a TrainedModel, sport: &'a SportConfig, config: BacktestConfig) -> Self {
        Self {
            model,
            sport,
            config,
        }
    }

    /// Replay `rows` to completion, or until `cancel` fires between rows
    pub fn run(self, rows: &[GameRecord], cancel: &CancelToken) -> Result<BacktestReport, ModelError> {
        self.model.check_shape()?;
        if rows.len() < self.config.min_samples {
            return Err(ModelError::InsufficientData {
                required: self.config.min_samples,
                found: rows.len(),
            });
        }

        let mut sorted = rows.to_vec();
        sort_chronologically(&mut sorted);
        // Form for each row only looks at earlier rows, so one pass over the
        // whole history gives every row the state it would have seen live
        let games = compute_rolling_form(&sorted, self.sport, self.config.label_mode);

        let mut state = BacktestState::new(self.config.starting_bankroll);
        let mut diagnostics = Diagnostics::default();
        let mut bets = Vec::new();
        let mut history = vec![self.config.starting_bankroll];
        let mut replayed = 0;
        let mut skipped = 0;

        info!(
            "Backtesting {} rows ({} warm-up) at min EV {:.2}",
            games.len(),
            self.config.warmup,
            self.config.min_ev
        );

        for game in games.iter().skip(self.config.warmup) {
            if cancel.is_cancelled() {
                info!("Backtest cancelled after {} rows", replayed);
                return Err(ModelError::Cancelled);
            }

            let record = &game.record;
            if !has_moneylines(record) {
                debug!("Skipping {}: missing moneylines", record.matchup());
                skipped += 1;
                continue;
            }

            let values = match derive_features(
                self.sport,
                &self.model.features,
                |name| record.raw_feature(self.sport, name),
                &mut diagnostics,
            ) {
                Ok(values) => values,
                Err(missing) => {
                    debug!(
                        "Skipping {}: unusable features {}",
                        record.matchup(),
                        missing.join(", ")
                    );
                    skipped += 1;
                    continue;
                }
            };
            replayed += 1;

            let p = predict_values(self.model, &values, Diagnostics::default()).team1_win_prob;
            let lines = MarketLines::from_record(record);

            for edge in evaluate_markets(p, self.sport, &lines, &self.config.heuristics) {
                if edge.best_ev <= self.config.min_ev {
                    continue;
                }
                let Some(outcome) = resolve(&edge, record) else {
                    debug!("No result for {} {}, bet not placed", record.matchup(), edge.market);
                    continue;
                };

                let profit = match outcome {
                    BetOutcome::Win => winning_profit(self.config.stake, edge.best_odds()),
                    BetOutcome::Loss => -self.config.stake,
                    BetOutcome::Push => 0.0,
                };
                state.settle(edge.market, outcome, profit);
                history.push(state.bankroll);

                bets.push(BetRecord {
                    date: record.date,
                    team1: record.team1.clone(),
                    team2: record.team2.clone(),
                    market: edge.market,
                    side: edge.best_side,
                    odds: edge.best_odds(),
                    model_prob: edge.best_prob(),
                    expected_value: edge.best_ev,
                    outcome,
                    profit,
                    bankroll_after: state.bankroll,
                });
            }
        }

        let total_bets = bets.len();
        let total_wins = bets
            .iter()
            .filter(|bet| bet.outcome == BetOutcome::Win)
            .count();
        let total_profit: f64 = bets.iter().map(|bet| bet.profit).sum();
        let roi = if total_bets == 0 {
            0.0
        } else {
            total_profit / (total_bets as f64 * self.config.stake) * 100.0
        };

        info!(
            "Backtest complete: {} bets, profit {:+.2}, ROI {:+.2}%",
            total_bets, total_profit, roi
        );

        Ok(BacktestReport {
            starting_bankroll: self.config.starting_bankroll,
            final_bankroll: state.bankroll,
            stake: self.config.stake,
            total_bets,
            total_wins,
            total_profit,
            roi,
            max_drawdown: state.max_drawdown,
            markets: state.markets,
            bets,
            bankroll_history: history,
            rows_replayed: replayed,
            rows_skipped: skipped,
            diagnostics,
        })
    }
}

fn has_moneylines(record: &GameRecord) -> bool {
    matches!(
        (record.team1_moneyline, record.team2_moneyline),
        (Some(ml1), Some(ml2)) if ml1 != 0 && ml2 != 0
    )
}

fn final_scores(record: &GameRecord) -> Option<(f64, f64)> {
    match (record.team1_score, record.team2_score) {
        (Some(s1), Some(s2)) if s1.is_finite() && s2.is_finite() => Some((s1, s2)),
        _ => None,
    }
}

fn side_outcome(won: bool) -> BetOutcome {
    if won {
        BetOutcome::Win
    } else {
        BetOutcome::Loss
    }
}

/// Settle a wager against the actual result; `None` when the row lacks it
fn resolve(edge: &EdgeResult, record: &GameRecord) -> Option<BetOutcome> {
    match edge.market {
        Market::Moneyline => match straight_winner(record) {
            Some(winner) => Some(side_outcome((winner == 1) == (edge.best_side == BetSide::Team1))),
            // Level scores on a two-way moneyline refund the stake
            None => final_scores(record).map(|_| BetOutcome::Push),
        },
        Market::Spread => {
            let (s1, s2) = final_scores(record)?;
            let spread = record.spread?;
            Some(match spread_winner(s1, s2, spread) {
                SpreadOutcome::Push => BetOutcome::Push,
                SpreadOutcome::Home => side_outcome(edge.best_side == BetSide::Team1),
                SpreadOutcome::Away => side_outcome(edge.best_side == BetSide::Team2),
            })
        }
        Market::Total => {
            let (s1, s2) = final_scores(record)?;
            let line = record.total?;
            Some(match total_winner(s1, s2, line) {
                TotalOutcome::Push => BetOutcome::Push,
                TotalOutcome::Over => side_outcome(edge.best_side == BetSide::Over),
                TotalOutcome::Under => side_outcome(edge.best_side == BetSide::Under),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use approx::assert_relative_eq;

    /// A model that leans hard on side 1's de-vigged moneyline
    fn favorite_model() -> TrainedModel {
        TrainedModel {
            weights: vec![3.0, -3.0, 0.2, -0.2],
            bias: 0.0,
            means: vec![0.5, 0.5, 0.5, 0.5],
            stds: vec![0.1, 0.1, 0.2, 0.2],
            features: Sport::Nfl
                .config()
                .feature_names
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn history(n: usize) -> Vec<GameRecord> {
        (0..n)
            .map(|i| {
                let mut g = GameRecord::new(format!("Team{}", i % 6), format!("Team{}", (i + 3) % 6));
                g.date = NaiveDate::from_ymd_opt(2023, 1, 1)
                    .map(|d| d + chrono::Duration::days(i as i64));
                g.team1_moneyline = Some(if i % 2 == 0 { -160 } else { 140 });
                g.team2_moneyline = Some(if i % 2 == 0 { 140 } else { -160 });
                g.spread = Some(if i % 2 == 0 { -3.0 } else { 3.0 });
                g.total = Some(44.0);
                // Favorites win two of every three games; every fifth game lands on the numbers
                let favorite_won = i % 3 != 0;
                let team1_fav = i % 2 == 0;
                let (s1, s2) = match (i % 5 == 0, favorite_won == team1_fav) {
                    (true, _) if team1_fav => (23.0, 20.0),
                    (true, _) => (20.0, 23.0),
                    (false, true) => (27.0, 13.0),
                    (false, false) => (13.0, 27.0),
                };
                g.team1_score = Some(s1);
                g.team2_score = Some(s2);
                g
            })
            .collect()
    }

    #[test]
    fn test_requires_minimum_history() {
        let model = favorite_model();
        let result = Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
            .run(&history(30), &CancelToken::new());
        assert!(matches!(
            result,
            Err(ModelError::InsufficientData {
                required: 50,
                found: 30
            })
        ));
    }

    #[test]
    fn test_bankroll_conservation() {
        let model = favorite_model();
        let report = Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
            .run(&history(80), &CancelToken::new())
            .unwrap();

        assert!(report.total_bets > 0);
        let market_profit: f64 = report.markets.values().map(|m| m.profit).sum();
        assert_relative_eq!(
            report.final_bankroll - report.starting_bankroll,
            market_profit,
            epsilon = 1e-9
        );
        assert_relative_eq!(report.total_profit, market_profit, epsilon = 1e-9);
        assert_eq!(report.bankroll_history.len(), report.total_bets + 1);
        assert_eq!(report.rows_replayed, 60);

        let market_bets: usize = report.markets.values().map(|m| m.bets).sum();
        assert_eq!(market_bets, report.total_bets);
        assert_relative_eq!(
            report.roi,
            report.total_profit / (report.total_bets as f64 * 100.0) * 100.0
        );
    }

    #[test]
    fn test_push_is_neither_win_nor_loss() {
        let model = favorite_model();
        let report = Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
            .run(&history(80), &CancelToken::new())
            .unwrap();

        let spread = report.markets[&Market::Spread];
        assert!(spread.pushes > 0);
        assert_eq!(spread.wins + spread.losses + spread.pushes, spread.bets);
        for bet in report.bets.iter().filter(|b| b.outcome == BetOutcome::Push) {
            assert_eq!(bet.profit, 0.0);
        }
    }

    #[test]
    fn test_backtest_is_deterministic() {
        let model = favorite_model();
        let run = || {
            Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
                .run(&history(60), &CancelToken::new())
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_rows_without_odds_are_skipped() {
        let model = favorite_model();
        let mut rows = history(60);
        rows[40].team1_moneyline = None;
        rows[41].team2_moneyline = Some(0);
        let report = Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
            .run(&rows, &CancelToken::new())
            .unwrap();
        assert_eq!(report.rows_skipped, 2);
        assert_eq!(report.rows_replayed, 38);
    }

    #[test]
    fn test_high_threshold_places_no_bets() {
        let model = favorite_model();
        let config = BacktestConfig {
            min_ev: 1_000.0,
            ..Default::default()
        };
        let report = Backtest::new(&model, Sport::Nfl.config(), config)
            .run(&history(60), &CancelToken::new())
            .unwrap();
        assert_eq!(report.total_bets, 0);
        assert_eq!(report.roi, 0.0);
        assert_eq!(report.final_bankroll, report.starting_bankroll);
    }

    #[test]
    fn test_cancelled_backtest() {
        let model = favorite_model();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Backtest::new(&model, Sport::Nfl.config(), BacktestConfig::default())
            .run(&history(60), &cancel);
        assert!(matches!(result, Err(ModelError::Cancelled)));
    }

    #[test]
    fn test_market_stats() {
        let mut stats = MarketStats::default();
        stats.record(BetOutcome::Win, 90.0);
        stats.record(BetOutcome::Loss, -100.0);
        stats.record(BetOutcome::Push, 0.0);
        assert_eq!(stats.hit_rate(), 0.5);
        assert_relative_eq!(stats.roi(100.0), -10.0 / 300.0 * 100.0);
    }
}
