//! Orchestration of the modeling workflow over a storage port
//!
//! Training and backtesting are CPU-bound and run on the blocking thread
//! pool; at most one of them may be in flight per sport.

use crate::api::ModelStore;
use crate::error::ModelError;
use crate::models::{FeatureImportance, GameRecord, Sport, SportConfig, StoredModel};
use crate::utils::backtest::{Backtest, BacktestConfig, BacktestReport};
use crate::utils::cancel::CancelToken;
use crate::utils::features::{
    build_feature_matrix, compute_rolling_form, sort_chronologically, Diagnostics,
};
use crate::utils::prediction::{
    evaluate_markets, predict, EdgeHeuristics, EdgeResult, MarketLines, Prediction,
};
use crate::utils::training::{train_logistic_regression_with_cancel, TrainingOutcome, TrainingParams};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Sort, derive features and train on a sport's raw history
pub fn train_on_rows(
    rows: &[GameRecord],
    config: &SportConfig,
    params: &TrainingParams,
    cancel: &CancelToken,
) -> Result<TrainingOutcome, ModelError> {
    let mut sorted = rows.to_vec();
    sort_chronologically(&mut sorted);
    let games = compute_rolling_form(&sorted, config, params.label_mode);

    let mut diagnostics = Diagnostics::default();
    let matrix = build_feature_matrix(&games, config, config.feature_names, &mut diagnostics)?;
    info!(
        "{}: {} of {} rows usable for training",
        config.display_name,
        matrix.y.len(),
        rows.len()
    );

    let mut outcome = train_logistic_regression_with_cancel(
        &matrix.x,
        &matrix.y,
        config.feature_names,
        params,
        cancel,
    )?;
    diagnostics.merge(std::mem::take(&mut outcome.diagnostics));
    outcome.diagnostics = diagnostics;
    Ok(outcome)
}

/// Everything a training run hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: StoredModel,
    pub importance: Vec<FeatureImportance>,
    pub diagnostics: Diagnostics,
    /// False when the model could not be saved; it is still usable
    pub persisted: bool,
}

/// A prediction together with the priced markets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupReport {
    pub prediction: Prediction,
    pub edges: Vec<EdgeResult>,
}

type RunningSet = Arc<Mutex<HashSet<Sport>>>;

/// Marks a sport busy until dropped
struct RunGuard {
    sport: Sport,
    running: RunningSet,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.sport);
    }
}

pub struct ModelService {
    store: Arc<dyn ModelStore>,
    running: RunningSet,
}

impl ModelService {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self {
            store,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    fn begin(&self, sport: Sport) -> Result<RunGuard, ModelError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(sport) {
            return Err(ModelError::Busy {
                sport: sport.to_string(),
            });
        }
        Ok(RunGuard {
            sport,
            running: Arc::clone(&self.running),
        })
    }

    /// Store uploaded rows, optionally appending to what is already saved
    pub async fn import_rows(
        &self,
        sport: Sport,
        rows: Vec<GameRecord>,
        append: bool,
    ) -> Result<usize, ModelError> {
        let mut all = if append {
            self.store
                .fetch_training_rows(sport)
                .await?
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        all.extend(rows);
        self.store.save_training_rows(sport, &all).await?;
        info!("Stored {} training rows for {}", all.len(), sport);
        Ok(all.len())
    }

    /// Train on the stored history and save the new model.
    ///
    /// A failed save is logged and reported, never fatal.
    pub async fn train(
        &self,
        sport: Sport,
        params: TrainingParams,
        cancel: CancelToken,
    ) -> Result<TrainingReport, ModelError> {
        let _guard = self.begin(sport)?;
        let rows = self
            .store
            .fetch_training_rows(sport)
            .await?
            .unwrap_or_default();

        let outcome = tokio::task::spawn_blocking(move || {
            train_on_rows(&rows, sport.config(), &params, &cancel)
        })
        .await
        .map_err(|e| ModelError::Task(e.to_string()))??;

        let importance = outcome.model.feature_importance();
        let stored = StoredModel {
            model: outcome.model,
            stats: Some(outcome.stats),
            trained_at: Some(Utc::now()),
        };

        let persisted = match self.store.save_model(sport, &stored).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Trained {} model but could not save it: {}", sport, e);
                false
            }
        };

        Ok(TrainingReport {
            model: stored,
            importance,
            diagnostics: outcome.diagnostics,
            persisted,
        })
    }

    pub async fn model(&self, sport: Sport) -> Result<StoredModel, ModelError> {
        self.store
            .fetch_model(sport)
            .await?
            .ok_or_else(|| ModelError::ModelNotFound(sport.to_string()))
    }

    /// Predict a matchup with the saved model and price its markets
    pub async fn predict(
        &self,
        sport: Sport,
        inputs: &HashMap<String, f64>,
        lines: &MarketLines,
        heuristics: &EdgeHeuristics,
    ) -> Result<MatchupReport, ModelError> {
        let stored = self.model(sport).await?;
        let config = sport.config();
        let prediction = predict(&stored.model, config, inputs)?;
        let edges = evaluate_markets(prediction.team1_win_prob, config, lines, heuristics);
        Ok(MatchupReport { prediction, edges })
    }

    /// Replay the saved model over the stored history
    pub async fn backtest(
        &self,
        sport: Sport,
        config: BacktestConfig,
        cancel: CancelToken,
    ) -> Result<BacktestReport, ModelError> {
        let _guard = self.begin(sport)?;
        let stored = self.model(sport).await?;
        let rows = self
            .store
            .fetch_training_rows(sport)
            .await?
            .unwrap_or_default();

        tokio::task::spawn_blocking(move || {
            Backtest::new(&stored.model, sport.config(), config).run(&rows, &cancel)
        })
        .await
        .map_err(|e| ModelError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryStore, StoreKey};
    use crate::error::StoreError;
    use crate::utils::prediction::Market;
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::Value;

    /// Synthetic NFL history where the moneyline favorite always wins
    fn nfl_history(n: usize) -> Vec<GameRecord> {
        (0..n)
            .map(|i| {
                let mut g = GameRecord::new(format!("Home{}", i), format!("Away{}", i));
                g.date = NaiveDate::from_ymd_opt(2023, 9, 1)
                    .map(|d| d + chrono::Duration::days(i as i64));
                let fav = -(120 + 10 * (i % 5) as i32);
                let dog = 100 + 10 * (i % 5) as i32;
                let team1_fav = i % 2 == 0;
                g.team1_moneyline = Some(if team1_fav { fav } else { dog });
                g.team2_moneyline = Some(if team1_fav { dog } else { fav });
                g.team1_score = Some(if team1_fav { 24.0 } else { 17.0 });
                g.team2_score = Some(if team1_fav { 17.0 } else { 24.0 });
                g
            })
            .collect()
    }

    fn matchup(ml1: f64, ml2: f64, f1: f64, f2: f64) -> HashMap<String, f64> {
        HashMap::from([
            ("team1_moneyline".to_string(), ml1),
            ("team2_moneyline".to_string(), ml2),
            ("team1_last5".to_string(), f1),
            ("team2_last5".to_string(), f2),
        ])
    }

    /// Reads succeed, writes of models fail
    struct ReadOnly(MemoryStore);

    #[async_trait]
    impl ModelStore for ReadOnly {
        async fn get(&self, key: StoreKey) -> Result<Option<Value>, StoreError> {
            self.0.get(key).await
        }

        async fn put(&self, _key: StoreKey, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read only".to_string()))
        }

        async fn delete(&self, key: StoreKey) -> Result<(), StoreError> {
            self.0.delete(key).await
        }

        fn name(&self) -> &str {
            "read-only"
        }
    }

    #[tokio::test]
    async fn test_end_to_end_train_and_predict() {
        let service = ModelService::new(Arc::new(MemoryStore::new()));
        service
            .import_rows(Sport::Nfl, nfl_history(25), false)
            .await
            .unwrap();

        let report = service
            .train(Sport::Nfl, TrainingParams::default(), CancelToken::new())
            .await
            .unwrap();
        let stats = report.model.stats.unwrap();
        assert!(report.persisted);
        assert_eq!(stats.samples, 25);
        assert!(stats.accuracy > 0.8, "accuracy {}", stats.accuracy);
        // Every team appears once, so form never varies
        assert_eq!(
            report.diagnostics.zero_variance_features,
            vec!["team1_last5", "team2_last5"]
        );

        let lines = MarketLines {
            moneyline1: Some(-200),
            moneyline2: Some(170),
            ..Default::default()
        };
        let result = service
            .predict(
                Sport::Nfl,
                &matchup(-200.0, 170.0, 0.8, 0.3),
                &lines,
                &EdgeHeuristics::default(),
            )
            .await
            .unwrap();
        assert!(result.prediction.team1_win_prob > 0.6);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].market, Market::Moneyline);
    }

    #[tokio::test]
    async fn test_too_few_rows_produces_no_model() {
        let service = ModelService::new(Arc::new(MemoryStore::new()));
        service
            .import_rows(Sport::Nfl, nfl_history(5), false)
            .await
            .unwrap();

        let result = service
            .train(Sport::Nfl, TrainingParams::default(), CancelToken::new())
            .await;
        assert!(matches!(
            result,
            Err(ModelError::InsufficientData { found: 5, .. })
        ));
        assert!(matches!(
            service.model(Sport::Nfl).await,
            Err(ModelError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_save_still_returns_model() {
        let cache = MemoryStore::new();
        cache
            .save_training_rows(Sport::Nba, &nfl_history(30))
            .await
            .unwrap();
        let service = ModelService::new(Arc::new(ReadOnly(cache)));

        let report = service
            .train(Sport::Nba, TrainingParams::default(), CancelToken::new())
            .await
            .unwrap();
        assert!(!report.persisted);
        assert_eq!(report.model.model.weights.len(), 4);
    }

    #[tokio::test]
    async fn test_one_run_per_sport() {
        let service = ModelService::new(Arc::new(MemoryStore::new()));
        service
            .import_rows(Sport::Nfl, nfl_history(30), false)
            .await
            .unwrap();

        let guard = service.begin(Sport::Nfl).unwrap();
        let result = service
            .train(Sport::Nfl, TrainingParams::default(), CancelToken::new())
            .await;
        assert!(matches!(result, Err(ModelError::Busy { .. })));

        // Other sports are unaffected, and the flag clears on drop
        assert!(service.begin(Sport::Nba).is_ok());
        drop(guard);
        assert!(service
            .train(Sport::Nfl, TrainingParams::default(), CancelToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_import_append() {
        let service = ModelService::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            service
                .import_rows(Sport::Mlb, nfl_history(3), false)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            service
                .import_rows(Sport::Mlb, nfl_history(2), true)
                .await
                .unwrap(),
            5
        );
        assert_eq!(
            service
                .import_rows(Sport::Mlb, nfl_history(2), false)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_backtest_after_training() {
        let service = ModelService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service
                .backtest(Sport::Nfl, BacktestConfig::default(), CancelToken::new())
                .await,
            Err(ModelError::ModelNotFound(_))
        ));

        let mut rows = nfl_history(60);
        // Upload order must not matter
        rows.reverse();
        service.import_rows(Sport::Nfl, rows, false).await.unwrap();
        service
            .train(Sport::Nfl, TrainingParams::default(), CancelToken::new())
            .await
            .unwrap();

        let report = service
            .backtest(Sport::Nfl, BacktestConfig::default(), CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.rows_replayed, 40);
        assert!(report.total_bets > 0);
        assert_relative_eq!(
            report.final_bankroll - report.starting_bankroll,
            report.markets.values().map(|m| m.profit).sum::<f64>(),
            epsilon = 1e-9
        );
        // The favorite always wins and the model backs it
        let moneyline = report.markets[&Market::Moneyline];
        assert_eq!(moneyline.losses, 0);
    }
}
