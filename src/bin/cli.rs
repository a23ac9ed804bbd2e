use anyhow::{Context, Result};
use betting_model::config::{init_tracing, StoreArgs};
use betting_model::models::sport::validate_registry;
use betting_model::utils::backtest::{BacktestConfig, BacktestReport, MIN_BACKTEST_SAMPLES};
use betting_model::utils::data::{
    load_from_json, load_games_from_csv, save_bets_to_csv, save_to_json,
};
use betting_model::utils::ev_calculator::format_moneyline;
use betting_model::utils::features::LabelMode;
use betting_model::utils::prediction::{parse_inputs, EdgeHeuristics, MarketLines};
use betting_model::utils::training::{TrainingParams, MIN_TRAINING_SAMPLES};
use betting_model::{CancelToken, FeatureImportance, GameRecord, ModelService, Sport};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "betting-model")]
#[command(version, about = "Train and evaluate win-probability models for betting markets", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported sports and their feature sets
    Sports,

    /// Upload historical games from a CSV or JSON file
    Import {
        sport: Sport,

        #[arg(long, required_unless_present = "json", conflicts_with = "json")]
        csv: Option<PathBuf>,

        /// JSON array of game records
        #[arg(long)]
        json: Option<PathBuf>,

        /// Add to the stored rows instead of replacing them
        #[arg(long)]
        append: bool,
    },

    /// Train a model on the stored history
    Train {
        sport: Sport,

        #[command(flatten)]
        params: TrainArgs,
    },

    /// Predict a matchup and price the book's markets
    Predict {
        sport: Sport,

        /// Feature value as name=value, e.g. team1_moneyline=-150
        #[arg(long = "input", value_parser = parse_pair)]
        inputs: Vec<(String, String)>,

        #[command(flatten)]
        lines: LineArgs,

        #[command(flatten)]
        heuristics: HeuristicArgs,
    },

    /// Replay the saved model over the stored history
    Backtest {
        sport: Sport,

        /// Minimum EV per $100 before a bet is placed
        #[arg(long, default_value = "2.0")]
        threshold: f64,

        /// Flat stake per bet
        #[arg(long, default_value = "100")]
        stake: f64,

        #[arg(long, default_value = "1000")]
        bankroll: f64,

        /// Leading rows replayed without betting
        #[arg(long, default_value = "20")]
        warmup: usize,

        #[arg(long, default_value_t = MIN_BACKTEST_SAMPLES)]
        min_samples: usize,

        #[arg(long, value_enum, default_value = "straight")]
        label_mode: LabelMode,

        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,

        /// Also write the full report to this JSON file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Also write the per-bet log to this CSV file
        #[arg(long)]
        bets_csv: Option<PathBuf>,

        #[command(flatten)]
        heuristics: HeuristicArgs,
    },

    /// Show the saved model and its feature importance
    Show { sport: Sport },

    /// Delete a saved model or training data
    Delete {
        sport: Sport,

        #[arg(value_enum)]
        target: DeleteTarget,
    },
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long, default_value = "0.1")]
    learning_rate: f64,

    #[arg(long, default_value = "500")]
    epochs: usize,

    /// L2 regularization strength
    #[arg(long, default_value = "0.01")]
    lambda: f64,

    #[arg(long, default_value_t = MIN_TRAINING_SAMPLES)]
    min_samples: usize,

    #[arg(long, value_enum, default_value = "straight")]
    label_mode: LabelMode,
}

impl From<TrainArgs> for TrainingParams {
    fn from(args: TrainArgs) -> Self {
        TrainingParams {
            learning_rate: args.learning_rate,
            epochs: args.epochs,
            lambda: args.lambda,
            min_samples: args.min_samples,
            label_mode: args.label_mode,
        }
    }
}

/// Book prices for the matchup being predicted
#[derive(Args)]
struct LineArgs {
    #[arg(long, allow_hyphen_values = true)]
    moneyline1: Option<i32>,

    #[arg(long, allow_hyphen_values = true)]
    moneyline2: Option<i32>,

    /// Spread from side 1's perspective, e.g. -3.5
    #[arg(long, allow_hyphen_values = true)]
    spread: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    spread_odds1: Option<i32>,

    #[arg(long, allow_hyphen_values = true)]
    spread_odds2: Option<i32>,

    #[arg(long)]
    total: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    over_odds: Option<i32>,

    #[arg(long, allow_hyphen_values = true)]
    under_odds: Option<i32>,
}

impl From<LineArgs> for MarketLines {
    fn from(args: LineArgs) -> Self {
        MarketLines {
            moneyline1: args.moneyline1,
            moneyline2: args.moneyline2,
            spread: args.spread,
            spread_odds1: args.spread_odds1,
            spread_odds2: args.spread_odds2,
            total: args.total,
            over_odds: args.over_odds,
            under_odds: args.under_odds,
        }
    }
}

/// Unfitted constants used to price spread and total markets
#[derive(Args)]
struct HeuristicArgs {
    #[arg(long, default_value = "0.85")]
    spread_base_factor: f64,

    #[arg(long, default_value = "0.02")]
    spread_decay_per_point: f64,

    #[arg(long, default_value = "0.3")]
    spread_min_factor: f64,

    #[arg(long, default_value = "0.3")]
    total_slope: f64,

    #[arg(long, default_value = "0.4")]
    total_min_prob: f64,

    #[arg(long, default_value = "0.6")]
    total_max_prob: f64,
}

impl From<HeuristicArgs> for EdgeHeuristics {
    fn from(args: HeuristicArgs) -> Self {
        EdgeHeuristics {
            spread_base_factor: args.spread_base_factor,
            spread_decay_per_point: args.spread_decay_per_point,
            spread_min_factor: args.spread_min_factor,
            total_slope: args.total_slope,
            total_min_prob: args.total_min_prob,
            total_max_prob: args.total_max_prob,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum DeleteTarget {
    Model,
    Data,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Cancel long runs on Ctrl-C
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    validate_registry().map_err(anyhow::Error::msg)?;
    let service = ModelService::new(cli.store.open_store());

    match cli.command {
        Commands::Sports => print_sports(),
        Commands::Import {
            sport,
            csv,
            json,
            append,
        } => {
            let (rows, path): (Vec<GameRecord>, PathBuf) = match (csv, json) {
                (Some(path), _) => (load_games_from_csv(&path)?, path),
                (None, Some(path)) => (load_from_json(&path)?, path),
                (None, None) => anyhow::bail!("pass --csv or --json"),
            };
            println!("Parsed {} rows from {}", rows.len(), path.display());
            let total = service
                .import_rows(sport, rows, append)
                .await
                .context("Failed to store training data")?;
            println!("{} now has {} training rows", sport.config().display_name, total);
        }
        Commands::Train { sport, params } => {
            let report = service
                .train(sport, params.into(), cancel_on_ctrl_c())
                .await
                .with_context(|| format!("Training failed for {}", sport))?;

            if let Some(stats) = report.model.stats {
                println!(
                    "Trained {} model on {} games, training accuracy {:.1}%",
                    sport.config().display_name,
                    stats.samples,
                    stats.accuracy * 100.0
                );
            }
            if !report.persisted {
                println!("WARNING: model could not be saved; it is shown below but not stored");
            }
            print_importance(&report.importance);
            if !report.diagnostics.zero_variance_features.is_empty() {
                println!(
                    "\nZero-variance features: {}",
                    report.diagnostics.zero_variance_features.join(", ")
                );
            }
            if report.diagnostics.rows_skipped > 0 {
                println!("Rows skipped: {}", report.diagnostics.rows_skipped);
            }
        }
        Commands::Predict {
            sport,
            inputs,
            lines,
            heuristics,
        } => {
            let inputs = parse_inputs(inputs)?;
            let report = service
                .predict(sport, &inputs, &lines.into(), &heuristics.into())
                .await?;
            let prediction = &report.prediction;

            println!("{} PREDICTION\n", sport.config().display_name.to_uppercase());
            println!(
                "Side 1: {:.1}% (fair line {})",
                prediction.team1_win_prob * 100.0,
                format_moneyline(prediction.implied_line1)
            );
            println!(
                "Side 2: {:.1}% (fair line {})",
                prediction.team2_win_prob * 100.0,
                format_moneyline(prediction.implied_line2)
            );
            println!("Confidence: {:.1}", prediction.confidence);
            if prediction.diagnostics.neutral_probability_fallbacks > 0 {
                println!("Note: an unusable moneyline was treated as a coin flip");
            }

            if report.edges.is_empty() {
                println!("\nNo book lines given, nothing to price.");
            } else {
                println!("\nMARKETS\n");
                for (i, edge) in report.edges.iter().enumerate() {
                    println!("{}. {}", i + 1, edge.format());
                }
            }
        }
        Commands::Backtest {
            sport,
            threshold,
            stake,
            bankroll,
            warmup,
            min_samples,
            label_mode,
            output,
            report: report_path,
            bets_csv,
            heuristics,
        } => {
            let config = BacktestConfig {
                starting_bankroll: bankroll,
                stake,
                warmup,
                min_ev: threshold,
                min_samples,
                label_mode,
                heuristics: heuristics.into(),
            };
            let report = service
                .backtest(sport, config, cancel_on_ctrl_c())
                .await
                .with_context(|| format!("Backtest failed for {}", sport))?;

            match output {
                OutputFormat::Text => print_backtest(&report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if let Some(path) = report_path {
                save_to_json(&report, &path)?;
                println!("\nSaved report to {}", path.display());
            }
            if let Some(path) = bets_csv {
                save_bets_to_csv(&report.bets, &path)?;
                println!("\nSaved {} bets to {}", report.bets.len(), path.display());
            }
        }
        Commands::Show { sport } => {
            let stored = service.model(sport).await?;
            println!("{} MODEL\n", sport.config().display_name.to_uppercase());
            if let Some(trained_at) = stored.trained_at {
                println!("Trained: {}", trained_at.format("%Y-%m-%d %H:%M UTC"));
            }
            if let Some(stats) = stored.stats {
                println!(
                    "Samples: {} | Training accuracy: {:.1}%",
                    stats.samples,
                    stats.accuracy * 100.0
                );
            }
            println!("Bias: {:.4}", stored.model.bias);
            print_importance(&stored.model.feature_importance());
        }
        Commands::Delete { sport, target } => match target {
            DeleteTarget::Model => {
                service.store().delete_model(sport).await?;
                println!("Deleted {} model", sport);
            }
            DeleteTarget::Data => {
                service.store().delete_training_rows(sport).await?;
                println!("Deleted {} training data", sport);
            }
        },
    }

    Ok(())
}

fn print_sports() {
    println!("SUPPORTED SPORTS\n");
    for sport in Sport::ALL {
        let config = sport.config();
        let mut markets = vec!["moneyline"];
        if config.supports_spread {
            markets.push("spread");
        }
        if config.supports_total {
            markets.push("total");
        }
        println!(
            "{:<8} {:<20} markets: {:<26} features: {}",
            sport.key(),
            config.display_name,
            markets.join(", "),
            config.feature_names.join(", ")
        );
    }
}

fn print_importance(importance: &[FeatureImportance]) {
    println!("\nFEATURE IMPORTANCE\n");
    for (i, feature) in importance.iter().enumerate() {
        println!(
            "{}. {:<20} weight {:+.4}",
            i + 1,
            feature.feature,
            feature.weight
        );
    }
}

fn print_backtest(report: &BacktestReport) {
    println!("BACKTEST RESULTS\n");
    println!(
        "Rows replayed: {} | skipped: {}",
        report.rows_replayed, report.rows_skipped
    );
    println!(
        "Bankroll: ${:.2} -> ${:.2} ({:+.2})",
        report.starting_bankroll, report.final_bankroll, report.total_profit
    );
    println!(
        "Bets: {} | Wins: {} | ROI: {:+.2}% | Max drawdown: ${:.2}",
        report.total_bets, report.total_wins, report.roi, report.max_drawdown
    );

    if !report.markets.is_empty() {
        println!("\nBY MARKET\n");
        for (market, stats) in &report.markets {
            println!(
                "{:<10} bets {:>4} | W-L-P {}-{}-{} | hit {:.1}% | profit {:+.2} | ROI {:+.2}%",
                market.to_string(),
                stats.bets,
                stats.wins,
                stats.losses,
                stats.pushes,
                stats.hit_rate() * 100.0,
                stats.profit,
                stats.roi(report.stake)
            );
        }
    }
}
