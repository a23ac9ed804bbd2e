use crate::models::GameRecord;
use crate::utils::backtest::BetRecord;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// Canonical field a CSV column maps onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Team1,
    Team2,
    Moneyline1,
    Moneyline2,
    Spread,
    Total,
    SpreadOdds1,
    SpreadOdds2,
    OverOdds,
    UnderOdds,
    Score1,
    Score2,
    Winner,
    Date,
    Year,
    Season,
    Week,
    /// Any other numeric column, kept under its own name
    Feature,
}

/// Map a header from any of the sport templates onto a canonical field
fn classify_header(header: &str) -> Column {
    match header {
        "team1" | "home_team" | "home" | "player1" | "fighter1" => Column::Team1,
        "team2" | "away_team" | "away" | "player2" | "fighter2" => Column::Team2,
        "team1_moneyline" | "home_moneyline" | "home_ml" | "team1_ml" | "player1_moneyline"
        | "fighter1_moneyline" => Column::Moneyline1,
        "team2_moneyline" | "away_moneyline" | "away_ml" | "team2_ml" | "player2_moneyline"
        | "fighter2_moneyline" => Column::Moneyline2,
        "spread" | "home_spread" | "spread_line" => Column::Spread,
        "total" | "total_line" | "over_under" => Column::Total,
        "team1_spread_odds" | "home_spread_odds" => Column::SpreadOdds1,
        "team2_spread_odds" | "away_spread_odds" => Column::SpreadOdds2,
        "over_odds" => Column::OverOdds,
        "under_odds" => Column::UnderOdds,
        "team1_score" | "home_score" | "player1_score" | "fighter1_score" => Column::Score1,
        "team2_score" | "away_score" | "player2_score" | "fighter2_score" => Column::Score2,
        "winner" | "team1_win" | "home_win" => Column::Winner,
        "date" | "game_date" => Column::Date,
        "year" => Column::Year,
        "season" => Column::Season,
        "week" => Column::Week,
        _ => Column::Feature,
    }
}

fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// American odds, tolerating a leading "+" and decimal notation
fn parse_odds(value: &str) -> Option<i32> {
    parse_number(value).map(|v| v.round() as i32)
}

fn parse_winner(value: &str) -> Option<u8> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "w" => Some(1),
        "0" | "0.0" | "false" | "l" => Some(0),
        _ => None,
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

/// Parse uploaded game rows, mapping template column names onto
/// [`GameRecord`] fields. Rows without both competitors are skipped.
pub fn parse_games_csv<R: Read>(reader: R) -> Result<Vec<GameRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<(String, Column)> = csv_reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| {
            let name = normalize_header(h);
            let column = classify_header(&name);
            (name, column)
        })
        .collect();

    let mut games = Vec::new();
    for (line, result) in csv_reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", line + 2))?;
        let mut game = GameRecord::default();

        for ((name, column), value) in headers.iter().zip(record.iter()) {
            if value.is_empty() {
                continue;
            }
            match column {
                Column::Team1 => game.team1 = value.to_string(),
                Column::Team2 => game.team2 = value.to_string(),
                Column::Moneyline1 => game.team1_moneyline = parse_odds(value),
                Column::Moneyline2 => game.team2_moneyline = parse_odds(value),
                Column::Spread => game.spread = parse_number(value),
                Column::Total => game.total = parse_number(value),
                Column::SpreadOdds1 => game.team1_spread_odds = parse_odds(value),
                Column::SpreadOdds2 => game.team2_spread_odds = parse_odds(value),
                Column::OverOdds => game.over_odds = parse_odds(value),
                Column::UnderOdds => game.under_odds = parse_odds(value),
                Column::Score1 => game.team1_score = parse_number(value),
                Column::Score2 => game.team2_score = parse_number(value),
                Column::Winner => game.winner = parse_winner(value),
                Column::Date => game.date = parse_date(value),
                Column::Year => game.year = parse_number(value).map(|v| v as i32),
                Column::Season => game.season = parse_number(value).map(|v| v as i32),
                Column::Week => game.week = parse_number(value).map(|v| v as u32),
                Column::Feature => {
                    // Non-numeric columns (venue, notes, ...) are not model inputs
                    if let Some(v) = parse_number(value) {
                        game.features.insert(name.clone(), v);
                    }
                }
            }
        }

        if game.team1.is_empty() || game.team2.is_empty() {
            warn!("Skipping CSV row {}: missing competitor names", line + 2);
            continue;
        }
        games.push(game);
    }

    Ok(games)
}

/// Load game rows from a CSV file
pub fn load_games_from_csv(path: impl AsRef<Path>) -> Result<Vec<GameRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    parse_games_csv(file)
}

/// Save any serializable value as pretty JSON
pub fn save_to_json<T: Serialize + ?Sized>(data: &T, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize data")?;
    std::fs::write(path, json).context("Failed to write JSON file")?;
    Ok(())
}

/// Load a value saved with [`save_to_json`]
pub fn load_from_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let json = std::fs::read_to_string(path).context("Failed to read JSON file")?;
    serde_json::from_str(&json).context("Failed to deserialize JSON data")
}

/// Save backtest bets to CSV
pub fn save_bets_to_csv(bets: &[BetRecord], filename: impl AsRef<Path>) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename).context("Failed to create CSV file")?;

    writer.write_record([
        "Date",
        "Team 1",
        "Team 2",
        "Market",
        "Side",
        "Odds",
        "Model Probability (%)",
        "Expected Value ($ per 100)",
        "Outcome",
        "Profit",
        "Bankroll",
    ])?;

    for bet in bets {
        writer.write_record([
            bet.date.map(|d| d.to_string()).unwrap_or_default(),
            bet.team1.clone(),
            bet.team2.clone(),
            bet.market.to_string(),
            bet.side.to_string(),
            format!("{:+}", bet.odds),
            format!("{:.1}", bet.model_prob * 100.0),
            format!("{:.2}", bet.expected_value),
            format!("{:?}", bet.outcome).to_lowercase(),
            format!("{:.2}", bet.profit),
            format!("{:.2}", bet.bankroll_after),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_games_csv_maps_template_columns() {
        let csv = "\
Date,Home Team,Away Team,Home ML,Away ML,Spread,Total,Home Score,Away Score,Venue
2023-09-10,Chiefs,Lions,-180,+155,-4.5,53.5,20,21,Arrowhead
09/17/2023,Bills,Raiders,-400,+320,,,38,10,Highmark
";
        let games = parse_games_csv(csv.as_bytes()).unwrap();
        assert_eq!(games.len(), 2);

        let first = &games[0];
        assert_eq!(first.team1, "Chiefs");
        assert_eq!(first.team2, "Lions");
        assert_eq!(first.team1_moneyline, Some(-180));
        assert_eq!(first.team2_moneyline, Some(155));
        assert_eq!(first.spread, Some(-4.5));
        assert_eq!(first.total, Some(53.5));
        assert_eq!(first.team2_score, Some(21.0));
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2023, 9, 10));
        assert!(first.features.is_empty());

        assert_eq!(games[1].spread, None);
        assert_eq!(games[1].date, NaiveDate::from_ymd_opt(2023, 9, 17));
    }

    #[test]
    fn test_parse_games_csv_keeps_extra_numeric_columns() {
        let csv = "\
player1,player2,player1_moneyline,player2_moneyline,player1_ranking,player2_ranking,surface_code,winner,season,week
Alcaraz,Sinner,-120,100,2,1,1,1,2024,12
,Medvedev,-120,100,3,4,0,0,2024,12
";
        let games = parse_games_csv(csv.as_bytes()).unwrap();
        assert_eq!(games.len(), 1);
        let game = &games[0];
        assert_eq!(game.winner, Some(1));
        assert_eq!(game.season, Some(2024));
        assert_eq!(game.week, Some(12));
        assert_eq!(game.features["player1_ranking"], 2.0);
        assert_eq!(game.features["surface_code"], 1.0);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_odds("+150"), Some(150));
        assert_eq!(parse_odds("-110.0"), Some(-110));
        assert_eq!(parse_odds("pk"), None);
        assert_eq!(parse_winner("TRUE"), Some(1));
        assert_eq!(parse_winner("push"), None);
        assert_eq!(normalize_header(" Home Team "), "home_team");
    }
}
