/// Overround below this is treated as an already-fair market
pub const VIG_EPSILON: f64 = 1e-9;

/// Standard price assumed for spread and total markets when a row omits it
pub const STANDARD_JUICE: i32 = -110;

/// Convert American odds to implied probability, or `None` for
/// non-finite or zero odds
/// Positive odds (+150) mean you win $150 on a $100 bet
/// Negative odds (-150) mean you need to bet $150 to win $100
pub fn try_moneyline_to_probability(odds: f64) -> Option<f64> {
    if !odds.is_finite() || odds == 0.0 {
        return None;
    }

    if odds > 0.0 {
        // For positive odds: 100 / (odds + 100)
        Some(100.0 / (odds + 100.0))
    } else {
        // For negative odds: |odds| / (|odds| + 100)
        let abs_odds = odds.abs();
        Some(abs_odds / (abs_odds + 100.0))
    }
}

/// Convert American odds to implied probability, falling back to a
/// neutral 0.5 for unusable odds
pub fn moneyline_to_probability(odds: f64) -> f64 {
    try_moneyline_to_probability(odds).unwrap_or(0.5)
}

/// Strip the bookmaker margin from a two-way market so both sides sum to 1
pub fn remove_vig(p1: f64, p2: f64) -> (f64, f64) {
    let total = p1 + p2;
    if total <= 1.0 + VIG_EPSILON {
        return (p1, p2);
    }
    (p1 / total, p2 / total)
}

/// Convert probability to American odds; `None` outside (0, 1)
pub fn probability_to_moneyline(prob: f64) -> Option<i32> {
    if !prob.is_finite() || prob <= 0.0 || prob >= 1.0 {
        return None;
    }

    if prob >= 0.5 {
        // Favorite (negative odds)
        Some(-((prob / (1.0 - prob)) * 100.0).round() as i32)
    } else {
        // Underdog (positive odds)
        Some((((1.0 - prob) / prob) * 100.0).round() as i32)
    }
}

/// Format a fair line the way books quote it, "N/A" when undefined
pub fn format_moneyline(odds: Option<i32>) -> String {
    match odds {
        Some(odds) => format!("{:+}", odds),
        None => "N/A".to_string(),
    }
}

/// Total return per unit staked, stake included
pub fn payout_multiplier(odds: i32) -> f64 {
    if odds > 0 {
        odds as f64 / 100.0 + 1.0
    } else if odds < 0 {
        1.0 + 100.0 / odds.abs() as f64
    } else {
        1.0
    }
}

/// Edge per $100 staked at `odds` given win probability `prob`.
///
/// The win term uses the total return (stake included), so this reads
/// higher than net expected profit by `prob * 100`. Thresholds are
/// expressed on this scale.
pub fn expected_value_per_100(prob: f64, odds: i32) -> f64 {
    let prob_lose = 1.0 - prob;
    (prob * payout_multiplier(odds) - prob_lose) * 100.0
}

/// Profit on a winning stake at `odds`
pub fn winning_profit(stake: f64, odds: i32) -> f64 {
    stake * (payout_multiplier(odds) - 1.0)
}
