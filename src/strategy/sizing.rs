//! Buy spend sizing and the rolling daily budget.

use crate::config::{BuySizing, TradingConfig};
use chrono::NaiveDate;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Tracks how much quote currency has been spent on buys today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySpendCounter {
    day_marker: NaiveDate,
    spent_today: Decimal,
}

impl DailySpendCounter {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            day_marker: today,
            spent_today: Decimal::ZERO,
        }
    }

    /// Reset the counter when the calendar day has advanced.
    /// Returns true if a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if today == self.day_marker {
            return false;
        }
        self.day_marker = today;
        self.spent_today = Decimal::ZERO;
        true
    }

    pub fn record_spend(&mut self, amount: Decimal) {
        self.spent_today += amount;
    }

    pub fn spent(&self) -> Decimal {
        self.spent_today
    }

    pub fn remaining(&self, limit: Decimal) -> Decimal {
        limit - self.spent_today
    }
}

/// Outcome of sizing one buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyDecision {
    /// Spend this much quote currency on the asset.
    Spend(Decimal),
    /// The daily budget is exhausted; stop buying for this cycle.
    HaltPass,
}

/// Computes the desired spend for a top-up buy.
pub struct BuySizer {
    sizing: BuySizing,
    buy_min: Decimal,
    buy_max: Decimal,
    buy_threshold: Decimal,
    daily_limit: Decimal,
}

impl BuySizer {
    pub fn from_config(config: &TradingConfig) -> Self {
        Self {
            sizing: config.buy_sizing,
            buy_min: config.buy_min,
            buy_max: config.buy_max,
            buy_threshold: config.buy_threshold,
            daily_limit: config.daily_buy_limit,
        }
    }

    pub fn sizing(&self) -> BuySizing {
        self.sizing
    }

    /// Remaining daily budget, when the daily cap applies.
    pub fn daily_remaining(&self, daily: &DailySpendCounter) -> Option<Decimal> {
        matches!(self.sizing, BuySizing::DailyCapped).then(|| daily.remaining(self.daily_limit))
    }

    /// Desired quote-currency spend for an underweight position.
    ///
    /// Callers have already checked `quote_value < buy_threshold` and a
    /// positive available balance.
    pub fn desired_spend<R: Rng>(
        &self,
        rng: &mut R,
        quote_value: Decimal,
        available: Decimal,
        daily: &DailySpendCounter,
    ) -> BuyDecision {
        match self.sizing {
            BuySizing::Randomized => {
                let low = self.buy_min.to_f64().unwrap_or(0.0);
                let high = self.buy_max.to_f64().unwrap_or(low);
                let drawn = Decimal::from_f64_retain(rng.gen_range(low..=high))
                    .unwrap_or(self.buy_min)
                    .round_dp(2);
                BuyDecision::Spend(drawn.min(available))
            }
            BuySizing::DailyCapped => {
                let spend = (self.buy_threshold - quote_value)
                    .min(daily.remaining(self.daily_limit))
                    .min(available);
                if spend <= Decimal::ZERO {
                    BuyDecision::HaltPass
                } else {
                    BuyDecision::Spend(spend)
                }
            }
        }
    }
}
