// src/money.rs
//! Fixed-point currency helpers. Amounts are `Decimal` at two places and
//! persisted as integer cents.

use crate::error::{FinanceError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

pub const CURRENCY_SCALE: u32 = 2;

pub fn round_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn is_whole_cents(amount: Decimal) -> bool {
    amount.normalize().scale() <= CURRENCY_SCALE
}

pub fn to_cents(amount: Decimal) -> Result<i64> {
    if !is_whole_cents(amount) {
        return Err(FinanceError::Validation(format!(
            "{} is not a whole number of cents",
            amount
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| out_of_range(amount))
}

fn out_of_range(amount: impl std::fmt::Display) -> FinanceError {
    FinanceError::Validation(format!("{} is out of range", amount))
}

/// `price × shares`, rejecting results a `Decimal` cannot hold.
pub fn line_total(price: Decimal, shares: i64) -> Result<Decimal> {
    price
        .checked_mul(Decimal::from(shares))
        .ok_or_else(|| out_of_range(format!("{} x {}", price, shares)))
}

pub fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| out_of_range(format!("{} + {}", a, b)))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, CURRENCY_SCALE)
}

/// Formats an amount as US dollars, e.g. `$1,234.56` or `-$5.00`.
pub fn usd(amount: Decimal) -> String {
    let rounded = round_to_cents(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{}${}.{}", sign, grouped, frac)
}
