//! Human token amounts ("1.5") to and from base units.

use alloy_primitives::utils::{format_units, parse_units, ParseUnits};
use thiserror::Error;
use tipflow_types::Amount;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount `{input}`: {reason}")]
    Invalid { input: String, reason: String },
    #[error("amount must not be negative: `{0}`")]
    Negative(String),
}

pub fn parse_amount(input: &str, decimals: u8) -> Result<Amount, AmountError> {
    let trimmed = input.trim();
    match parse_units(trimmed, decimals) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(AmountError::Negative(trimmed.to_string())),
        Err(err) => Err(AmountError::Invalid {
            input: trimmed.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Formats base units with `decimals`, dropping trailing fractional zeros.
pub fn format_amount(amount: Amount, decimals: u8) -> String {
    let Ok(formatted) = format_units(amount, decimals) else {
        return amount.to_string();
    };
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
