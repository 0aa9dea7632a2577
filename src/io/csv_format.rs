//! CSV format handling for replay operations and balance output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to replay operations
//! - Balance output serialization
//!
//! All functions are pure (no I/O) for easy testing.

use std::io::Write;

use serde::Deserialize;

use crate::types::{Balance, CurrencyId, LedgerError, MutationRequest, ReplayOperation, UserId};

/// Raw CSV row: `op,user,currency,amount`
///
/// `currency` and `amount` are empty for `register` rows.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CsvRecord {
    pub op: String,
    pub user: UserId,
    pub currency: Option<CurrencyId>,
    pub amount: Option<String>,
}

fn parse_error(message: String) -> LedgerError {
    LedgerError::ParseError {
        line: None,
        message,
    }
}

/// Convert a raw CSV row into a replay operation
///
/// # Errors
///
/// Returns `LedgerError::ParseError` (without a line number; readers add it)
/// if the op is unknown, or a mutation lacks its currency or a valid amount.
pub fn convert_csv_record(csv_record: CsvRecord) -> Result<ReplayOperation, LedgerError> {
    let op = csv_record.op.trim().to_lowercase();
    if op == "register" {
        return Ok(ReplayOperation::Register {
            user_id: csv_record.user,
        });
    }

    if op != "add" && op != "subtract" {
        return Err(parse_error(format!(
            "Invalid operation: '{}' for user {}",
            csv_record.op, csv_record.user
        )));
    }

    let currency = csv_record.currency.ok_or_else(|| {
        parse_error(format!(
            "{} for user {} requires a currency",
            op, csv_record.user
        ))
    })?;

    let amount = match csv_record.amount.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.parse::<u64>().map_err(|_| {
            parse_error(format!(
                "Invalid amount '{}' for user {}",
                raw, csv_record.user
            ))
        })?,
        _ => {
            return Err(parse_error(format!(
                "{} for user {} requires an amount",
                op, csv_record.user
            )))
        }
    };

    let request = if op == "add" {
        MutationRequest::add(csv_record.user, currency, amount)
    } else {
        MutationRequest::subtract(csv_record.user, currency, amount)
    };
    Ok(ReplayOperation::Mutate(request))
}

/// Write balances as `user,currency,balance`, sorted by user then currency
pub fn write_balances_csv(balances: &[Balance], output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["user", "currency", "balance"])?;

    let mut sorted = balances.to_vec();
    sorted.sort_by_key(Balance::key);

    for balance in sorted {
        writer.write_record(&[
            balance.user_id.to_string(),
            balance.currency_id.to_string(),
            balance.quantity.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
