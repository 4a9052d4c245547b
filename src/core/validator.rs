//! Structural validation of transaction requests
//!
//! Runs before anything is journaled. Checks are applied in a fixed order so
//! a request with several problems always reports the same one first.

use rust_decimal::Decimal;

use crate::types::{LedgerError, Movement, RequestedType, TransactionRequest, TransactionType};

/// Validate a request and resolve it into the movement it describes
pub fn validate(request: &TransactionRequest) -> Result<Movement, LedgerError> {
    if request.amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount: request.amount,
        });
    }
    if request.currency.is_empty() {
        return Err(LedgerError::MissingCurrency);
    }

    let tx_type = match &request.tx_type {
        RequestedType::Known(tx_type) => *tx_type,
        RequestedType::Other(raw) => {
            return Err(LedgerError::InvalidTransactionType {
                tx_type: raw.clone(),
            })
        }
    };

    match tx_type {
        TransactionType::Deposit => request
            .to_account_id
            .map(|to| Movement::Deposit { to })
            .ok_or(LedgerError::MissingToAccount),
        TransactionType::Withdrawal => request
            .from_account_id
            .map(|from| Movement::Withdrawal { from })
            .ok_or(LedgerError::MissingFromAccount),
        TransactionType::Transfer => match (request.from_account_id, request.to_account_id) {
            (Some(from), Some(to)) if from == to => Err(LedgerError::SameAccount { account: from }),
            (Some(from), Some(to)) => Ok(Movement::Transfer { from, to }),
            _ => Err(LedgerError::MissingAccounts),
        },
    }
}

/// Check a currency code for account creation: three upper-case ASCII letters
pub fn validate_currency(currency: &str) -> Result<(), LedgerError> {
    if currency.is_empty() {
        return Err(LedgerError::MissingCurrency);
    }
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(LedgerError::InvalidCurrency {
            currency: currency.to_string(),
        });
    }
    Ok(())
}
