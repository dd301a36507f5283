//! SessionLedger: the single local session and its tip accumulator.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tipflow_crypto::SettlementInput;
use tipflow_types::{Address, Amount, Session, SessionId};

/// Ledger invariant violations and lifecycle misuse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("session {0} is already open")]
    SessionAlreadyOpen(SessionId),
    #[error("no active session")]
    NoActiveSession,
    #[error("amount must be greater than zero")]
    ZeroAmount,
    #[error("insufficient session balance: requested {requested}, remaining {remaining}")]
    InsufficientSessionBalance { requested: Amount, remaining: Amount },
    #[error("malformed recipient `{0}` in ledger")]
    MalformedRecipient(String),
    #[error("corrupted ledger snapshot: {0}")]
    CorruptedSnapshot(String),
}

/// One recipient's accumulated tips. Recipients stay strings so a damaged
/// persisted entry survives loading and is caught before settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipRecord {
    pub recipient: String,
    #[serde(with = "decimal")]
    pub amount: Amount,
}

/// Persisted form of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub session_id: Option<SessionId>,
    #[serde(with = "decimal")]
    pub deposited_amount: Amount,
    #[serde(default)]
    pub tips: Vec<TipRecord>,
}

/// `Empty -> Open -> (tip)* -> Empty`. Tips are kept in first-tip order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLedger {
    session: Option<Session>,
    tips: Vec<TipRecord>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, id: SessionId, deposited_amount: Amount) -> Result<(), LedgerError> {
        if let Some(session) = self.session {
            return Err(LedgerError::SessionAlreadyOpen(session.id));
        }
        if deposited_amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        self.session = Some(Session {
            id,
            deposited_amount,
        });
        self.tips.clear();
        Ok(())
    }

    /// Adds `amount` to `recipient`'s running total. Returns that total.
    ///
    /// Rejected tips leave the ledger untouched.
    pub fn tip(&mut self, recipient: Address, amount: Amount) -> Result<Amount, LedgerError> {
        let session = self.session.ok_or(LedgerError::NoActiveSession)?;
        if amount.is_zero() {
            return Err(LedgerError::ZeroAmount);
        }
        let remaining = session.deposited_amount.saturating_sub(self.total_tipped());
        if amount > remaining {
            return Err(LedgerError::InsufficientSessionBalance {
                requested: amount,
                remaining,
            });
        }

        let key = recipient.to_string();
        let index = match self.tips.iter().position(|tip| tip.recipient == key) {
            Some(index) => index,
            None => {
                self.tips.push(TipRecord {
                    recipient: key,
                    amount: Amount::ZERO,
                });
                self.tips.len() - 1
            }
        };
        let entry = &mut self.tips[index];
        entry.amount += amount;
        Ok(entry.amount)
    }

    /// Empties the session and every tip. Returns whether anything was dropped.
    pub fn clear(&mut self) -> bool {
        let had_state = self.session.is_some() || !self.tips.is_empty();
        self.session = None;
        self.tips.clear();
        had_state
    }

    pub fn session(&self) -> Option<Session> {
        self.session
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn tips(&self) -> &[TipRecord] {
        &self.tips
    }

    pub fn total_tipped(&self) -> Amount {
        self.tips
            .iter()
            .fold(Amount::ZERO, |acc, tip| acc.saturating_add(tip.amount))
    }

    pub fn remaining(&self) -> Amount {
        self.session
            .map(|session| session.deposited_amount.saturating_sub(self.total_tipped()))
            .unwrap_or_default()
    }

    /// Recipient and amount lists in first-tip order, ready for encoding.
    pub fn settlement_input(&self) -> Result<SettlementInput, LedgerError> {
        let session = self.session.ok_or(LedgerError::NoActiveSession)?;
        let mut recipients = Vec::with_capacity(self.tips.len());
        let mut amounts = Vec::with_capacity(self.tips.len());
        for tip in &self.tips {
            let recipient = Address::parse(&tip.recipient)
                .map_err(|_| LedgerError::MalformedRecipient(tip.recipient.clone()))?;
            recipients.push(recipient);
            amounts.push(tip.amount);
        }
        SettlementInput::new(session.id, recipients, amounts)
            .map_err(|err| LedgerError::CorruptedSnapshot(err.to_string()))
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            session_id: self.session.map(|session| session.id),
            deposited_amount: self
                .session
                .map(|session| session.deposited_amount)
                .unwrap_or_default(),
            tips: self.tips.clone(),
        }
    }

    /// Rebuilds a ledger from persisted state, re-checking conservation.
    pub fn restore(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let Some(id) = snapshot.session_id else {
            return Ok(Self::default());
        };
        let mut total = Amount::ZERO;
        let mut tips: Vec<TipRecord> = Vec::with_capacity(snapshot.tips.len());
        for mut tip in snapshot.tips {
            if tip.amount.is_zero() {
                return Err(LedgerError::CorruptedSnapshot(format!(
                    "zero tip for {}",
                    tip.recipient
                )));
            }
            total = total
                .checked_add(tip.amount)
                .ok_or_else(|| LedgerError::CorruptedSnapshot("tip total overflows".to_string()))?;
            if let Ok(parsed) = Address::parse(&tip.recipient) {
                tip.recipient = parsed.to_string();
            }
            match tips.iter().position(|seen| seen.recipient == tip.recipient) {
                Some(index) => tips[index].amount += tip.amount,
                None => tips.push(tip),
            }
        }
        if total > snapshot.deposited_amount {
            return Err(LedgerError::CorruptedSnapshot(format!(
                "tips total {total} exceed deposit {}",
                snapshot.deposited_amount
            )));
        }
        Ok(Self {
            session: Some(Session {
                id,
                deposited_amount: snapshot.deposited_amount,
            }),
            tips,
        })
    }
}

/// `uint256` amounts as base-10 strings.
mod decimal {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use tipflow_types::Amount;

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::from_str_radix(raw.trim(), 10).map_err(de::Error::custom)
    }
}
