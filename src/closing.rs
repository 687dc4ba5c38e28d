//! Daily cash closing: validate the till reconciliation and submit it.
//!
//! The form is checked locally first and every invalid field is reported at
//! once. A valid closing is posted to `/api/sum_payments`, journaled in the
//! local `cash_closings` table and the auto-saved count draft is discarded.

use chrono::{NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{ApiClient, ApiError, FetchOptions};
use crate::cash_count::{CashCount, CashCountEntries, DenominationGroup};
use crate::db::DbState;
use crate::draft;
use crate::storage::KeyValueStore;

const SUBMIT_PATH: &str = "/api/sum_payments";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CashClosingForm {
    /// `YYYY-MM-DD`
    pub date: String,
    pub cashier: String,
    pub cash_count: CashCountEntries,
    pub card_total: i64,
    pub transfer_total: i64,
    pub expenses: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// All invalid fields of a form, in display order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", summarize(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

impl ValidationError {
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

fn amounts_too_large() -> FieldError {
    FieldError::new("amounts", "Amounts are too large")
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum ClosingError {
    #[error("Invalid closing: {0}")]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("Failed to record closing locally: {0}")]
    Storage(String),
}

/// What the operator sees after a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct ClosingReceipt {
    pub id: String,
    pub date: String,
    pub cash_total: i64,
    pub net_total: i64,
    pub origin: String,
    pub backend: Value,
}

impl CashClosingForm {
    pub fn cash_total(&self) -> i64 {
        let mut count = CashCount::new();
        count.load(self.cash_count.clone());
        count.totals().total
    }

    /// Cash + card + transfers − expenses; `None` when the sum leaves `i64`.
    pub fn net_total(&self) -> Option<i64> {
        self.cash_total()
            .checked_add(self.card_total)?
            .checked_add(self.transfer_total)?
            .checked_sub(self.expenses)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut fields = Vec::new();

        if NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").is_err() {
            fields.push(FieldError::new("date", "Use the format YYYY-MM-DD"));
        }
        if self.cashier.trim().is_empty() {
            fields.push(FieldError::new("cashier", "Cashier is required"));
        }

        for (group, entries) in [
            (DenominationGroup::Coins, &self.cash_count.coins),
            (DenominationGroup::Bills, &self.cash_count.bills),
        ] {
            for (denomination, qty) in entries {
                if qty.trim().parse::<i64>().map(|q| q < 0).unwrap_or(false) {
                    let group = match group {
                        DenominationGroup::Coins => "coins",
                        DenominationGroup::Bills => "bills",
                    };
                    fields.push(FieldError::new(
                        format!("cash_count.{group}.{denomination}"),
                        "Quantity cannot be negative",
                    ));
                }
            }
        }

        for (field, amount) in [
            ("card_total", self.card_total),
            ("transfer_total", self.transfer_total),
            ("expenses", self.expenses),
        ] {
            if amount < 0 {
                fields.push(FieldError::new(field, "Amount cannot be negative"));
            }
        }

        let all_zero = self.cash_total() == 0
            && self.card_total == 0
            && self.transfer_total == 0
            && self.expenses == 0;
        if all_zero {
            fields.push(FieldError::new("amounts", "Enter at least one amount"));
        }
        if self.net_total().is_none() {
            fields.push(amounts_too_large());
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields })
        }
    }

    fn payload(&self, reference: &str, net_total: i64) -> Value {
        json!({
            "client_reference": reference,
            "closing_date": self.date.trim(),
            "cashier": self.cashier.trim(),
            "cash": {
                "coins": self.cash_count.coins,
                "bills": self.cash_count.bills,
                "total": self.cash_total(),
            },
            "card_total": self.card_total,
            "transfer_total": self.transfer_total,
            "expenses": self.expenses,
            "net_total": net_total,
            "notes": self.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()),
        })
    }
}

/// Validate, post, journal, and drop the draft.
pub async fn submit_closing(
    api: &ApiClient,
    db: &DbState,
    local: &dyn KeyValueStore,
    form: &CashClosingForm,
) -> Result<ClosingReceipt, ClosingError> {
    form.validate()?;
    let net_total = form.net_total().ok_or_else(|| ValidationError {
        fields: vec![amounts_too_large()],
    })?;

    let reference = Uuid::new_v4().to_string();
    let payload = form.payload(&reference, net_total);
    let resp = api
        .authenticated_fetch(SUBMIT_PATH, FetchOptions::post(&payload)?)
        .await?;

    record_closing(db, &reference, form, &payload)?;
    draft::clear_draft(local);

    info!(
        id = %reference,
        date = %form.date,
        net_total,
        origin = %resp.origin.base_url,
        "cash closing submitted"
    );

    Ok(ClosingReceipt {
        id: reference,
        date: form.date.trim().to_string(),
        cash_total: form.cash_total(),
        net_total,
        origin: resp.origin.base_url,
        backend: resp.body,
    })
}

fn record_closing(
    db: &DbState,
    id: &str,
    form: &CashClosingForm,
    payload: &Value,
) -> Result<(), ClosingError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| ClosingError::Storage(e.to_string()))?;
    conn.execute(
        "INSERT INTO cash_closings
            (id, closing_date, cashier, cash_total, card_total, transfer_total, expenses, payload, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            form.date.trim(),
            form.cashier.trim(),
            form.cash_total(),
            form.card_total,
            form.transfer_total,
            form.expenses,
            payload.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| {
        warn!(id, error = %e, "failed to journal cash closing");
        ClosingError::Storage(e.to_string())
    })?;
    Ok(())
}

/// A journaled closing, newest first in [`recent_closings`].
#[derive(Debug, Clone, Serialize)]
pub struct ClosingRecord {
    pub id: String,
    pub closing_date: String,
    pub cashier: String,
    pub cash_total: i64,
    pub card_total: i64,
    pub transfer_total: i64,
    pub expenses: i64,
    pub submitted_at: String,
}

pub fn recent_closings(db: &DbState, limit: u32) -> Result<Vec<ClosingRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, closing_date, cashier, cash_total, card_total, transfer_total, expenses, submitted_at
             FROM cash_closings ORDER BY submitted_at DESC LIMIT ?1",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(ClosingRecord {
                id: row.get(0)?,
                closing_date: row.get(1)?,
                cashier: row.get(2)?,
                cash_total: row.get(3)?,
                card_total: row.get(4)?,
                transfer_total: row.get(5)?,
                expenses: row.get(6)?,
                submitted_at: row.get(7)?,
            })
        })
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.to_string())
}
