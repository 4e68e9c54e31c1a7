use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image assigned to every customer created through the dashboard.
pub const CUSTOMER_PLACEHOLDER_IMAGE: &str = "/customers/placeholder.png";

/// Invoice payment status persisted in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
}

impl InvoiceStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown invoice status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for InvoiceStatus {
    type Err = UnknownStatus;

    /// Only the exact lowercase spellings are accepted.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Invoice row as stored, with the amount kept in integer cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer_id: String,
    pub amount: i64,
    pub status: InvoiceStatus,
    pub date: NaiveDate,
}

impl Invoice {
    /// Projects the stored row into the shape the edit form is populated with.
    pub fn into_editable(self) -> EditableInvoice {
        EditableInvoice {
            id: self.id,
            customer_id: self.customer_id,
            amount: cents_to_amount(self.amount),
            status: self.status,
        }
    }
}

/// Invoice fields exposed to the edit form, amount expressed in dollars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditableInvoice {
    pub id: String,
    pub customer_id: String,
    pub amount: f64,
    pub status: InvoiceStatus,
}

/// Customer row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image_url: String,
}

/// Entry of the customer picker shown on invoice forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: String,
    pub name: String,
}

/// Largest storable amount in cents; every integer up to it is exact as `f64`.
pub const MAX_AMOUNT_CENTS: i64 = (1 << 53) - 1;

/// Converts a dollar amount into integer cents.
///
/// Returns `None` unless the rounded result lies in `1..=MAX_AMOUNT_CENTS`.
pub fn amount_to_cents(amount: f64) -> Option<i64> {
    let cents = (amount * 100.0).round();
    (1.0..=MAX_AMOUNT_CENTS as f64)
        .contains(&cents)
        .then_some(cents as i64)
}

/// Converts stored cents back to a dollar amount.
pub fn cents_to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}
