//! Per-entity validators for raw form submissions.
//!
//! Validators never fail: they always return either the typed form or the
//! collected field errors, one entry per offending field, in field order.

use std::collections::HashMap;

use crate::action::FieldErrors;
use crate::types::{amount_to_cents, InvoiceStatus};

pub const CUSTOMER_ID_FIELD: &str = "customerId";
pub const AMOUNT_FIELD: &str = "amount";
pub const STATUS_FIELD: &str = "status";
pub const NAME_FIELD: &str = "name";
pub const EMAIL_FIELD: &str = "email";

pub const CUSTOMER_ID_MESSAGE: &str = "Please select a customer.";
pub const AMOUNT_MESSAGE: &str = "Please enter an amount greater than $0.";
pub const STATUS_MESSAGE: &str = "Please select an invoice status.";
pub const NAME_MESSAGE: &str = "Please enter the customer name.";
pub const EMAIL_MESSAGE: &str = "Please enter the customer email.";

/// Outcome of validating a form submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Validated<T> {
    Valid(T),
    Invalid(FieldErrors),
}

impl<T> Validated<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// User-supplied invoice fields shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceForm {
    pub customer_id: String,
    pub amount_in_cents: i64,
    pub status: InvoiceStatus,
}

/// User-supplied customer fields shared by create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerForm {
    pub name: String,
    pub email: String,
}

pub fn validate_invoice(fields: &HashMap<String, String>) -> Validated<InvoiceForm> {
    let mut errors = FieldErrors::new();

    let customer_id = required(fields, CUSTOMER_ID_FIELD);
    if customer_id.is_none() {
        errors.push(CUSTOMER_ID_FIELD, CUSTOMER_ID_MESSAGE);
    }

    let amount_in_cents = coerce_amount(fields.get(AMOUNT_FIELD).map(String::as_str));
    if amount_in_cents.is_none() {
        errors.push(AMOUNT_FIELD, AMOUNT_MESSAGE);
    }

    let status = fields
        .get(STATUS_FIELD)
        .and_then(|value| value.parse::<InvoiceStatus>().ok());
    if status.is_none() {
        errors.push(STATUS_FIELD, STATUS_MESSAGE);
    }

    match (customer_id, amount_in_cents, status) {
        (Some(customer_id), Some(amount_in_cents), Some(status)) => {
            Validated::Valid(InvoiceForm {
                customer_id: customer_id.to_string(),
                amount_in_cents,
                status,
            })
        }
        _ => Validated::Invalid(errors),
    }
}

pub fn validate_customer(fields: &HashMap<String, String>) -> Validated<CustomerForm> {
    let mut errors = FieldErrors::new();

    let name = required(fields, NAME_FIELD);
    if name.is_none() {
        errors.push(NAME_FIELD, NAME_MESSAGE);
    }

    let email = required(fields, EMAIL_FIELD);
    if email.is_none() {
        errors.push(EMAIL_FIELD, EMAIL_MESSAGE);
    }

    match (name, email) {
        (Some(name), Some(email)) => Validated::Valid(CustomerForm {
            name: name.to_string(),
            email: email.to_string(),
        }),
        _ => Validated::Invalid(errors),
    }
}

fn required<'a>(fields: &'a HashMap<String, String>, field: &str) -> Option<&'a str> {
    fields
        .get(field)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Coerces a form value to whole cents; absent and blank input coerce to zero.
///
/// Amounts that round below one cent or past
/// [`MAX_AMOUNT_CENTS`](crate::types::MAX_AMOUNT_CENTS) are rejected.
fn coerce_amount(raw: Option<&str>) -> Option<i64> {
    let trimmed = raw.unwrap_or_default().trim();
    let value = if trimmed.is_empty() {
        0.0
    } else {
        trimmed.parse::<f64>().ok()?
    };
    if value <= 0.0 {
        return None;
    }
    amount_to_cents(value)
}
