//! Domain types and form validation shared by the dashboard storage and HTTP layers.

pub mod action;
pub mod types;
pub mod validation;

pub use action::{ActionState, Entity, FieldErrors, Verb};
pub use types::{Customer, CustomerSummary, EditableInvoice, Invoice, InvoiceStatus};
pub use validation::{validate_customer, validate_invoice, CustomerForm, InvoiceForm, Validated};
