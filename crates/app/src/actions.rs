use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{debug, error, info};

use dashboard_core::types::CUSTOMER_PLACEHOLDER_IMAGE;
use dashboard_core::{
    validate_customer, validate_invoice, ActionState, Entity, FieldErrors, Validated, Verb,
};
use dashboard_storage::{
    Affected, Database, InvoiceChanges, NewCustomer, NewInvoice, RepositoryError,
};

use crate::revalidate::ViewInvalidator;

pub const INVOICES_PATH: &str = "/dashboard/invoices";
pub const CUSTOMERS_PATH: &str = "/dashboard/customers";

/// Terminal outcome of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The form was rejected before any statement ran.
    ValidationFailed(ActionState),
    /// The statement failed; the state carries the generic message only.
    PersistenceFailed(ActionState),
    /// The statement succeeded and the client should navigate to the path.
    Redirect(&'static str),
}

/// Terminal outcome of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(ActionState),
    PersistenceFailed(ActionState),
}

/// Runs the dashboard mutations: validate, one statement, invalidate, respond.
#[derive(Clone)]
pub struct MutationService {
    database: Database,
    invalidator: Arc<dyn ViewInvalidator>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl MutationService {
    pub fn new(
        database: Database,
        invalidator: Arc<dyn ViewInvalidator>,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            database,
            invalidator,
            clock,
        }
    }

    pub async fn create_invoice(&self, input: &HashMap<String, String>) -> MutationOutcome {
        let form = match validate_invoice(input) {
            Validated::Valid(form) => form,
            Validated::Invalid(errors) => {
                return self.rejected(errors, Verb::Create, Entity::Invoice);
            }
        };

        let date = (self.clock)().date_naive();
        let result = self
            .database
            .invoices()
            .insert(&NewInvoice {
                customer_id: &form.customer_id,
                amount_in_cents: form.amount_in_cents,
                status: form.status,
                date,
            })
            .await;

        match result {
            Ok(id) => {
                info!(
                    stage = "action",
                    action = "create_invoice",
                    invoice_id = %id,
                    "invoice created"
                );
                self.redirect_after(Verb::Create, Entity::Invoice)
            }
            Err(err) => self.persistence_failed(err, Verb::Create, Entity::Invoice),
        }
    }

    /// Overwrites every mutable field; an unknown id silently affects nothing.
    pub async fn update_invoice(
        &self,
        id: &str,
        input: &HashMap<String, String>,
    ) -> MutationOutcome {
        let form = match validate_invoice(input) {
            Validated::Valid(form) => form,
            Validated::Invalid(errors) => {
                return self.rejected(errors, Verb::Update, Entity::Invoice);
            }
        };

        let result = self
            .database
            .invoices()
            .update(
                id,
                &InvoiceChanges {
                    customer_id: &form.customer_id,
                    amount_in_cents: form.amount_in_cents,
                    status: form.status,
                },
            )
            .await;

        match result {
            Ok(affected) => {
                note_noop("update_invoice", id, affected);
                info!(
                    stage = "action",
                    action = "update_invoice",
                    invoice_id = id,
                    rows = affected.0,
                    "invoice updated"
                );
                self.redirect_after(Verb::Update, Entity::Invoice)
            }
            Err(err) => self.persistence_failed(err, Verb::Update, Entity::Invoice),
        }
    }

    pub async fn delete_invoice(&self, id: &str) -> DeleteOutcome {
        match self.database.invoices().delete(id).await {
            Ok(affected) => {
                note_noop("delete_invoice", id, affected);
                info!(
                    stage = "action",
                    action = "delete_invoice",
                    invoice_id = id,
                    rows = affected.0,
                    "invoice deleted"
                );
                self.deleted(Entity::Invoice)
            }
            Err(err) => self.delete_failed(err, Entity::Invoice),
        }
    }

    pub async fn create_customer(&self, input: &HashMap<String, String>) -> MutationOutcome {
        let form = match validate_customer(input) {
            Validated::Valid(form) => form,
            Validated::Invalid(errors) => {
                return self.rejected(errors, Verb::Create, Entity::Customer);
            }
        };

        let result = self
            .database
            .customers()
            .insert(&NewCustomer {
                name: &form.name,
                email: &form.email,
                image_url: CUSTOMER_PLACEHOLDER_IMAGE,
            })
            .await;

        match result {
            Ok(id) => {
                info!(
                    stage = "action",
                    action = "create_customer",
                    customer_id = %id,
                    "customer created"
                );
                self.redirect_after(Verb::Create, Entity::Customer)
            }
            Err(err) => self.persistence_failed(err, Verb::Create, Entity::Customer),
        }
    }

    pub async fn update_customer(
        &self,
        id: &str,
        input: &HashMap<String, String>,
    ) -> MutationOutcome {
        let form = match validate_customer(input) {
            Validated::Valid(form) => form,
            Validated::Invalid(errors) => {
                return self.rejected(errors, Verb::Update, Entity::Customer);
            }
        };

        let result = self
            .database
            .customers()
            .update(id, &form.name, &form.email)
            .await;

        match result {
            Ok(affected) => {
                note_noop("update_customer", id, affected);
                info!(
                    stage = "action",
                    action = "update_customer",
                    customer_id = id,
                    rows = affected.0,
                    "customer updated"
                );
                self.redirect_after(Verb::Update, Entity::Customer)
            }
            Err(err) => self.persistence_failed(err, Verb::Update, Entity::Customer),
        }
    }

    pub async fn delete_customer(&self, id: &str) -> DeleteOutcome {
        match self.database.customers().delete(id).await {
            Ok(affected) => {
                note_noop("delete_customer", id, affected);
                info!(
                    stage = "action",
                    action = "delete_customer",
                    customer_id = id,
                    rows = affected.0,
                    "customer deleted"
                );
                self.deleted(Entity::Customer)
            }
            Err(err) => self.delete_failed(err, Entity::Customer),
        }
    }

    fn rejected(&self, errors: FieldErrors, verb: Verb, entity: Entity) -> MutationOutcome {
        let action = action_label(verb, entity);
        debug!(stage = "action", action, fields = errors.len(), "form rejected");
        record_outcome(action, "invalid");
        MutationOutcome::ValidationFailed(ActionState::missing_fields(errors, verb, entity))
    }

    fn persistence_failed(
        &self,
        err: RepositoryError,
        verb: Verb,
        entity: Entity,
    ) -> MutationOutcome {
        let action = action_label(verb, entity);
        error!(stage = "action", action, error = %err, "statement failed");
        record_outcome(action, "db_error");
        MutationOutcome::PersistenceFailed(ActionState::database_error(verb, entity))
    }

    fn delete_failed(&self, err: RepositoryError, entity: Entity) -> DeleteOutcome {
        let action = action_label(Verb::Delete, entity);
        error!(stage = "action", action, error = %err, "statement failed");
        record_outcome(action, "db_error");
        DeleteOutcome::PersistenceFailed(ActionState::database_error(Verb::Delete, entity))
    }

    fn redirect_after(&self, verb: Verb, entity: Entity) -> MutationOutcome {
        let path = listing_path(entity);
        self.invalidator.revalidate_path(path);
        record_outcome(action_label(verb, entity), "ok");
        MutationOutcome::Redirect(path)
    }

    fn deleted(&self, entity: Entity) -> DeleteOutcome {
        self.invalidator.revalidate_path(listing_path(entity));
        record_outcome(action_label(Verb::Delete, entity), "ok");
        DeleteOutcome::Deleted(ActionState::deleted(entity))
    }
}

fn listing_path(entity: Entity) -> &'static str {
    match entity {
        Entity::Invoice => INVOICES_PATH,
        Entity::Customer => CUSTOMERS_PATH,
    }
}

fn action_label(verb: Verb, entity: Entity) -> &'static str {
    match (verb, entity) {
        (Verb::Create, Entity::Invoice) => "create_invoice",
        (Verb::Update, Entity::Invoice) => "update_invoice",
        (Verb::Delete, Entity::Invoice) => "delete_invoice",
        (Verb::Create, Entity::Customer) => "create_customer",
        (Verb::Update, Entity::Customer) => "update_customer",
        (Verb::Delete, Entity::Customer) => "delete_customer",
    }
}

fn note_noop(action: &'static str, id: &str, affected: Affected) {
    if affected.is_noop() {
        debug!(stage = "action", action, id, "no row matched");
    }
}

fn record_outcome(action: &'static str, outcome: &'static str) {
    counter!("dashboard_actions_total", "action" => action, "outcome" => outcome).increment(1);
}
