use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{sse::Sse, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{debug, error};

use dashboard_core::{CustomerSummary, EditableInvoice};
use dashboard_storage::Database;

use crate::actions::{DeleteOutcome, MutationOutcome, MutationService};
use crate::auth::{authenticate, AuthOutcome, IdentityProvider};
use crate::problem::ProblemResponse;
use crate::revalidate::{
    revalidation_keep_alive, revalidation_stream, PathFilter, RevalidationHub,
};
use crate::telemetry;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    revalidation: RevalidationHub,
    identity: Arc<dyn IdentityProvider>,
    mutations: MutationService,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        revalidation: RevalidationHub,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);
        let mutations =
            MutationService::new(storage.clone(), Arc::new(revalidation.clone()), clock);
        Self {
            metrics,
            storage,
            revalidation,
            identity,
            mutations,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.mutations = MutationService::new(
            self.storage.clone(),
            Arc::new(self.revalidation.clone()),
            clock,
        );
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn revalidation(&self) -> &RevalidationHub {
        &self.revalidation
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    pub fn mutations(&self) -> &MutationService {
        &self.mutations
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/_debug/revalidations", get(debug_revalidations))
        .route("/login", post(login))
        .route("/dashboard/invoices", post(create_invoice))
        .route("/dashboard/invoices/:id/edit", post(update_invoice))
        .route("/dashboard/invoices/:id/delete", post(delete_invoice))
        .route("/dashboard/customers", post(create_customer))
        .route("/dashboard/customers/:id/edit", post(update_customer))
        .route("/dashboard/customers/:id/delete", post(delete_customer))
        .route("/api/customers", get(list_customers))
        .route("/api/invoices/:id", get(fetch_invoice))
        .with_state(state)
}

impl IntoResponse for MutationOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Redirect(path) => Redirect::to(path).into_response(),
            Self::ValidationFailed(state) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(state)).into_response()
            }
            Self::PersistenceFailed(state) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(state)).into_response()
            }
        }
    }
}

impl IntoResponse for DeleteOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Deleted(state) => (StatusCode::OK, Json(state)).into_response(),
            Self::PersistenceFailed(state) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(state)).into_response()
            }
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
}

#[derive(Debug, Deserialize)]
struct RevalidationQuery {
    #[serde(default)]
    path: Option<String>,
}

async fn debug_revalidations(
    State(state): State<AppState>,
    Query(query): Query<RevalidationQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<axum::response::sse::Event, serde_json::Error>>> {
    if let Some(path) = query.path.as_deref() {
        debug!(
            stage = "revalidate",
            path,
            generation = state.revalidation().generation(path),
            "revalidation subscriber attached"
        );
    }
    let filter = PathFilter::from_prefix(query.path);
    let stream = revalidation_stream(state.revalidation().clone(), filter);
    Sse::new(stream).keep_alive(revalidation_keep_alive())
}

async fn login(
    State(state): State<AppState>,
    Form(credentials): Form<HashMap<String, String>>,
) -> Result<Response, ProblemResponse> {
    match authenticate(state.identity(), &credentials).await {
        Ok(AuthOutcome::Redirect(location)) => Ok(Redirect::to(&location).into_response()),
        Ok(AuthOutcome::Rejected(body)) => {
            Ok((StatusCode::UNAUTHORIZED, Json(body)).into_response())
        }
        Err(err) => {
            error!(stage = "auth", error = %err, "unclassified sign-in failure");
            Err(ProblemResponse::internal("sign-in failed"))
        }
    }
}

async fn create_invoice(
    State(state): State<AppState>,
    Form(input): Form<HashMap<String, String>>,
) -> MutationOutcome {
    state.mutations().create_invoice(&input).await
}

async fn update_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(input): Form<HashMap<String, String>>,
) -> MutationOutcome {
    state.mutations().update_invoice(&id, &input).await
}

async fn delete_invoice(State(state): State<AppState>, Path(id): Path<String>) -> DeleteOutcome {
    state.mutations().delete_invoice(&id).await
}

async fn create_customer(
    State(state): State<AppState>,
    Form(input): Form<HashMap<String, String>>,
) -> MutationOutcome {
    state.mutations().create_customer(&input).await
}

async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(input): Form<HashMap<String, String>>,
) -> MutationOutcome {
    state.mutations().update_customer(&id, &input).await
}

async fn delete_customer(State(state): State<AppState>, Path(id): Path<String>) -> DeleteOutcome {
    state.mutations().delete_customer(&id).await
}

async fn list_customers(
    State(state): State<AppState>,
) -> Result<Json<Vec<CustomerSummary>>, ProblemResponse> {
    state
        .storage()
        .customers()
        .list_summaries()
        .await
        .map(Json)
        .map_err(|err| {
            error!(stage = "app", error = %err, "failed to list customers");
            ProblemResponse::internal("Failed to fetch all customers.")
        })
}

async fn fetch_invoice(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EditableInvoice>, ProblemResponse> {
    let invoice = state
        .storage()
        .invoices()
        .fetch_by_id(&id)
        .await
        .map_err(|err| {
            error!(stage = "app", invoice_id = %id, error = %err, "failed to fetch invoice");
            ProblemResponse::internal("Failed to fetch invoice.")
        })?
        .ok_or_else(|| {
            ProblemResponse::not_found("invoice not found")
                .with_instance(format!("/api/invoices/{id}"))
        })?;

    Ok(Json(invoice.into_editable()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::time::{self, Duration};
    use tower::ServiceExt;

    use crate::actions::test_support::temp_database;
    use crate::actions::{CUSTOMERS_PATH, INVOICES_PATH};
    use crate::auth::test_support::{seed_user, USER_EMAIL, USER_PASSWORD};
    use crate::auth::{CredentialsProvider, SignInError};
    use crate::revalidate::ViewInvalidator;
    use dashboard_core::types::InvoiceStatus;
    use dashboard_storage::{NewCustomer, NewInvoice};

    async fn setup_state() -> (TempDir, AppState) {
        let (dir, database) = temp_database().await;
        let identity = Arc::new(CredentialsProvider::new(database.users()));
        (dir, state_with_identity(database, identity))
    }

    fn state_with_identity(database: Database, identity: Arc<dyn IdentityProvider>) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let clock = Arc::new(|| {
            Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0)
                .single()
                .expect("valid timestamp")
        });
        AppState::new(metrics, database, RevalidationHub::new(), identity).with_clock(clock)
    }

    async fn seed_customer(state: &AppState) -> String {
        state
            .storage()
            .customers()
            .insert(&NewCustomer {
                name: "Ada",
                email: "ada@example.com",
                image_url: "/customers/placeholder.png",
            })
            .await
            .expect("seed customer")
    }

    fn form_post(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
        let body = serde_urlencoded::to_string(pairs).expect("encode form");
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    fn location(response: &Response) -> &str {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .expect("location header")
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (_dir, state) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let (_dir, state) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn create_invoice_redirects_and_revalidates() {
        let (_dir, state) = setup_state().await;
        let customer_id = seed_customer(&state).await;
        let hub = state.revalidation().clone();
        let storage = state.storage().clone();
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/dashboard/invoices",
                &[
                    ("customerId", customer_id.as_str()),
                    ("amount", "100"),
                    ("status", "pending"),
                ],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), INVOICES_PATH);
        assert_eq!(hub.generation(INVOICES_PATH), 1);

        let row: (i64, String) = sqlx::query_as("SELECT amount, date FROM invoices")
            .fetch_one(storage.pool())
            .await
            .expect("invoice row");
        assert_eq!(row, (10000, "2024-07-04".to_string()));
    }

    #[tokio::test]
    async fn invalid_invoice_returns_field_errors() {
        let (_dir, state) = setup_state().await;
        let hub = state.revalidation().clone();
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/dashboard/invoices",
                &[("customerId", "c1"), ("amount", "-5"), ("status", "overdue")],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json_body(response).await,
            json!({
                "errors": {
                    "amount": ["Please enter an amount greater than $0."],
                    "status": ["Please select an invoice status."],
                },
                "message": "Missing Fields. Failed to Create Invoice.",
            })
        );
        assert_eq!(hub.generation(INVOICES_PATH), 0);
    }

    #[tokio::test]
    async fn update_invoice_redirects_to_listing() {
        let (_dir, state) = setup_state().await;
        let customer_id = seed_customer(&state).await;
        let invoice_id = state
            .storage()
            .invoices()
            .insert(&NewInvoice {
                customer_id: &customer_id,
                amount_in_cents: 500,
                status: InvoiceStatus::Pending,
                date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            })
            .await
            .expect("seed invoice");
        let storage = state.storage().clone();
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                &format!("/dashboard/invoices/{invoice_id}/edit"),
                &[
                    ("customerId", customer_id.as_str()),
                    ("amount", "49.99"),
                    ("status", "paid"),
                ],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), INVOICES_PATH);
        let invoice = storage
            .invoices()
            .fetch_by_id(&invoice_id)
            .await
            .expect("fetch")
            .expect("exists");
        assert_eq!(invoice.amount, 4999);
        assert_eq!(invoice.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn update_customer_with_empty_name_is_rejected() {
        let (_dir, state) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/dashboard/customers/u1/edit",
                &[("name", ""), ("email", "a@b.com")],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            json_body(response).await,
            json!({
                "errors": { "name": ["Please enter the customer name."] },
                "message": "Missing Fields. Failed to Update Customer.",
            })
        );
    }

    #[tokio::test]
    async fn delete_returns_message_even_for_missing_ids() {
        let (_dir, state) = setup_state().await;
        let hub = state.revalidation().clone();
        let app = app_router(state);

        let response = app
            .clone()
            .oneshot(form_post("/dashboard/invoices/does-not-exist/delete", &[]))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "message": "Deleted Invoice." }));

        let response = app
            .oneshot(form_post("/dashboard/customers/does-not-exist/delete", &[]))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "message": "Deleted Customer." }));

        assert_eq!(hub.generation(INVOICES_PATH), 1);
        assert_eq!(hub.generation(CUSTOMERS_PATH), 1);
    }

    #[tokio::test]
    async fn create_customer_storage_failure_does_not_redirect() {
        let (_dir, state) = setup_state().await;
        state.storage().pool().close().await;
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/dashboard/customers",
                &[("name", "Grace"), ("email", "grace@example.com")],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(
            json_body(response).await,
            json!({ "message": "Database Error: Failed to Create Customer." })
        );
    }

    #[tokio::test]
    async fn create_customer_redirects_to_customers() {
        let (_dir, state) = setup_state().await;
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/dashboard/customers",
                &[("name", "Grace"), ("email", "grace@example.com")],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), CUSTOMERS_PATH);
    }

    #[tokio::test]
    async fn login_redirects_on_valid_credentials() {
        let (_dir, state) = setup_state().await;
        seed_user(state.storage()).await;
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/login",
                &[("email", USER_EMAIL), ("password", USER_PASSWORD)],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/dashboard");
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let (_dir, state) = setup_state().await;
        seed_user(state.storage()).await;
        let app = app_router(state);

        let response = app
            .oneshot(form_post(
                "/login",
                &[("email", USER_EMAIL), ("password", "not-the-password")],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({ "message": "Invalid credentials." }));
    }

    struct BrokenProvider;

    #[async_trait::async_trait]
    impl IdentityProvider for BrokenProvider {
        async fn sign_in(
            &self,
            _provider: &str,
            _credentials: &HashMap<String, String>,
        ) -> Result<String, SignInError> {
            Err(SignInError::Internal("provider crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn login_surfaces_unclassified_failures_as_problem() {
        let (_dir, database) = temp_database().await;
        let app = app_router(state_with_identity(database, Arc::new(BrokenProvider)));

        let response = app
            .oneshot(form_post(
                "/login",
                &[("email", USER_EMAIL), ("password", USER_PASSWORD)],
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "application/problem+json"
        );
        let body = json_body(response).await;
        assert_eq!(body["type"], "internal_error");
    }

    #[tokio::test]
    async fn customer_picker_lists_customers() {
        let (_dir, state) = setup_state().await;
        let customer_id = seed_customer(&state).await;
        let app = app_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/customers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!([{ "id": customer_id, "name": "Ada" }])
        );
    }

    #[tokio::test]
    async fn fetch_invoice_converts_cents_and_reports_missing() {
        let (_dir, state) = setup_state().await;
        let customer_id = seed_customer(&state).await;
        let invoice_id = state
            .storage()
            .invoices()
            .insert(&NewInvoice {
                customer_id: &customer_id,
                amount_in_cents: 4999,
                status: InvoiceStatus::Paid,
                date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date"),
            })
            .await
            .expect("seed invoice");
        let app = app_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/invoices/{invoice_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "id": invoice_id,
                "customer_id": customer_id,
                "amount": 49.99,
                "status": "paid",
            })
        );

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/invoices/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["instance"], "/api/invoices/missing");
    }

    #[tokio::test]
    async fn revalidation_stream_emits_events() {
        let (_dir, state) = setup_state().await;
        let hub = state.revalidation().clone();
        let app = app_router(state);

        let request = Request::builder()
            .uri("/_debug/revalidations?path=/dashboard/customers")
            .body(Body::empty())
            .unwrap();

        let publish = tokio::spawn(async move {
            time::sleep(Duration::from_millis(25)).await;
            hub.revalidate_path(CUSTOMERS_PATH);
        });

        let mut response = app.oneshot(request).await.expect("handler should respond");

        let frame = time::timeout(Duration::from_secs(1), response.body_mut().frame())
            .await
            .expect("stream produced chunk")
            .expect("chunk ok")
            .expect("chunk available");

        let data = match frame.into_data() {
            Ok(data) => data,
            Err(_) => panic!("expected data frame"),
        };
        let text = String::from_utf8(data.to_vec()).expect("utf-8");
        assert!(text.contains("event: revalidate"));
        assert!(text.contains("\"path\":\"/dashboard/customers\""));

        publish.await.expect("publish task");
    }
}
