use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseBackend, Set, Statement};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use kioskops_api::{
    config::AppConfig,
    db,
    entities::{branch, corporation, lease_company, partner},
    events::{self, EventSender},
    handlers::AppServices,
    services::calendar::{CalendarSync, NoopCalendar},
    AppState,
};

/// Test harness backed by an in-memory SQLite database. A single pooled
/// connection keeps the `:memory:` database alive across requests.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE partners (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE corporations (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        localized_name TEXT,
        franchise_name TEXT,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE branches (
        id TEXT PRIMARY KEY NOT NULL,
        corporation_id TEXT,
        name TEXT NOT NULL,
        localized_name TEXT,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE lease_companies (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        localized_name TEXT,
        created_at TEXT NOT NULL
    );"#,
    r#"CREATE TABLE kiosk_orders (
        id TEXT PRIMARY KEY NOT NULL,
        process_number TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        requester_name TEXT,
        partner_id TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        current_step INTEGER NOT NULL,
        status TEXT NOT NULL,
        acquisition_mode TEXT NOT NULL,
        lease_company_id TEXT,
        lease_monthly_fee REAL,
        lease_period_months INTEGER,
        step1_completed_at TEXT,
        step1_completed_by TEXT,
        document_url TEXT,
        document_number TEXT,
        step2_completed_at TEXT,
        step2_completed_by TEXT,
        approval_request_id TEXT,
        approval_title TEXT,
        step3_completed_at TEXT,
        step3_completed_by TEXT,
        approval_status TEXT,
        approval_date TEXT,
        approval_comment TEXT,
        step4_completed_at TEXT,
        step4_completed_by TEXT,
        vendor_order_sent INTEGER NOT NULL,
        vendor_email TEXT,
        notify_slack INTEGER NOT NULL,
        notify_email INTEGER NOT NULL,
        step5_completed_at TEXT,
        step5_completed_by TEXT,
        ledger TEXT NOT NULL,
        desired_delivery_date TEXT,
        due_date TEXT,
        calendar_event_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT,
        version INTEGER NOT NULL
    );"#,
    r#"CREATE TABLE kiosk_assets (
        id TEXT PRIMARY KEY NOT NULL,
        serial TEXT NOT NULL UNIQUE,
        branch_id TEXT,
        memo TEXT NOT NULL,
        created_at TEXT NOT NULL
    );"#,
];

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_calendar(Arc::new(NoopCalendar)).await
    }

    /// Same, but with a caller-supplied calendar collaborator so tests can
    /// observe or fail the sync calls.
    pub async fn with_calendar(calendar: Arc<dyn CalendarSync>) -> Self {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: "debug".to_string(),
            log_json: false,
            db_max_connections: 1,
            db_min_connections: 1,
            db_sqlx_logging: false,
            calendar_base_url: None,
            calendar_timeout_secs: 1,
        };

        let pool = db::establish_connection(&cfg)
            .await
            .expect("failed to create test database");

        for sql in SCHEMA {
            pool.execute(Statement::from_string(
                DatabaseBackend::Sqlite,
                sql.to_string(),
            ))
            .await
            .expect("failed to create test schema");
        }

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(db_arc.clone(), event_sender.clone(), calendar);
        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", kioskops_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Issues a request against the in-process router and returns the status
    /// plus the decoded JSON body (Null for empty bodies).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body was not valid JSON")
        };
        (status, json)
    }

    pub async fn seed_partner(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        partner::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed partner");
        id
    }

    pub async fn seed_corporation(
        &self,
        name: &str,
        localized_name: Option<&str>,
        franchise_name: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        corporation::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            localized_name: Set(localized_name.map(str::to_string)),
            franchise_name: Set(franchise_name.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed corporation");
        id
    }

    pub async fn seed_branch(
        &self,
        corporation_id: Option<Uuid>,
        name: &str,
        localized_name: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        branch::ActiveModel {
            id: Set(id),
            corporation_id: Set(corporation_id),
            name: Set(name.to_string()),
            localized_name: Set(localized_name.map(str::to_string)),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed branch");
        id
    }

    pub async fn seed_lease_company(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        lease_company::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            localized_name: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed lease company");
        id
    }
}
