//! REST API over the three tracker tables.
//!
//! Tables live in memory behind `AppState` and are written through to a
//! `LocalStore` (gzip files on disk in production) after every change.

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::backup::Workbook;
use crate::config::ServerConfig;
use crate::export::{ExportError, export_filename, to_csv, to_xlsx};
use crate::grid::GridStore;
use crate::import::{ImportError, from_csv_str, from_excel_bytes};
use crate::insights::{AnalyticsReport, coverage};
use crate::login::{
    AuthStatus, Credentials, LoginError, Role, SESSION_COOKIE, SessionStore, Theme, UserInfo,
    UserStore,
};
use crate::record::{RowRecord, rows_from_json, rows_to_json};
use crate::renewal::{
    AnalysisKind, PaymentRequest, RENEWAL_WINDOW_DAYS, RenewalError, RenewalLedger, RenewalRequest,
    analyze, expiring_contracts, find_contract,
};
use crate::schema::RowVariant;
use crate::storage::{FileStore, LocalStore, StorageError};

const RENEWALS_KEY: &str = "contractRenewals";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient permissions")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<LoginError> for ApiError {
    fn from(err: LoginError) -> Self {
        match err {
            LoginError::InvalidCredentials => ApiError::Unauthorized,
            LoginError::MissingFields | LoginError::UsernameTaken | LoginError::EmailTaken => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RenewalError> for ApiError {
    fn from(err: RenewalError) -> Self {
        match err {
            RenewalError::NotPending { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::NotFound(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Io(e) => ApiError::Internal(e.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Shared server state: tables, renewal ledger, accounts and sessions.
pub struct AppState {
    store: Arc<dyn LocalStore>,
    tables: RwLock<Workbook>,
    renewals: Mutex<RenewalLedger>,
    pub users: UserStore,
    pub sessions: SessionStore,
}

impl AppState {
    /// Load every table and the renewal ledger from `store`.
    pub fn open(
        store: Arc<dyn LocalStore>,
        users: UserStore,
        session_lifetime: Duration,
    ) -> Result<Self, ApiError> {
        let mut tables = Workbook::default();
        for variant in RowVariant::ALL {
            if let Some(raw) = store.get(variant.schema().storage_key)? {
                let value: Value = serde_json::from_str(&raw)?;
                let rows = GridStore::from_rows(variant, rows_from_json(variant, &value)).into_rows();
                *tables.table_mut(variant) = rows;
            }
        }
        let renewals = match store.get(RENEWALS_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => RenewalLedger::new(),
        };
        info!(rows = tables.row_count(), "tables loaded");

        Ok(AppState {
            store,
            tables: RwLock::new(tables),
            renewals: Mutex::new(renewals),
            users,
            sessions: SessionStore::new(session_lifetime),
        })
    }

    pub fn rows(&self, variant: RowVariant) -> Vec<RowRecord> {
        self.read_tables().table(variant).to_vec()
    }

    pub fn workbook(&self) -> Workbook {
        self.read_tables().clone()
    }

    /// Swap a whole table, renumbering it, and write it through to the store.
    pub fn replace_rows(&self, variant: RowVariant, rows: Vec<RowRecord>) -> Result<usize, ApiError> {
        let rows = GridStore::from_rows(variant, rows).into_rows();
        let payload = serde_json::to_string(&rows_to_json(&rows))?;
        let count = rows.len();

        let mut tables = self.write_tables();
        self.store.set(variant.schema().storage_key, &payload)?;
        *tables.table_mut(variant) = rows;
        Ok(count)
    }

    fn save_renewals(&self, ledger: &RenewalLedger) -> Result<(), ApiError> {
        let payload = serde_json::to_string(ledger)?;
        self.store.set(RENEWALS_KEY, &payload)?;
        Ok(())
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, RenewalLedger> {
        self.renewals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_tables(&self) -> std::sync::RwLockReadGuard<'_, Workbook> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_tables(&self) -> std::sync::RwLockWriteGuard<'_, Workbook> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_user(&self, jar: &CookieJar) -> Result<UserInfo, ApiError> {
        let id = jar.get(SESSION_COOKIE).ok_or(ApiError::Unauthorized)?;
        let username = self.sessions.validate(id.value()).ok_or(ApiError::Unauthorized)?;
        self.users.get(&username).ok_or(ApiError::Unauthorized)
    }

    fn require_editor(&self, jar: &CookieJar) -> Result<UserInfo, ApiError> {
        let user = self.current_user(jar)?;
        if user.role.can_edit() {
            Ok(user)
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/check-auth", get(check_auth))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/user/theme", put(update_theme))
        .route("/api/analytics/report", get(analytics_report))
        .route("/api/export/:table/:format", get(export_table))
        .route("/api/excel-upload/:table", post(upload_table))
        .route("/api/contract-renewal/expiring", get(expiring))
        .route("/api/contract-renewal/analyze", post(analyze_contract))
        .route("/api/contract-renewal/process-renewal", post(process_renewal))
        .route("/api/contract-renewal/process-payment", post(process_payment))
        .route("/api/contract-renewal/confirm", post(confirm_renewal))
        .route("/api/:table", get(get_table).post(save_table))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Build the state from `config` and serve until the process is stopped.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let store = FileStore::open(config.tables_dir())?;
    let users = UserStore::open(config.users_file())?;

    if users.is_empty() {
        if let (Some(name), Some(password)) = (&config.admin_user, &config.admin_password) {
            users.register_user(name, &format!("{}@localhost", name), password, Role::Admin)?;
            info!(username = %name, "created initial admin account");
        } else {
            warn!("no users exist; set TRACKER_ADMIN_USER and TRACKER_ADMIN_PASSWORD to create one");
        }
    }

    let state = Arc::new(
        AppState::open(Arc::new(store), users, config.session_lifetime())
            .map_err(|e| anyhow::anyhow!("failed to load tables: {}", e))?,
    );
    let app = router(state);

    let listener = TcpListener::bind(config.bind).await?;
    info!("listening on http://{}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_table(table: &str) -> Result<RowVariant, ApiError> {
    RowVariant::from_slug(table).ok_or_else(|| ApiError::NotFound(format!("unknown table '{}'", table)))
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn check_auth(State(state): State<Arc<AppState>>, jar: CookieJar) -> Json<AuthStatus> {
    let user = state.current_user(&jar).ok();
    Json(AuthStatus {
        authenticated: user.is_some(),
        user,
    })
}

async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(credentials): Json<Credentials>,
) -> Result<(CookieJar, Json<AuthStatus>), ApiError> {
    let user = state.users.verify(&credentials.username, &credentials.password)?;
    let session_id = state.sessions.create(&user.username);
    info!(username = %user.username, "login");

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true);
    Ok((
        jar.add(cookie),
        Json(AuthStatus {
            authenticated: true,
            user: Some(user),
        }),
    ))
}

async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Json<Value>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.destroy(cookie.value());
    }
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(json!({ "success": true })),
    )
}

#[derive(Deserialize)]
struct ThemeUpdate {
    theme: Theme,
}

async fn update_theme(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(update): Json<ThemeUpdate>,
) -> Result<Json<UserInfo>, ApiError> {
    let user = state.current_user(&jar)?;
    Ok(Json(state.users.set_theme(&user.username, update.theme)?))
}

async fn get_table(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(table): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let variant = parse_table(&table)?;
    state.current_user(&jar)?;
    Ok(Json(rows_to_json(&state.rows(variant))))
}

#[derive(Deserialize)]
struct SaveTable {
    records: Vec<Value>,
}

async fn save_table(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(table): Path<String>,
    Json(body): Json<SaveTable>,
) -> Result<Json<Value>, ApiError> {
    let variant = parse_table(&table)?;
    let user = state.require_editor(&jar)?;
    let rows = rows_from_json(variant, &Value::Array(body.records));
    let count = state.replace_rows(variant, rows)?;
    info!(table = %variant, rows = count, username = %user.username, "table saved");
    Ok(Json(json!({ "success": true, "count": count })))
}

async fn export_table(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path((table, format)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let variant = parse_table(&table)?;
    state.current_user(&jar)?;
    let rows = state.rows(variant);

    let (content_type, body) = match format.as_str() {
        "csv" => ("text/csv; charset=utf-8", to_csv(variant, &rows).into_bytes()),
        "xlsx" => (
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            to_xlsx(variant, &rows)?,
        ),
        other => return Err(ApiError::BadRequest(format!("unsupported export format '{}'", other))),
    };

    let disposition = format!("attachment; filename=\"{}\"", export_filename(variant, &format));
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn upload_table(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(table): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let variant = parse_table(&table)?;
    state.require_editor(&jar)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.xlsx").to_lowercase();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            upload = Some((filename, bytes));
        }
    }
    let (filename, bytes) = upload.ok_or_else(|| ApiError::BadRequest("no file uploaded".to_string()))?;

    let report = if filename.ends_with(".csv") {
        let text = String::from_utf8_lossy(&bytes);
        from_csv_str(variant, &text)?
    } else {
        from_excel_bytes(variant, &bytes)?
    };

    let mut rows = state.rows(variant);
    let imported = report.rows.len();
    rows.extend(report.rows);
    let count = state.replace_rows(variant, rows)?;
    info!(table = %variant, imported, skipped = report.skipped, "upload imported");

    Ok(Json(json!({
        "success": true,
        "imported": imported,
        "skipped": report.skipped,
        "unmapped_columns": report.unmapped_columns,
        "count": count,
    })))
}

async fn analytics_report(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<Json<AnalyticsReport>, ApiError> {
    state.current_user(&jar)?;
    let now = chrono::Local::now().naive_local();
    Ok(Json(AnalyticsReport::build(&state.workbook(), now)))
}

async fn expiring(State(state): State<Arc<AppState>>, jar: CookieJar) -> Result<Json<Value>, ApiError> {
    state.current_user(&jar)?;
    let workbook = state.workbook();
    let contracts = expiring_contracts(&workbook.contractors, &workbook.bills, today(), RENEWAL_WINDOW_DAYS);
    Ok(Json(serde_json::to_value(contracts)?))
}

#[derive(Deserialize)]
struct AnalyzeBody {
    contract_id: u32,
    analysis_type: AnalysisKind,
}

async fn analyze_contract(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<Value>, ApiError> {
    state.current_user(&jar)?;
    let workbook = state.workbook();
    let contract = find_contract(&workbook.contractors, &workbook.bills, body.contract_id)
        .ok_or(RenewalError::ContractNotFound(body.contract_id))?;
    let covered = coverage(&contract.contractor_name, contract.value, &workbook.epbg);
    let analysis = analyze(&contract, body.analysis_type, today(), covered);
    Ok(Json(serde_json::to_value(analysis)?))
}

async fn process_renewal(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<RenewalRequest>,
) -> Result<Json<Value>, ApiError> {
    state.require_editor(&jar)?;
    let workbook = state.workbook();
    let contract = find_contract(&workbook.contractors, &workbook.bills, request.contract_id)
        .ok_or(RenewalError::ContractNotFound(request.contract_id))?;

    let mut ledger = state.ledger();
    let renewal = ledger.process_renewal(&contract, &request);
    state.save_renewals(&ledger)?;
    info!(renewal = renewal.id, contract = contract.id, action = ?renewal.user_action, "renewal recorded");
    Ok(Json(serde_json::to_value(renewal)?))
}

async fn process_payment(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    state.require_editor(&jar)?;
    let mut ledger = state.ledger();
    let receipt = ledger.process_payment(&request, chrono::Local::now().naive_local());
    state.save_renewals(&ledger)?;
    Ok(Json(serde_json::to_value(receipt)?))
}

#[derive(Deserialize)]
struct ConfirmBody {
    renewal_id: u64,
}

/// Confirming a renewal also moves the contract's expiry to the new end date.
async fn confirm_renewal(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<Value>, ApiError> {
    state.require_editor(&jar)?;
    let renewal = {
        let mut ledger = state.ledger();
        let renewal = ledger.confirm(body.renewal_id)?.clone();
        state.save_renewals(&ledger)?;
        renewal
    };

    if let Some(new_end) = renewal.new_end_date {
        let variant = renewal.source;
        let mut rows = state.rows(variant);
        if let (Some(row), Some(field)) = (
            rows.iter_mut().find(|r| r.sno == renewal.contract_id),
            variant.schema().expiry_field,
        ) {
            row.set(field, new_end.format("%Y-%m-%d").to_string());
            state.replace_rows(variant, rows)?;
        }
    }

    Ok(Json(serde_json::to_value(renewal)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let users = UserStore::open(dir.path().join("users.json")).unwrap();
        let state = AppState::open(Arc::new(MemoryStore::new()), users, Duration::from_secs(60)).unwrap();
        (dir, state)
    }

    #[test]
    fn replace_rows_renumbers_and_persists() {
        let (_dir, state) = state();
        let mut row = RowRecord::from_pairs(RowVariant::Epbg, [("contractor", "Acme")]);
        row.sno = 9;
        assert_eq!(state.replace_rows(RowVariant::Epbg, vec![row]).unwrap(), 1);
        assert_eq!(state.rows(RowVariant::Epbg)[0].sno, 1);
        assert!(state.store.get("epbgData").unwrap().is_some());
    }

    #[test]
    fn error_statuses() {
        assert_eq!(ApiError::from(LoginError::InvalidCredentials).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(RenewalError::ContractNotFound(3)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
    }
}
