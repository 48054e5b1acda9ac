//! HTTP API for the escrow engine.
//!
//! Amounts cross this boundary as decimal XLM strings; everything beneath
//! it is integer stroops. Authentication is a bearer session token from
//! `/api/auth/login`; the middleware resolves it and hands the session to
//! handlers through request extensions.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Extension, Json, Router,
};
use cotravel_common::{
    format_xlm, parse_xlm, Contribution, Error, Invoice, LineItem, Modification, Result, Session,
    TxRecord,
};
use cotravel_engine::business::BusinessDetails;
use cotravel_engine::lifecycle::NewInvoice;
use cotravel_engine::withdrawal::WithdrawalOutcome;
use cotravel_engine::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct ChallengeRequest {
    wallet: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    wallet: String,
    signature: String,
}

#[derive(Serialize)]
struct SessionResponse {
    token: String,
    wallet: String,
    role: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct LineItemRequest {
    description: String,
    /// Decimal XLM
    amount: String,
    recipient_wallet: String,
}

#[derive(Deserialize)]
struct CreateInvoiceRequest {
    name: String,
    description: Option<String>,
    deadline: i64,
    penalty_percent: u32,
    #[serde(default)]
    auto_release: bool,
    items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
struct LinkRequest {
    contract_invoice_id: i64,
    transaction_xdr: String,
}

#[derive(Deserialize)]
struct ContributeRequest {
    /// Decimal XLM
    amount: String,
    transaction_xdr: String,
}

#[derive(Deserialize)]
struct TxRequest {
    transaction_xdr: String,
}

#[derive(Deserialize)]
struct CancelRequest {
    transaction_xdr: Option<String>,
}

#[derive(Deserialize)]
struct ProposeRequest {
    summary: String,
    items: Vec<LineItemRequest>,
}

#[derive(Deserialize)]
struct RoleRequest {
    role: String,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

impl PageQuery {
    fn offset_limit(&self) -> (u32, u32) {
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        let page = self.page.unwrap_or(1).max(1);
        ((page - 1).saturating_mul(limit), limit)
    }
}

#[derive(Serialize)]
struct LineItemView {
    description: String,
    amount: String,
    recipient_wallet: String,
}

#[derive(Serialize)]
struct InvoiceView {
    id: String,
    organizer_wallet: String,
    name: String,
    description: Option<String>,
    deadline: i64,
    penalty_percent: u32,
    auto_release: bool,
    status: String,
    total_required: String,
    total_collected: String,
    remaining: String,
    version: i64,
    contract_invoice_id: Option<i64>,
    created_at: i64,
    items: Vec<LineItemView>,
}

impl From<Invoice> for InvoiceView {
    fn from(invoice: Invoice) -> Self {
        Self {
            remaining: format_xlm(invoice.remaining()),
            id: invoice.id,
            organizer_wallet: invoice.organizer_wallet,
            name: invoice.name,
            description: invoice.description,
            deadline: invoice.deadline,
            penalty_percent: invoice.penalty_percent,
            auto_release: invoice.auto_release,
            status: invoice.status.to_string(),
            total_required: format_xlm(invoice.total_required),
            total_collected: format_xlm(invoice.total_collected),
            version: invoice.version,
            contract_invoice_id: invoice.contract_invoice_id,
            created_at: invoice.created_at,
            items: invoice
                .items
                .into_iter()
                .map(|item| LineItemView {
                    description: item.description,
                    amount: format_xlm(item.amount),
                    recipient_wallet: item.recipient_wallet,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct ContributionView {
    participant_wallet: String,
    amount: String,
    status: String,
    updated_at: i64,
}

impl From<Contribution> for ContributionView {
    fn from(c: Contribution) -> Self {
        Self {
            participant_wallet: c.participant_wallet,
            amount: format_xlm(c.amount),
            status: c.status.to_string(),
            updated_at: c.updated_at,
        }
    }
}

#[derive(Serialize)]
struct WithdrawalView {
    invoice_id: String,
    withdrawn: String,
    penalty: String,
    refunded: String,
}

impl From<WithdrawalOutcome> for WithdrawalView {
    fn from(o: WithdrawalOutcome) -> Self {
        Self {
            invoice_id: o.invoice_id,
            withdrawn: format_xlm(o.withdrawn),
            penalty: format_xlm(o.penalty),
            refunded: format_xlm(o.refunded),
        }
    }
}

#[derive(Serialize)]
struct ModificationView {
    id: String,
    invoice_id: String,
    version: i64,
    summary: String,
    items: Vec<LineItemView>,
    consented: Vec<String>,
    created_at: i64,
}

impl From<Modification> for ModificationView {
    fn from(m: Modification) -> Self {
        Self {
            id: m.id,
            invoice_id: m.invoice_id,
            version: m.version,
            summary: m.summary,
            items: m
                .items
                .into_iter()
                .map(|item| LineItemView {
                    description: item.description,
                    amount: format_xlm(item.amount),
                    recipient_wallet: item.recipient_wallet,
                })
                .collect(),
            consented: m.consented,
            created_at: m.created_at,
        }
    }
}

#[derive(Serialize)]
struct TxView {
    hash: String,
    wallet: String,
    kind: String,
    amount: String,
    ledger: Option<u32>,
    status: String,
    created_at: i64,
}

impl From<TxRecord> for TxView {
    fn from(tx: TxRecord) -> Self {
        Self {
            hash: tx.hash,
            wallet: tx.wallet,
            kind: tx.kind.to_string(),
            amount: format_xlm(tx.amount),
            ledger: tx.ledger,
            status: tx.status.to_string(),
            created_at: tx.created_at,
        }
    }
}

fn parse_items(items: Vec<LineItemRequest>) -> Result<Vec<LineItem>> {
    items
        .into_iter()
        .map(|item| {
            Ok(LineItem {
                description: item.description,
                amount: parse_xlm(&item.amount)?,
                recipient_wallet: item.recipient_wallet,
            })
        })
        .collect()
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Authorization(_) => StatusCode::FORBIDDEN,
        Error::Validation(_) | Error::Funding(_) => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyExists { .. } | Error::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        Error::Chain(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn err(e: Error) -> Response {
    (status_for(&e), Json(json!({"error": e.to_string()}))).into_response()
}

// ============================================================================
// Router
// ============================================================================

pub fn router(engine: Arc<Engine>) -> Router {
    let auth_state = engine.clone();
    let auth_layer = middleware::from_fn(move |req, next| {
        let engine = auth_state.clone();
        async move { auth_middleware_inner(engine, req, next).await }
    });

    let protected_routes = Router::new()
        // Session
        .route("/api/auth/me", get(me_handler))
        .route("/api/auth/disconnect", post(disconnect_handler))
        // Invoices
        .route("/api/invoices", get(list_invoices_handler).post(create_invoice_handler))
        .route("/api/invoices/mine", get(my_invoices_handler))
        .route("/api/invoices/:invoice_id", get(get_invoice_handler))
        .route("/api/invoices/:invoice_id/link", post(link_handler))
        .route("/api/invoices/:invoice_id/release", post(release_handler))
        .route("/api/invoices/:invoice_id/cancel", post(cancel_handler))
        // Funding
        .route("/api/invoices/:invoice_id/contribute", post(contribute_handler))
        .route("/api/invoices/:invoice_id/withdraw", post(withdraw_handler))
        .route("/api/invoices/:invoice_id/withdraw/quote", get(withdraw_quote_handler))
        .route("/api/invoices/:invoice_id/participants", get(participants_handler))
        .route("/api/invoices/:invoice_id/transactions", get(transactions_handler))
        .route("/api/invoices/:invoice_id/events", get(events_handler))
        // Modifications and re-consent
        .route(
            "/api/invoices/:invoice_id/modifications",
            get(get_modification_handler).post(propose_modification_handler),
        )
        .route("/api/invoices/:invoice_id/modifications/consent", post(consent_handler))
        .route("/api/invoices/:invoice_id/modifications/apply", post(apply_modification_handler))
        .route(
            "/api/invoices/:invoice_id/modifications/retract",
            post(retract_modification_handler),
        )
        .route("/api/invoices/:invoice_id/modifications/opt-out", post(opt_out_handler))
        // Business directory (reads pass the auth layer unauthenticated)
        .route(
            "/api/businesses",
            get(list_businesses_handler).post(create_business_handler),
        )
        .route(
            "/api/businesses/:business_id",
            get(get_business_handler)
                .put(update_business_handler)
                .delete(delete_business_handler),
        )
        // Admin
        .route("/api/admin/users", get(admin_users_handler))
        .route("/api/admin/users/:wallet/role", put(admin_role_handler))
        .route("/api/admin/stats", get(admin_stats_handler))
        .layer(auth_layer)
        .with_state(engine.clone());

    // Public routes (no auth required)
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/challenge", post(challenge_handler))
        .route("/api/auth/login", post(login_handler))
        .merge(protected_routes)
        .fallback(not_found_handler)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Start the API server
pub async fn serve(addr: SocketAddr, engine: Engine) -> anyhow::Result<()> {
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(Arc::new(engine))).await?;

    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

const PUBLIC_PATHS: &[&str] = &["/api/health", "/api/auth/challenge", "/api/auth/login"];

async fn auth_middleware_inner(
    engine: Arc<Engine>,
    mut req: Request,
    next: middleware::Next,
) -> Response {
    let path = req.uri().path();
    let is_public = PUBLIC_PATHS.contains(&path)
        || (path.starts_with("/api/businesses") && req.method() == axum::http::Method::GET);
    if is_public {
        return next.run(req).await;
    }

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth_header.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing bearer token"})),
        )
            .into_response();
    }

    match engine.auth.authenticate(token) {
        Ok(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(e) => err(e),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": cotravel_common::VERSION,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

async fn challenge_handler(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ChallengeRequest>,
) -> Response {
    match engine.auth.issue_challenge(&req.wallet) {
        Ok(message) => Json(json!({"message": message})).into_response(),
        Err(e) => err(e),
    }
}

async fn login_handler(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    match engine.auth.login(&req.wallet, &req.signature) {
        Ok(session) => Json(SessionResponse {
            token: session.token,
            wallet: session.wallet_address,
            role: session.role.to_string(),
            expires_at: session.expires_at,
        })
        .into_response(),
        Err(e) => err(e),
    }
}

async fn me_handler(Extension(session): Extension<Session>) -> Response {
    Json(json!({
        "wallet": session.wallet_address,
        "role": session.role.to_string(),
        "expires_at": session.expires_at,
    }))
    .into_response()
}

async fn disconnect_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
) -> Response {
    match engine.auth.disconnect(&session.token) {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => err(e),
    }
}

async fn create_invoice_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Json(req): Json<CreateInvoiceRequest>,
) -> Response {
    let items = match parse_items(req.items) {
        Ok(items) => items,
        Err(e) => return err(e),
    };
    let new = NewInvoice {
        name: req.name,
        description: req.description,
        deadline: req.deadline,
        penalty_percent: req.penalty_percent,
        auto_release: req.auto_release,
        items,
    };
    match engine.invoices.create(&session, new) {
        Ok(invoice) => (StatusCode::CREATED, Json(InvoiceView::from(invoice))).into_response(),
        Err(e) => err(e),
    }
}

async fn list_invoices_handler(
    State(engine): State<Arc<Engine>>,
    Query(page): Query<PageQuery>,
) -> Response {
    let (offset, limit) = page.offset_limit();
    match engine.invoices.list(offset, limit) {
        Ok(invoices) => Json(
            invoices
                .into_iter()
                .map(InvoiceView::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => err(e),
    }
}

async fn my_invoices_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
) -> Response {
    match engine.invoices.list_for_wallet(&session.wallet_address) {
        Ok(invoices) => Json(
            invoices
                .into_iter()
                .map(InvoiceView::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => err(e),
    }
}

async fn get_invoice_handler(
    State(engine): State<Arc<Engine>>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.invoices.get(&invoice_id) {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn link_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<LinkRequest>,
) -> Response {
    match engine
        .invoices
        .link_on_chain(&session, &invoice_id, req.contract_invoice_id, &req.transaction_xdr)
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn release_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<TxRequest>,
) -> Response {
    match engine
        .invoices
        .release(&session, &invoice_id, &req.transaction_xdr)
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn cancel_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Response {
    match engine
        .cancellations
        .cancel(&session, &invoice_id, req.transaction_xdr.as_deref())
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn contribute_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<ContributeRequest>,
) -> Response {
    let amount = match parse_xlm(&req.amount) {
        Ok(amount) => amount,
        Err(e) => return err(e),
    };
    match engine
        .ledger
        .contribute(&session, &invoice_id, amount, &req.transaction_xdr)
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn withdraw_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<TxRequest>,
) -> Response {
    match engine
        .withdrawals
        .withdraw(&session, &invoice_id, &req.transaction_xdr)
        .await
    {
        Ok(outcome) => Json(WithdrawalView::from(outcome)).into_response(),
        Err(e) => err(e),
    }
}

async fn withdraw_quote_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.withdrawals.quote(&invoice_id, &session.wallet_address) {
        Ok(outcome) => Json(WithdrawalView::from(outcome)).into_response(),
        Err(e) => err(e),
    }
}

async fn participants_handler(
    State(engine): State<Arc<Engine>>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.ledger.participants(&invoice_id) {
        Ok(contributions) => Json(
            contributions
                .into_iter()
                .map(ContributionView::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => err(e),
    }
}

async fn transactions_handler(
    State(engine): State<Arc<Engine>>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.state.db().list_txs_for_invoice(&invoice_id) {
        Ok(txs) => Json(txs.into_iter().map(TxView::from).collect::<Vec<_>>()).into_response(),
        Err(e) => err(e),
    }
}

/// Server-sent funding-progress events for one invoice
async fn events_handler(
    State(engine): State<Arc<Engine>>,
    Path(invoice_id): Path<String>,
) -> Response {
    if let Err(e) = engine.invoices.get(&invoice_id) {
        return err(e);
    }
    let rx = engine.state.subscribe_progress();

    let stream = futures::stream::unfold((rx, invoice_id), |(mut rx, invoice_id)| async move {
        loop {
            match rx.recv().await {
                Ok(progress) if progress.invoice_id == invoice_id => {
                    let event = Event::default()
                        .json_data(&json!({
                            "invoice_id": progress.invoice_id,
                            "total_required": format_xlm(progress.total_required),
                            "total_collected": format_xlm(progress.total_collected),
                            "status": progress.status.to_string(),
                        }))
                        .unwrap_or_default();
                    return Some((Ok::<_, Infallible>(event), (rx, invoice_id)));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn propose_modification_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<ProposeRequest>,
) -> Response {
    let items = match parse_items(req.items) {
        Ok(items) => items,
        Err(e) => return err(e),
    };
    match engine
        .modifications
        .propose(&session, &invoice_id, req.summary, items)
        .await
    {
        Ok(m) => (StatusCode::CREATED, Json(ModificationView::from(m))).into_response(),
        Err(e) => err(e),
    }
}

async fn get_modification_handler(
    State(engine): State<Arc<Engine>>,
    Path(invoice_id): Path<String>,
) -> Response {
    let open = engine
        .state
        .db()
        .open_modification_for_invoice(&invoice_id)
        .and_then(|id| match id {
            Some(id) => engine.state.db().get_modification(&id),
            None => Ok(None),
        });
    match open {
        Ok(Some(m)) => Json(ModificationView::from(m)).into_response(),
        Ok(None) => err(Error::NotFound {
            kind: "modification".to_string(),
            id: invoice_id,
        }),
        Err(e) => err(e),
    }
}

async fn consent_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.modifications.consent(&session, &invoice_id).await {
        Ok(m) => Json(ModificationView::from(m)).into_response(),
        Err(e) => err(e),
    }
}

async fn apply_modification_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<TxRequest>,
) -> Response {
    match engine
        .modifications
        .apply(&session, &invoice_id, &req.transaction_xdr)
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn retract_modification_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
) -> Response {
    match engine.modifications.retract(&session, &invoice_id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => err(e),
    }
}

async fn opt_out_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(invoice_id): Path<String>,
    Json(req): Json<TxRequest>,
) -> Response {
    match engine
        .modifications
        .opt_out(&session, &invoice_id, &req.transaction_xdr)
        .await
    {
        Ok(invoice) => Json(InvoiceView::from(invoice)).into_response(),
        Err(e) => err(e),
    }
}

async fn create_business_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Json(details): Json<BusinessDetails>,
) -> Response {
    match engine.businesses.create(&session, details) {
        Ok(business) => (StatusCode::CREATED, Json(business)).into_response(),
        Err(e) => err(e),
    }
}

async fn list_businesses_handler(
    State(engine): State<Arc<Engine>>,
    Query(page): Query<PageQuery>,
) -> Response {
    let (offset, limit) = page.offset_limit();
    match engine.businesses.list(offset, limit) {
        Ok(page) => Json(page).into_response(),
        Err(e) => err(e),
    }
}

async fn get_business_handler(
    State(engine): State<Arc<Engine>>,
    Path(business_id): Path<String>,
) -> Response {
    match engine.businesses.get(&business_id) {
        Ok(business) => Json(business).into_response(),
        Err(e) => err(e),
    }
}

async fn update_business_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(business_id): Path<String>,
    Json(details): Json<BusinessDetails>,
) -> Response {
    match engine.businesses.update(&session, &business_id, details) {
        Ok(business) => Json(business).into_response(),
        Err(e) => err(e),
    }
}

async fn delete_business_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(business_id): Path<String>,
) -> Response {
    match engine.businesses.delete(&session, &business_id) {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => err(e),
    }
}

async fn admin_users_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Query(page): Query<PageQuery>,
) -> Response {
    let (offset, limit) = page.offset_limit();
    match engine.admin.list_users(&session, offset, limit) {
        Ok(users) => Json(users).into_response(),
        Err(e) => err(e),
    }
}

async fn admin_role_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
    Path(wallet): Path<String>,
    Json(req): Json<RoleRequest>,
) -> Response {
    let role = match req.role.parse() {
        Ok(role) => role,
        Err(_) => return err(Error::Validation(format!("unknown role: {}", req.role))),
    };
    match engine.admin.set_role(&session, &wallet, role) {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => err(e),
    }
}

async fn admin_stats_handler(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<Session>,
) -> Response {
    match engine.admin.stats(&session) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cotravel_common::crypto::WalletKeyPair;
    use cotravel_common::{Database, InvoiceStatus, Role};
    use cotravel_engine::chain::MockChain;
    use cotravel_engine::{EngineConfig, StateManager};
    use tower::ServiceExt;

    fn test_engine() -> (Arc<Engine>, Arc<MockChain>) {
        let db = Database::open_memory().unwrap();
        let chain = Arc::new(MockChain::new());
        let state = StateManager::with_parts(EngineConfig::default(), db, chain.clone());
        (Arc::new(Engine::new(state)), chain)
    }

    async fn request(
        app: &Router,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(axum::body::Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn login(app: &Router, kp: &WalletKeyPair) -> String {
        let wallet = kp.account_id();
        let (status, body) = request(
            app,
            "POST",
            "/api/auth/challenge",
            None,
            Some(json!({"wallet": wallet})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let message = body["message"].as_str().unwrap().to_string();

        let (status, body) = request(
            app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"wallet": wallet, "signature": kp.sign_message(&message)})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (engine, _) = test_engine();
        let app = router(engine);
        let (status, body) = request(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let (engine, _) = test_engine();
        let app = router(engine);
        let (status, body) = request(&app, "GET", "/api/invoices", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing bearer token");

        let (status, _) = request(&app, "GET", "/api/invoices", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invoice_flow_over_http() {
        let (engine, chain) = test_engine();
        let app = router(engine);
        let organizer_kp = WalletKeyPair::generate();
        let contributor_kp = WalletKeyPair::generate();
        let org_token = login(&app, &organizer_kp).await;
        let contrib_token = login(&app, &contributor_kp).await;
        chain.set_balance(&contributor_kp.account_id(), parse_xlm("2000").unwrap());

        let deadline = chrono::Utc::now().timestamp() + 86_400;
        let (status, invoice) = request(
            &app,
            "POST",
            "/api/invoices",
            Some(&org_token),
            Some(json!({
                "name": "Bali trip",
                "deadline": deadline,
                "penalty_percent": 15,
                "items": [{
                    "description": "villa",
                    "amount": "1000",
                    "recipient_wallet": WalletKeyPair::generate().account_id(),
                }],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invoice["status"], "draft");
        assert_eq!(invoice["total_required"], "1000");
        let id = invoice["id"].as_str().unwrap().to_string();

        let (status, invoice) = request(
            &app,
            "POST",
            &format!("/api/invoices/{}/link", id),
            Some(&org_token),
            Some(json!({"contract_invoice_id": 1, "transaction_xdr": "xdr"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(invoice["status"], "funding");

        let (status, invoice) = request(
            &app,
            "POST",
            &format!("/api/invoices/{}/contribute", id),
            Some(&contrib_token),
            Some(json!({"amount": "350", "transaction_xdr": "xdr"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(invoice["total_collected"], "350");
        assert_eq!(invoice["remaining"], "650");

        let (status, outcome) = request(
            &app,
            "POST",
            &format!("/api/invoices/{}/withdraw", id),
            Some(&contrib_token),
            Some(json!({"transaction_xdr": "xdr"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["refunded"], "297.5");
        assert_eq!(outcome["penalty"], "52.5");
    }

    #[tokio::test]
    async fn test_overfund_maps_to_bad_request() {
        let (engine, chain) = test_engine();
        let app = router(engine);
        let organizer_kp = WalletKeyPair::generate();
        let org_token = login(&app, &organizer_kp).await;
        chain.set_balance(&organizer_kp.account_id(), parse_xlm("5000").unwrap());

        let deadline = chrono::Utc::now().timestamp() + 86_400;
        let (_, invoice) = request(
            &app,
            "POST",
            "/api/invoices",
            Some(&org_token),
            Some(json!({
                "name": "trip",
                "deadline": deadline,
                "penalty_percent": 15,
                "items": [{
                    "description": "villa",
                    "amount": "100",
                    "recipient_wallet": WalletKeyPair::generate().account_id(),
                }],
            })),
        )
        .await;
        let id = invoice["id"].as_str().unwrap().to_string();
        request(
            &app,
            "POST",
            &format!("/api/invoices/{}/link", id),
            Some(&org_token),
            Some(json!({"contract_invoice_id": 1, "transaction_xdr": "xdr"})),
        )
        .await;

        let (status, body) = request(
            &app,
            "POST",
            &format!("/api/invoices/{}/contribute", id),
            Some(&org_token),
            Some(json!({"amount": "101", "transaction_xdr": "xdr"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Funding failed: amount exceeds remaining unpaid amount"
        );
    }

    #[tokio::test]
    async fn test_empty_items_rejected_over_http() {
        let (engine, _) = test_engine();
        let app = router(engine);
        let token = login(&app, &WalletKeyPair::generate()).await;

        let (status, body) = request(
            &app,
            "POST",
            "/api/invoices",
            Some(&token),
            Some(json!({
                "name": "trip",
                "deadline": chrono::Utc::now().timestamp() + 86_400,
                "penalty_percent": 15,
                "items": [],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed: at least one recipient required");
    }

    #[tokio::test]
    async fn test_business_reads_public_writes_protected() {
        let (engine, _) = test_engine();
        let app = router(engine);

        let (status, page) = request(&app, "GET", "/api/businesses", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 0);

        let (status, _) = request(
            &app,
            "POST",
            "/api/businesses",
            None,
            Some(json!({"name": "Villa"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_routes_enforce_role() {
        let (engine, _) = test_engine();
        let app = router(engine.clone());
        let kp = WalletKeyPair::generate();
        let token = login(&app, &kp).await;

        let (status, _) = request(&app, "GET", "/api/admin/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        engine
            .state
            .db()
            .set_user_role(&kp.account_id(), Role::Admin)
            .unwrap();
        let (status, stats) = request(&app, "GET", "/api/admin/stats", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["users"], 1);
    }

    #[tokio::test]
    async fn test_cancelled_invoice_view() {
        let (engine, _) = test_engine();
        let app = router(engine);
        let kp = WalletKeyPair::generate();
        let token = login(&app, &kp).await;

        let (_, invoice) = request(
            &app,
            "POST",
            "/api/invoices",
            Some(&token),
            Some(json!({
                "name": "trip",
                "deadline": chrono::Utc::now().timestamp() + 86_400,
                "penalty_percent": 15,
                "items": [{
                    "description": "villa",
                    "amount": "100",
                    "recipient_wallet": WalletKeyPair::generate().account_id(),
                }],
            })),
        )
        .await;
        let id = invoice["id"].as_str().unwrap().to_string();

        let (status, cancelled) = request(
            &app,
            "POST",
            &format!("/api/invoices/{}/cancel", id),
            Some(&token),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], InvoiceStatus::Cancelled.to_string());
    }
}
