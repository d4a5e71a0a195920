//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::request::Parts,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::allocation::AllocationService;
use crate::db;
use crate::donation::{DonationService, Split};
use crate::errors::{PoolError, Result};
use crate::gateway::PaymentGateway;
use crate::leaderboard::{LeaderboardRanker, LeaderboardScope};
use crate::ledger::LedgerStore;
use crate::models::{
    Feedback, Notification, PaymentConfirmation, PaymentReference, Transaction, TransactionKind,
};
use crate::trust::TrustScoreCalculator;

/// Upper bound on `limit` for the transaction feed.
pub const MAX_PAGE_LIMIT: u32 = 200;
const DEFAULT_LEADERBOARD_LIMIT: usize = 10;
/// Upper bound on `limit` for the leaderboard; each ranked entry costs a
/// profile lookup.
pub const MAX_LEADERBOARD_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    pub ledger: LedgerStore,
    pub donations: DonationService,
    pub allocations: AllocationService,
    pub leaderboard: LeaderboardRanker,
    pub trust: TrustScoreCalculator,
    pub gateway: PaymentGateway,
    pub currency: String,
    pub transactions_page_limit: u32,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments/orders", post(create_order))
        .route("/pool", get(pool_balance))
        .route("/transactions", get(list_transactions))
        .route("/donations", post(donate))
        .route("/allocations", post(allocate))
        .route("/rewards", post(reward_user))
        .route("/rewards/leaderboard", post(reward_leaderboard))
        .route("/leaderboard", get(leaderboard))
        .route(
            "/campaigns/:id/feedback",
            get(list_feedback).post(submit_feedback),
        )
        .route("/users/:id/trust-score", get(trust_score))
        .route("/users/:id/notifications", get(notifications))
        .with_state(state)
}

/// A JSON number with no fractional part. `100` and `100.0` are both whole;
/// floats beyond 2^53 are not exact and are refused.
fn whole_number(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    (f.fract() == 0.0 && f.abs() <= 9_007_199_254_740_992.0).then_some(f as i64)
}

/// Amounts arrive as JSON numbers in the smallest currency unit. Anything
/// else, fractions included, is rejected.
fn parse_amount(value: &Value) -> Result<i64> {
    whole_number(value)
        .filter(|amount| *amount > 0)
        .ok_or(PoolError::InvalidAmount)
}

fn parse_rating(value: &Value) -> Result<i64> {
    whole_number(value).ok_or_else(|| PoolError::InvalidRating(value.to_string()))
}

fn leaderboard_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .min(MAX_LEADERBOARD_LIMIT)
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

impl From<JsonRejection> for PoolError {
    fn from(rejection: JsonRejection) -> Self {
        PoolError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for PoolError {
    fn from(rejection: QueryRejection) -> Self {
        PoolError::InvalidRequest(rejection.body_text())
    }
}

/// [`Json`] whose rejection is a [`PoolError`], so malformed bodies get the
/// same error shape as every other failure.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PoolError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// [`Query`] with a [`PoolError`] rejection.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = PoolError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub amount: Value,
}

#[derive(Deserialize)]
pub struct DonationRequest {
    pub donor_id: String,
    pub amount: Value,
    #[serde(default)]
    pub campaign_id: Option<String>,
    pub payment: PaymentConfirmation,
}

#[derive(Deserialize)]
pub struct AllocationRequest {
    pub campaign_id: String,
    pub amount: Value,
    #[serde(default)]
    pub payment: Option<PaymentConfirmation>,
}

#[derive(Deserialize)]
pub struct RewardRequest {
    pub admin_id: String,
    pub recipient_id: String,
    pub amount: Value,
}

#[derive(Deserialize)]
pub struct LeaderboardRewardRequest {
    pub admin_id: String,
    #[serde(default)]
    pub scope: LeaderboardScope,
    pub amounts: Vec<Value>,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub user_id: String,
    pub rating: Value,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub scope: LeaderboardScope,
    pub limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub success: bool,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Serialize)]
pub struct PoolResponse {
    pub success: bool,
    pub balance: i64,
    pub currency: String,
}

/// A ledger row as shown to clients, with the gateway reference nested.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: i64,
    pub kind: TransactionKind,
    pub amount: i64,
    pub donor_id: Option<String>,
    pub campaign_id: Option<String>,
    pub recipient_id: Option<String>,
    pub payment: Option<PaymentReference>,
    pub description: String,
    pub created_at: i64,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        let payment = tx.payment_reference();
        Self {
            id: tx.id,
            kind: tx.kind,
            amount: tx.amount,
            donor_id: tx.donor_id,
            campaign_id: tx.campaign_id,
            recipient_id: tx.recipient_id,
            payment,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

fn views(transactions: Vec<Transaction>) -> Vec<TransactionView> {
    transactions.into_iter().map(TransactionView::from).collect()
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub success: bool,
    pub count: usize,
    pub transactions: Vec<TransactionView>,
}

#[derive(Serialize)]
pub struct DonationResponse {
    pub success: bool,
    pub transactions: Vec<TransactionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split: Option<Split>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_raised: Option<i64>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub success: bool,
    pub transaction: TransactionView,
}

#[derive(Serialize)]
pub struct RankedUser {
    pub rank: usize,
    pub user_id: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub total_likes: i64,
}

#[derive(Serialize)]
pub struct LeaderboardResponse {
    pub success: bool,
    pub scope: LeaderboardScope,
    pub rankings: Vec<RankedUser>,
}

#[derive(Serialize)]
pub struct FeedbackSubmittedResponse {
    pub success: bool,
    pub trust_score: i64,
}

#[derive(Serialize)]
pub struct FeedbackListResponse {
    pub success: bool,
    pub count: usize,
    pub feedback: Vec<Feedback>,
}

#[derive(Serialize)]
pub struct TrustScoreResponse {
    pub success: bool,
    pub user_id: String,
    pub trust_score: i64,
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub success: bool,
    pub count: usize,
    pub notifications: Vec<Notification>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /payments/orders`
pub async fn create_order(
    State(state): State<Arc<ApiState>>,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<Json<OrderResponse>> {
    let amount = parse_amount(&req.amount)?;
    let order = state.gateway.create_order(amount).await?;
    Ok(Json(OrderResponse {
        success: true,
        order_id: order.order_id,
        amount: order.amount,
        currency: order.currency,
    }))
}

/// `GET /pool`
pub async fn pool_balance(State(state): State<Arc<ApiState>>) -> Result<Json<PoolResponse>> {
    let balance = state.ledger.current_balance().await?;
    Ok(Json(PoolResponse {
        success: true,
        balance,
        currency: state.currency.clone(),
    }))
}

/// `GET /transactions?limit=&offset=`
///
/// Newest first. `limit` defaults to the configured page size and is capped
/// at [`MAX_PAGE_LIMIT`].
pub async fn list_transactions(
    State(state): State<Arc<ApiState>>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<Json<TransactionsResponse>> {
    let limit = page
        .limit
        .unwrap_or(state.transactions_page_limit)
        .min(MAX_PAGE_LIMIT);
    let transactions = views(state.ledger.list(limit, page.offset).await?);
    Ok(Json(TransactionsResponse {
        success: true,
        count: transactions.len(),
        transactions,
    }))
}

/// `POST /donations`
pub async fn donate(
    State(state): State<Arc<ApiState>>,
    ApiJson(req): ApiJson<DonationRequest>,
) -> Result<Json<DonationResponse>> {
    let amount = parse_amount(&req.amount)?;
    let outcome = state
        .donations
        .donate(&req.donor_id, amount, &req.payment, req.campaign_id.as_deref())
        .await?;
    Ok(Json(DonationResponse {
        success: true,
        transactions: views(outcome.transactions),
        split: outcome.split,
        amount_raised: outcome.amount_raised,
    }))
}

/// `POST /allocations`
pub async fn allocate(
    State(state): State<Arc<ApiState>>,
    ApiJson(req): ApiJson<AllocationRequest>,
) -> Result<Json<TransactionResponse>> {
    let amount = parse_amount(&req.amount)?;
    let tx = state
        .allocations
        .allocate_to_campaign(&req.campaign_id, amount, req.payment.as_ref())
        .await?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction: tx.into(),
    }))
}

/// `POST /rewards`
pub async fn reward_user(
    State(state): State<Arc<ApiState>>,
    ApiJson(req): ApiJson<RewardRequest>,
) -> Result<Json<TransactionResponse>> {
    let amount = parse_amount(&req.amount)?;
    let tx = state
        .allocations
        .reward_user(&req.recipient_id, amount, &req.admin_id)
        .await?;
    Ok(Json(TransactionResponse {
        success: true,
        transaction: tx.into(),
    }))
}

/// `POST /rewards/leaderboard`
pub async fn reward_leaderboard(
    State(state): State<Arc<ApiState>>,
    ApiJson(req): ApiJson<LeaderboardRewardRequest>,
) -> Result<Json<TransactionsResponse>> {
    let amounts = req
        .amounts
        .iter()
        .map(parse_amount)
        .collect::<Result<Vec<_>>>()?;
    let transactions = views(
        state
            .allocations
            .reward_leaderboard(req.scope, &amounts, &req.admin_id)
            .await?,
    );
    Ok(Json(TransactionsResponse {
        success: true,
        count: transactions.len(),
        transactions,
    }))
}

/// `GET /leaderboard?scope=&limit=`
pub async fn leaderboard(
    State(state): State<Arc<ApiState>>,
    ApiQuery(query): ApiQuery<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>> {
    let limit = leaderboard_limit(query.limit);
    let ranked = state.leaderboard.rank(query.scope, limit).await?;

    let mut rankings = Vec::with_capacity(ranked.len());
    for (i, entry) in ranked.into_iter().enumerate() {
        // Authors may have been removed since posting; keep their likes.
        let user = db::find_user(state.ledger.pool(), &entry.user_id).await?;
        rankings.push(RankedUser {
            rank: i + 1,
            username: user.as_ref().map(|u| u.username.clone()),
            name: user.as_ref().and_then(|u| u.name.clone()),
            avatar: user.and_then(|u| u.avatar),
            user_id: entry.user_id,
            total_likes: entry.total_likes,
        });
    }

    Ok(Json(LeaderboardResponse {
        success: true,
        scope: query.scope,
        rankings,
    }))
}

/// `POST /campaigns/:id/feedback`
pub async fn submit_feedback(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<String>,
    ApiJson(req): ApiJson<FeedbackRequest>,
) -> Result<Json<FeedbackSubmittedResponse>> {
    let rating = parse_rating(&req.rating)?;
    let trust_score = state
        .trust
        .submit_feedback(&campaign_id, &req.user_id, rating, req.comment.as_deref())
        .await?;
    Ok(Json(FeedbackSubmittedResponse {
        success: true,
        trust_score,
    }))
}

/// `GET /campaigns/:id/feedback`
pub async fn list_feedback(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<String>,
) -> Result<Json<FeedbackListResponse>> {
    let feedback = state.trust.list_feedback(&campaign_id).await?;
    Ok(Json(FeedbackListResponse {
        success: true,
        count: feedback.len(),
        feedback,
    }))
}

/// `GET /users/:id/trust-score`
pub async fn trust_score(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TrustScoreResponse>> {
    let trust_score = state.trust.trust_score(&user_id).await?;
    Ok(Json(TrustScoreResponse {
        success: true,
        user_id,
        trust_score,
    }))
}

/// `GET /users/:id/notifications`
pub async fn notifications(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<NotificationsResponse>> {
    if db::find_user(state.ledger.pool(), &user_id).await?.is_none() {
        return Err(PoolError::UserNotFound(user_id));
    }
    let notifications = db::list_notifications(state.ledger.pool(), &user_id).await?;
    Ok(Json(NotificationsResponse {
        success: true,
        count: notifications.len(),
        notifications,
    }))
}
