//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::accounts::{AccountDirectory, Registration};
use crate::config::LedgerConfig;
use crate::domain::{to_points, Amount, DomainError, Movement, Order, OrderNumber, OrderStatus};
use crate::error::{AppError, AppResult};
use crate::orders::{AccrualUpdate, OrderIntake};
use crate::withdrawals::WithdrawalIssuer;

use super::middleware::RequestPerson;

// =========================================================================
// Application state
// =========================================================================

/// Services shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub directory: AccountDirectory,
    pub orders: OrderIntake,
    pub withdrawals: WithdrawalIssuer,
}

impl AppState {
    pub fn new(pool: PgPool, ledger: LedgerConfig) -> Self {
        Self {
            directory: AccountDirectory::new(pool.clone(), ledger.clone()),
            orders: OrderIntake::new(pool.clone(), ledger.clone()),
            withdrawals: WithdrawalIssuer::new(pool.clone(), ledger),
            pool,
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub person_id: i64,
    pub account_number: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub person_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let accrual = (order.status == OrderStatus::Processed).then(|| to_points(order.accrual));
        Self {
            number: order.number.to_string(),
            status: order.status,
            accrual,
            uploaded_at: order.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccrualRequest {
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub accrual: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Movement> for WithdrawalResponse {
    fn from(movement: Movement) -> Self {
        Self {
            order: movement
                .order_number
                .map(|n| n.to_string())
                .unwrap_or_default(),
            sum: to_points(movement.amount),
            processed_at: movement.operation_date,
        }
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Persons
        .route("/users", post(register))
        .route("/users/login", post(login))
        // Orders
        .route("/orders", post(submit_order).get(list_orders))
        .route("/orders/:number/accrual", put(apply_accrual))
        // Balance and withdrawals
        .route("/balance", get(get_balance))
        .route("/balance/withdraw", post(withdraw))
        .route("/withdrawals", get(list_withdrawals))
}

fn require_person(person: Option<Extension<RequestPerson>>) -> AppResult<i64> {
    person
        .map(|Extension(p)| p.person_id)
        .ok_or_else(|| AppError::MissingHeader(super::middleware::PERSON_HEADER.to_string()))
}

// =========================================================================
// POST /users
// =========================================================================

/// Register a person and open their account
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let mut registration = Registration::new(request.login, request.password);
    registration.full_name = request.full_name;
    registration.surname = request.surname;
    registration.name = request.name;

    let (person, account) = state.directory.register(registration).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            person_id: person.id,
            account_number: account.number,
        }),
    ))
}

// =========================================================================
// POST /users/login
// =========================================================================

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let person = state
        .directory
        .authenticate(&request.login, &request.password)
        .await?;

    Ok(Json(LoginResponse {
        person_id: person.id,
    }))
}

// =========================================================================
// POST /orders
// =========================================================================

/// Submit an order number (plain-text body) for accrual
async fn submit_order(
    State(state): State<AppState>,
    person: Option<Extension<RequestPerson>>,
    body: String,
) -> AppResult<Response> {
    let person_id = require_person(person)?;

    match state.orders.submit_raw(person_id, &body).await {
        Ok(order) => Ok((StatusCode::ACCEPTED, Json(OrderResponse::from(order))).into_response()),
        Err(e) => match AppError::from(e) {
            AppError::Domain(DomainError::DuplicateOrder(number)) => {
                let order = state.orders.order(number).await?;
                Ok((StatusCode::OK, Json(OrderResponse::from(order))).into_response())
            }
            other => Err(other),
        },
    }
}

// =========================================================================
// GET /orders
// =========================================================================

async fn list_orders(
    State(state): State<AppState>,
    person: Option<Extension<RequestPerson>>,
) -> AppResult<Response> {
    let person_id = require_person(person)?;

    let orders = state.orders.orders_of(person_id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

// =========================================================================
// PUT /orders/:number/accrual
// =========================================================================

/// Accrual service verdict for an order
async fn apply_accrual(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(request): Json<AccrualRequest>,
) -> AppResult<Json<OrderResponse>> {
    let number = OrderNumber::parse(&number)?;
    let accrual = request
        .accrual
        .filter(|a| !a.is_zero())
        .map(Amount::from_points)
        .transpose()?;

    let order = state
        .orders
        .apply_accrual(number.value(), AccrualUpdate::new(request.status, accrual))
        .await?;

    Ok(Json(OrderResponse::from(order)))
}

// =========================================================================
// GET /balance
// =========================================================================

async fn get_balance(
    State(state): State<AppState>,
    person: Option<Extension<RequestPerson>>,
) -> AppResult<Json<BalanceResponse>> {
    let person_id = require_person(person)?;

    let summary = state.withdrawals.summary(person_id).await?;

    Ok(Json(BalanceResponse {
        current: to_points(summary.current),
        withdrawn: to_points(summary.withdrawn),
    }))
}

// =========================================================================
// POST /balance/withdraw
// =========================================================================

async fn withdraw(
    State(state): State<AppState>,
    person: Option<Extension<RequestPerson>>,
    Json(request): Json<WithdrawRequest>,
) -> AppResult<Json<WithdrawalResponse>> {
    let person_id = require_person(person)?;

    let order = OrderNumber::parse(&request.order)?;
    let amount = Amount::from_points(request.sum)?;

    let movement = state.withdrawals.withdraw(person_id, order, amount).await?;

    Ok(Json(WithdrawalResponse::from(movement)))
}

// =========================================================================
// GET /withdrawals
// =========================================================================

async fn list_withdrawals(
    State(state): State<AppState>,
    person: Option<Extension<RequestPerson>>,
) -> AppResult<Response> {
    let person_id = require_person(person)?;

    let withdrawals = state.withdrawals.withdrawals_of(person_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}
