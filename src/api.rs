// src/api.rs
use crate::auth::TokenAuthority;
use crate::engine::TransactionEngine;
use crate::error::{ApiError, FinanceError};
use crate::models::{Side, UserId};
use log::{error, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    user_id: UserId,
    token: String,
}

/// Share counts arrive either as JSON integers or as form-style digit strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SharesInput {
    Count(serde_json::Number),
    Text(String),
}

impl SharesInput {
    /// Whole, positive share counts only; fractions and signs never reach the engine.
    pub fn parse(&self) -> Result<i64, FinanceError> {
        let invalid = || FinanceError::Validation("shares must be a positive whole number".into());
        let count = match self {
            SharesInput::Count(n) => n.as_i64().ok_or_else(invalid)?,
            SharesInput::Text(s) => {
                let s = s.trim();
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
                    return Err(invalid());
                }
                s.parse::<i64>().map_err(|_| invalid())?
            }
        };
        if count <= 0 {
            return Err(invalid());
        }
        Ok(count)
    }
}

#[derive(Deserialize)]
pub struct TradeRequest {
    pub symbol: Option<String>,
    pub shares: Option<SharesInput>,
}

impl TradeRequest {
    fn validate(&self) -> Result<(String, i64), FinanceError> {
        let symbol = match self.symbol.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return Err(FinanceError::Validation("please provide a symbol".into())),
        };
        let shares = self
            .shares
            .as_ref()
            .ok_or_else(|| FinanceError::Validation("please provide shares".into()))?
            .parse()?;
        Ok((symbol, shares))
    }
}

#[derive(Deserialize)]
pub struct CashRequest {
    pub cash: Decimal,
}

pub fn routes(
    engine: Arc<TransactionEngine>,
    auth: Arc<TokenAuthority>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let register = warp::path("register")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_engine(engine.clone()))
        .and(with_auth(auth.clone()))
        .and(warp::body::json())
        .and_then(register_handler);

    let quote = warp::path!("quote" / String)
        .and(warp::get())
        .and(with_user(auth.clone()))
        .and(with_engine(engine.clone()))
        .and_then(quote_handler);

    let buy = warp::path("buy")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user(auth.clone()))
        .and(with_engine(engine.clone()))
        .and(warp::body::json())
        .and_then(
            |user_id: UserId, engine: Arc<TransactionEngine>, request: TradeRequest| {
                trade_handler(Side::Buy, user_id, engine, request)
            },
        );

    let sell = warp::path("sell")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user(auth.clone()))
        .and(with_engine(engine.clone()))
        .and(warp::body::json())
        .and_then(
            |user_id: UserId, engine: Arc<TransactionEngine>, request: TradeRequest| {
                trade_handler(Side::Sell, user_id, engine, request)
            },
        );

    let cash = warp::path("cash")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user(auth.clone()))
        .and(with_engine(engine.clone()))
        .and(warp::body::json())
        .and_then(cash_handler);

    let portfolio = warp::path("portfolio")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user(auth.clone()))
        .and(with_engine(engine.clone()))
        .and_then(portfolio_handler);

    let history = warp::path("history")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user(auth))
        .and(with_engine(engine))
        .and_then(history_handler);

    register
        .or(quote)
        .or(buy)
        .or(sell)
        .or(cash)
        .or(portfolio)
        .or(history)
        .with(warp::reply::with::header(
            "Cache-Control",
            "no-cache, no-store, must-revalidate",
        ))
        .recover(handle_rejection)
}

fn with_engine(
    engine: Arc<TransactionEngine>,
) -> impl Filter<Extract = (Arc<TransactionEngine>,), Error = Infallible> + Clone {
    warp::any().map(move || engine.clone())
}

fn with_auth(
    auth: Arc<TokenAuthority>,
) -> impl Filter<Extract = (Arc<TokenAuthority>,), Error = Infallible> + Clone {
    warp::any().map(move || auth.clone())
}

fn with_user(
    auth: Arc<TokenAuthority>,
) -> impl Filter<Extract = (UserId,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let auth = auth.clone();
        async move {
            let header =
                header.ok_or_else(|| warp::reject::custom(ApiError::unauthorized("login required")))?;
            auth.verify_bearer(&header).map_err(warp::reject::custom)
        }
    })
}

fn reject(e: FinanceError) -> Rejection {
    warp::reject::custom(ApiError::from(e))
}

async fn register_handler(
    engine: Arc<TransactionEngine>,
    auth: Arc<TokenAuthority>,
    request: RegisterRequest,
) -> Result<impl Reply, Rejection> {
    let user_id = engine.open_account(&request.username).await.map_err(|e| {
        error!("Failed to register {}: {}", request.username, e);
        reject(e)
    })?;
    let token = auth.create_token(&user_id).map_err(warp::reject::custom)?;
    info!("Registered {} as {}", request.username, user_id);
    Ok(warp::reply::with_status(
        warp::reply::json(&RegisterResponse { user_id, token }),
        StatusCode::CREATED,
    ))
}

async fn quote_handler(
    symbol: String,
    _user_id: UserId,
    engine: Arc<TransactionEngine>,
) -> Result<impl Reply, Rejection> {
    match engine.quote(&symbol).await {
        Ok(quote) => Ok(warp::reply::json(&quote)),
        Err(e) => {
            error!("Failed to quote {}: {}", symbol, e);
            Err(reject(e))
        }
    }
}

async fn trade_handler(
    side: Side,
    user_id: UserId,
    engine: Arc<TransactionEngine>,
    request: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let (symbol, shares) = request.validate().map_err(reject)?;
    let result = match side {
        Side::Buy => engine.buy(&user_id, &symbol, shares).await,
        Side::Sell => engine.sell(&user_id, &symbol, shares).await,
    };
    match result {
        Ok(receipt) => {
            info!("{} {} {} for {}", side, shares, receipt.symbol, user_id);
            Ok(warp::reply::json(&receipt))
        }
        Err(e) => {
            error!("Failed to {} {} {} for {}: {}", side, shares, symbol, user_id, e);
            Err(reject(e))
        }
    }
}

async fn cash_handler(
    user_id: UserId,
    engine: Arc<TransactionEngine>,
    request: CashRequest,
) -> Result<impl Reply, Rejection> {
    match engine.adjust_cash(&user_id, request.cash).await {
        Ok(cash) => Ok(warp::reply::json(&json!({ "cash": cash }))),
        Err(e) => {
            error!("Failed to set cash for {}: {}", user_id, e);
            Err(reject(e))
        }
    }
}

async fn portfolio_handler(
    user_id: UserId,
    engine: Arc<TransactionEngine>,
) -> Result<impl Reply, Rejection> {
    match engine.portfolio(&user_id).await {
        Ok(view) => Ok(warp::reply::json(&view)),
        Err(e) => {
            error!("Failed to build portfolio for {}: {}", user_id, e);
            Err(reject(e))
        }
    }
}

async fn history_handler(
    user_id: UserId,
    engine: Arc<TransactionEngine>,
) -> Result<impl Reply, Rejection> {
    match engine.history(&user_id).await {
        Ok(history) => Ok(warp::reply::json(&history)),
        Err(e) => {
            error!("Failed to load history for {}: {}", user_id, e);
            Err(reject(e))
        }
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, kind, message) = if let Some(e) = rejection.find::<ApiError>() {
        (e.status, e.kind, e.message.clone())
    } else if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        let e = ApiError::bad_request(e.to_string());
        (e.status, e.kind, e.message)
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": kind, "message": message })),
        status,
    ))
}
