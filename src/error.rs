// src/error.rs
use crate::models::UserId;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

pub type Result<T> = std::result::Result<T, FinanceError>;

#[derive(Debug, Error)]
pub enum FinanceError {
    /// Malformed or missing input; rejected before the store is touched.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("insufficient funds: cost {cost}, available cash {available}")]
    InsufficientFunds { cost: Decimal, available: Decimal },

    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        symbol: String,
        requested: i64,
        held: i64,
    },

    #[error("unknown symbol: {0}")]
    SymbolNotFound(String),

    #[error("quote service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("user not found: {0}")]
    NotFound(UserId),

    /// The account changed between snapshot and commit. Retried by the engine.
    #[error("concurrent modification of account {0}")]
    Conflict(UserId),
}

impl FinanceError {
    pub fn storage<E: fmt::Display>(e: E) -> Self {
        FinanceError::Storage(e.to_string())
    }

    pub fn upstream<E: fmt::Display>(e: E) -> Self {
        FinanceError::UpstreamUnavailable(e.to_string())
    }

    /// Short machine-readable tag for the presentation layer.
    pub fn kind(&self) -> &'static str {
        match self {
            FinanceError::Validation(_) => "validation",
            FinanceError::InsufficientFunds { .. } => "insufficient_funds",
            FinanceError::InsufficientShares { .. } => "insufficient_shares",
            FinanceError::SymbolNotFound(_) => "symbol_not_found",
            FinanceError::UpstreamUnavailable(_) => "upstream_unavailable",
            FinanceError::Storage(_) | FinanceError::Conflict(_) => "storage",
            FinanceError::NotFound(_) => "not_found",
        }
    }
}

/// Rejection carried through warp filters up to the recover handler.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::UNAUTHORIZED,
            kind: "unauthorized",
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            kind: "validation",
            message: message.into(),
        }
    }
}

impl From<FinanceError> for ApiError {
    fn from(e: FinanceError) -> Self {
        let status = match &e {
            FinanceError::Validation(_) => StatusCode::BAD_REQUEST,
            FinanceError::InsufficientFunds { .. } | FinanceError::InsufficientShares { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            FinanceError::SymbolNotFound(_) | FinanceError::NotFound(_) => StatusCode::NOT_FOUND,
            FinanceError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FinanceError::Storage(_) | FinanceError::Conflict(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError {
            status,
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl Reject for ApiError {}
