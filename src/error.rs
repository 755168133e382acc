use anyhow::Error as ANYHOW_ERROR;
use bigdecimal::ParseBigDecimalError as BIG_DECIMAL_ERROR;
use reqwest::Error as REQWEST_ERROR;
use serde_json::Error as JSON_ERROR;
use sqlx::error::Error as SQL_ERROR;
use std::{
    env::VarError, io::Error as IO_ERROR, num::ParseIntError,
    str::ParseBoolError as PARSE_BOOL_ERROR,
};
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    SQL(#[from] SQL_ERROR),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("{0}")]
    TokioElapsedError(#[from] Elapsed),

    #[error("{0}")]
    BigDecimalError(#[from] BIG_DECIMAL_ERROR),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("{0}")]
    AnyHowError(#[from] ANYHOW_ERROR),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider protocol error: {0}")]
    ProviderProtocolError(String),

    #[error("Not yet available")]
    NotYetAvailable,

    #[error("Missing upstream record: {0}")]
    MissingUpstreamRecord(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl Error {
    /// Expected, non-error condition: the cycle stops cleanly and the
    /// indexer retries on its next tick. Never reported as a failure.
    pub fn is_not_yet_available(&self) -> bool {
        matches!(self, Error::NotYetAvailable)
    }
}
