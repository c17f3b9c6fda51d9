//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use para_serve::ServiceError;
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise logging: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
    #[error("failed to serialise {what}: {source}")]
    Serialise {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
}

impl From<io::Error> for AppError {
    fn from(error: io::Error) -> Self {
        Self::Output(error)
    }
}
