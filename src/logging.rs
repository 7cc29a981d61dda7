use std::fmt::Debug;

use axum::http::StatusCode;
use tracing_stackdriver::Stackdriver;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::lifecycle::LifecycleError;
use crate::workflows::WorkflowError;

const LOG_MODULES: &[&str] = &["gigboard"];

pub fn init_logging() {
    let mut env_filter = EnvFilter::default();

    for module in LOG_MODULES {
        env_filter = env_filter.add_directive(
            format!("{}=info", module)
                .parse()
                .expect("Could not parse logging directive"),
        );
    }

    if std::env::var("LOG_JSON").is_ok() {
        let stackdriver = Stackdriver::default();
        let subscriber = Registry::default().with(stackdriver).with(env_filter);

        tracing::subscriber::set_global_default(subscriber)
            .expect("Could not set up global logger");
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

pub type WebResult<T> = std::result::Result<T, StatusCode>;

pub trait LogError<T> {
    fn log_error_internal(self) -> WebResult<T>;
}

impl<T, E> LogError<T> for Result<T, E>
where
    E: Debug,
{
    fn log_error_internal(self) -> WebResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(error) => {
                tracing::error!(?error, "Error: {:?}", error);

                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}

/// Maps workflow outcomes onto HTTP statuses: guard violations are client
/// conflicts, store failures are server errors. Guard rejections are logged
/// at warn since they are expected traffic, store failures at error.
pub trait LogWorkflow<T> {
    fn or_status(self) -> WebResult<T>;
}

impl<T> LogWorkflow<T> for Result<T, WorkflowError> {
    fn or_status(self) -> WebResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(WorkflowError::Store(error)) => {
                tracing::error!(?error, "Store error: {:?}", error);

                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Err(error) => {
                tracing::warn!(%error, "Rejected: {}", error);

                Err(match &error {
                    WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                    WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
                    WorkflowError::Invalid(_) => StatusCode::BAD_REQUEST,
                    WorkflowError::Guard(LifecycleError::RatingOutOfRange) => {
                        StatusCode::BAD_REQUEST
                    }
                    WorkflowError::Guard(LifecycleError::NotAParty) => StatusCode::FORBIDDEN,
                    WorkflowError::Guard(_) => StatusCode::CONFLICT,
                    WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                })
            }
        }
    }
}
