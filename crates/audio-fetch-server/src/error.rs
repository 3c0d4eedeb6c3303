//! Request-level failure taxonomy and its HTTP mapping.

use actix_web::HttpResponse;
use thiserror::Error;

use crate::extractor::AcquireError;
use crate::transcode::TranscodeError;

/// Errors that end a download request.
///
/// Metadata failures and post-promotion cleanup failures are recovered inside
/// the pipeline and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Acquisition(#[from] AcquireError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl PipelineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Short label used in logs.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PipelineError::BadRequest(_) => "bad_request",
            PipelineError::Acquisition(AcquireError::Cancelled)
            | PipelineError::Transcode(TranscodeError::Cancelled) => "cancelled",
            PipelineError::Acquisition(_) => "acquisition",
            PipelineError::Io { .. } => "io",
            PipelineError::Transcode(TranscodeError::BinaryNotFound(_)) => "transcoder_config",
            PipelineError::Transcode(_) => "transcode",
        }
    }

    /// Convert a pipeline error into an HTTP response.
    pub(crate) fn into_response(self) -> HttpResponse {
        let body = self.to_string();
        match self {
            PipelineError::BadRequest(_) => HttpResponse::BadRequest().body(body),
            PipelineError::Acquisition(AcquireError::TimedOut) => {
                HttpResponse::GatewayTimeout().body(body)
            }
            PipelineError::Acquisition(AcquireError::BinaryNotFound(_)) => {
                HttpResponse::InternalServerError().body(body)
            }
            PipelineError::Acquisition(_) => HttpResponse::BadGateway().body(body),
            PipelineError::Io { .. } | PipelineError::Transcode(_) => {
                HttpResponse::InternalServerError().body(body)
            }
        }
    }
}
