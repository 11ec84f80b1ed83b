use shared::error::ApiFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("missing access token")]
    MissingCredential,
    #[error("request failed: {0}")]
    Api(#[from] ApiFailure),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: not connected")]
    Unavailable,
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: &'static str,
        source: serde_json::Error,
    },
    #[error("{event} payload is missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}
