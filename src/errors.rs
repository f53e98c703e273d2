use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reject::Reject;

/// Everything that can go wrong between a broker payload and the database.
///
/// Configuration problems are fatal for a single assignment's connection
/// attempt and for nothing else; transport, decode and persistence problems
/// never terminate anything.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("topic '{0}' is already claimed by another active zone")]
    TopicCollision(String),
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("measurement store error: {0}")]
    Store(String),
    #[error("malformed payload: {0}")]
    Decode(String),
}

#[derive(Debug)]
pub struct IngestRejection(pub IngestError);

impl Reject for IngestRejection {}

// Message body returned for every rejected request
#[derive(Serialize)]
struct ErrorMessage {
    message: String,
    code: u16,
}

pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(IngestRejection(e)) = err.find() {
        let code = match e {
            IngestError::TopicCollision(_) => StatusCode::CONFLICT,
            IngestError::InvalidConfig(_) | IngestError::Decode(_) => StatusCode::BAD_REQUEST,
            IngestError::Catalog(_) | IngestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, e.to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        )
    };

    let body = warp::reply::json(&ErrorMessage {
        message,
        code: code.as_u16(),
    });

    Ok(warp::reply::with_status(body, code))
}
