use spin_sdk::http::Response;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Not Found: {0}")]
    NotFound(String),
    /// Duplicate username or email. Reported as 400, like any other invalid input.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal Error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) | ApiError::Conflict(_) => 400,
            ApiError::Unauthorized => 401,
            ApiError::Forbidden => 403,
            ApiError::NotFound(_) => 404,
            ApiError::InternalError(_) => 500,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => msg.clone(),
            ApiError::Unauthorized => "Unauthorized".to_string(),
            ApiError::Forbidden => "You do not have permission to modify this resource".to_string(),
            ApiError::InternalError(_) => "Internal server error".to_string(),
        }
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        if let ApiError::InternalError(detail) = &err {
            tracing::error!(%detail, "request failed");
        }
        let body = serde_json::json!({ "error": err.message() }).to_string();
        Response::builder()
            .status(err.status())
            .header("content-type", "application/json")
            .body(body)
            .build()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}
