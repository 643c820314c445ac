#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("search request failed: {0}")]
    Http(String),

    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed search response: {0}")]
    Decode(String),

    #[error("unknown index: {0}")]
    UnknownIndex(String),

    #[error("fixture error: {0}")]
    Fixture(String),
}

impl From<reqwest::Error> for RetrievalError {
    fn from(e: reqwest::Error) -> Self {
        RetrievalError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for RetrievalError {
    fn from(e: serde_json::Error) -> Self {
        RetrievalError::Decode(e.to_string())
    }
}
