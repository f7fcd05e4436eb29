use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert webhook returned status {status}: {body}")]
    Webhook { status: u16, body: String },
}
