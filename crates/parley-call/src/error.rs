use thiserror::Error;

/// Failures that end or prevent a call attempt on this client.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("media devices unavailable: {0}")]
    MediaUnavailable(String),
    #[error("peer transport error: {0}")]
    Transport(String),
    #[error("already in a call with {0}")]
    Busy(String),
    #[error("cannot call yourself")]
    SelfCall,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("relay connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("relay connection timed out")]
    Timeout,
    #[error("relay connection closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ChatPostError {
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat service rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}
