use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] hoard_engine::DownloadError),

    #[error("Resource error: {0}")]
    Item(#[from] hoard_engine::ItemError),

    #[error("{failed} of {total} fetches failed")]
    FetchFailed { failed: usize, total: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),
}
