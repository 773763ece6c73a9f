use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger file not found: {0}")]
    NotFound(String),

    #[error("corrupt ledger: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger used before init")]
    Uninitialized,
}
