use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mask error: {0}")]
    Mask(String),

    #[error("History error: {0}")]
    History(#[from] csv::Error),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
