mod sample_store;
mod token_store;

pub use sample_store::SampleStore;
pub use token_store::{StoredToken, TokenStore};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid database url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),
    #[error("store is closed")]
    Closed,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub(crate) fn connect_options(url: &str) -> Result<sqlx::sqlite::SqliteConnectOptions, StoreError> {
    use std::str::FromStr;

    sqlx::sqlite::SqliteConnectOptions::from_str(url)
        .map(|opts| opts.create_if_missing(true))
        .map_err(|source| StoreError::InvalidUrl {
            url: url.to_string(),
            source,
        })
}
