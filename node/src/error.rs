use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("store error: {0}")]
    Store(#[from] baton_store::StoreError),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] baton_store_lmdb::LmdbError),

    #[error("{0}")]
    Types(#[from] baton_types::TypesError),

    #[error("relay error: {0}")]
    Relay(#[from] baton_relay::RelayError),

    #[error("config error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    TaskJoin(String),

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
