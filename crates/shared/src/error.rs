use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("a sibling named '{0}' already exists")]
    DuplicateSiblingName(String),
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("a file transaction is already open")]
    AlreadyOpen,
    #[error("no file transaction is open")]
    NotOpen,
    #[error("file transaction I/O failure on '{path}': {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
