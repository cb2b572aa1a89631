use confgen::core::io::sdf::SdfError;
use confgen::core::library::format::LibraryIoError;
use confgen::engine::registry::RegistryError;
use confgen::workflows::batch::BatchError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Molecule file error: {0}")]
    Molecules(#[from] SdfError),

    #[error("Fragment library error: {0}")]
    Library(#[from] LibraryIoError),

    #[error("Failed to parse file '{path}': {source}", path = path.display())]
    FileParsing {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write report: {0}")]
    Report(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run interrupted after {processed} molecule(s)")]
    Interrupted { processed: usize },

    #[error("Run stopped by an unexpected error: {0}")]
    Stopped(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
