pub mod api;
pub mod assembler;
pub mod classifier;
pub mod config;
pub mod database;
pub mod draws;
pub mod error;
pub mod generator;
pub mod reconcile;
pub mod repository;
pub mod service;
pub mod types;
pub mod universe;
pub mod utils;

pub use api::HttpDrawSource;
pub use config::Config;
pub use database::SqliteRepository;
pub use draws::{DrawResultSource, SqliteDrawStore, StaticDrawSource};
pub use error::{DanError, ErrorKind, Result};
pub use reconcile::{CancelToken, ReconcileSettings, Reconciler};
pub use repository::{EntryRepository, InMemoryRepository, UpsertGuard};
pub use service::{DanService, Submission};
pub use types::*;
pub use universe::NumberUniverse;
