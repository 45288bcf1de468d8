// Storage module for run records and object storage backends

pub mod minio;
pub mod run_store;

pub use minio::MinioClient;
pub use run_store::{FileRunStore, RunStore};
