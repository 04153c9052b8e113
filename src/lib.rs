pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, Command};

pub use adapters::SqliteShipmentStore;
pub use config::ReconConfig;
pub use core::{arbitration::ArbitrationSession, engine::ReconEngine, upsert::UploadPipeline};
pub use domain::extraction::{DocumentType, RawExtraction};
pub use utils::error::{ReconError, Result};
