pub mod arbitration;
pub mod engine;
pub mod ownership;
pub mod reconcile;
pub mod resolve;
pub mod upsert;

pub use crate::domain::model::{PersistPlan, Resolution, ShipmentAggregate, UpsertOutcome};
pub use crate::domain::ports::{ConfigProvider, Pipeline, ShipmentStore, WriteBatch, WriteOp};
pub use crate::utils::error::Result;
