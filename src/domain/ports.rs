use chrono::{DateTime, Utc};

use crate::core::ownership::OwnershipTable;
use crate::domain::extraction::RawExtraction;
use crate::domain::model::{
    AuditEntry, PersistPlan, Resolution, ShipmentAggregate, UpsertOutcome,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// A single write inside an atomic [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create(Box<ShipmentAggregate>),
    Update(Box<ShipmentAggregate>),
    ArchiveDocument {
        extraction: Box<RawExtraction>,
        received_at: DateTime<Utc>,
    },
    Audit(AuditEntry),
}

/// Writes applied all-or-nothing by [`ShipmentStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, aggregate: ShipmentAggregate) -> Self {
        self.ops.push(WriteOp::Create(Box::new(aggregate)));
        self
    }

    pub fn update(mut self, aggregate: ShipmentAggregate) -> Self {
        self.ops.push(WriteOp::Update(Box::new(aggregate)));
        self
    }

    pub fn archive(mut self, extraction: RawExtraction, received_at: DateTime<Utc>) -> Self {
        self.ops.push(WriteOp::ArchiveDocument {
            extraction: Box::new(extraction),
            received_at,
        });
        self
    }

    pub fn audit(mut self, entry: AuditEntry) -> Self {
        self.ops.push(WriteOp::Audit(entry));
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait ShipmentStore: Send + Sync {
    fn find_by_master_number(
        &self,
        master_number: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ShipmentAggregate>>> + Send;

    fn find_by_house_number(
        &self,
        house_number: &str,
    ) -> impl std::future::Future<Output = Result<Option<ShipmentAggregate>>> + Send;

    fn find_by_id(
        &self,
        shipment_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ShipmentAggregate>>> + Send;

    /// Most recently archived Master extraction carrying `master_number`.
    fn latest_master_extraction(
        &self,
        master_number: &str,
    ) -> impl std::future::Future<Output = Result<Option<RawExtraction>>> + Send;

    fn audit_trail(
        &self,
        shipment_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<AuditEntry>>> + Send;

    /// Applies every op in one transaction; on any failure nothing is written.
    fn commit(&self, batch: WriteBatch) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn shipment_id_prefix(&self) -> &str;
    fn editor(&self) -> &str;
    fn ownership(&self) -> Result<OwnershipTable>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn resolve(&self, extraction: RawExtraction) -> Result<Resolution>;
    async fn reconcile(&self, resolution: Resolution) -> Result<PersistPlan>;
    async fn persist(&self, plan: PersistPlan) -> Result<UpsertOutcome>;
}
