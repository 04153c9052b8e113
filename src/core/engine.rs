use chrono::Utc;

use crate::core::arbitration::{annotate_against_originals, ArbitrationSession};
use crate::core::reconcile::MergeRequest;
use crate::core::upsert::UploadPipeline;
use crate::core::{ConfigProvider, Pipeline, ShipmentStore, WriteBatch};
use crate::domain::extraction::RawExtraction;
use crate::domain::model::{
    AuditAction, AuditEntry, CanonicalShipment, ShipmentAggregate, UpsertOutcome,
};
use crate::utils::error::{ReconError, Result};

const FINALIZE_REASON: &str = "arbitration finalized";

pub struct ReconEngine<S: ShipmentStore, C: ConfigProvider> {
    pipeline: UploadPipeline<S, C>,
}

impl<S: ShipmentStore, C: ConfigProvider> ReconEngine<S, C> {
    pub fn new(pipeline: UploadPipeline<S, C>) -> Self {
        Self { pipeline }
    }

    pub fn from_parts(store: S, config: C) -> Result<Self> {
        Ok(Self::new(UploadPipeline::new(store, config)?))
    }

    pub fn store(&self) -> &S {
        self.pipeline.store()
    }

    /// Runs one upload through resolve → reconcile → persist.
    ///
    /// An upload that loses a race against a concurrent writer is re-resolved
    /// once, so it lands on top of the winner's write.
    pub async fn apply_upload(&self, extraction: RawExtraction) -> Result<UpsertOutcome> {
        match self.run_pipeline(extraction.clone()).await {
            Err(e) if e.is_lost_race() => {
                tracing::warn!("{}, retrying upload", e);
                match self.run_pipeline(extraction).await {
                    Err(ReconError::DuplicateHouseNumber { house_number }) => {
                        let owner = self
                            .store()
                            .find_by_house_number(&house_number)
                            .await?
                            .ok_or_else(|| ReconError::DuplicateHouseNumber {
                                house_number: house_number.clone(),
                            })?;
                        Err(ReconError::Conflict {
                            house_number,
                            existing_shipment_id: owner.shipment_id,
                        })
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn run_pipeline(&self, extraction: RawExtraction) -> Result<UpsertOutcome> {
        tracing::info!(
            "Processing {} document {}",
            extraction.document_type,
            extraction.own_number().unwrap_or("<missing>")
        );

        // Resolve
        let resolution = self.pipeline.resolve(extraction).await?;
        tracing::debug!(
            "Resolved to {} target(s), create_new={}",
            resolution.targets.len(),
            resolution.create_new
        );

        // Reconcile
        let plan = self.pipeline.reconcile(resolution).await?;
        tracing::debug!("Merged {} shipment(s)", plan.aggregates.len());

        // Persist
        let outcome = self.pipeline.persist(plan).await?;
        tracing::info!(
            "Upload {}: {}",
            outcome.action,
            outcome.affected_ids.join(", ")
        );

        Ok(outcome)
    }

    pub async fn shipment(&self, shipment_id: &str) -> Result<ShipmentAggregate> {
        self.store()
            .find_by_id(shipment_id)
            .await?
            .ok_or_else(|| ReconError::not_found(shipment_id))
    }

    pub async fn shipments_for_master(&self, master_number: &str) -> Result<Vec<ShipmentAggregate>> {
        self.store().find_by_master_number(master_number).await
    }

    pub async fn history(&self, shipment_id: &str) -> Result<Vec<AuditEntry>> {
        self.shipment(shipment_id).await?;
        self.store().audit_trail(shipment_id).await
    }

    pub async fn open_arbitration(&self, shipment_id: &str) -> Result<ArbitrationSession> {
        let aggregate = self.shipment(shipment_id).await?;
        ArbitrationSession::open(&aggregate)
    }

    pub async fn finalize_session(&self, session: ArbitrationSession) -> Result<ShipmentAggregate> {
        let shipment_id = session.shipment_id().to_string();
        let (master, house) = session.into_working_copies();
        self.finalize(&shipment_id, master, house).await
    }

    /// Re-merges arbitration-adjusted working copies and stores the result as
    /// the authoritative record. The stored originals are left untouched.
    pub async fn finalize(
        &self,
        shipment_id: &str,
        master: RawExtraction,
        house: RawExtraction,
    ) -> Result<ShipmentAggregate> {
        let current = self.shipment(shipment_id).await?;
        let editor = self.pipeline.config().editor();
        let at = Utc::now();

        let merged = self.pipeline.reconciler().merge(&MergeRequest {
            master: Some(&master),
            house: Some(&house),
            previous: Some(&current.fields),
            newest: None,
            shipment_id,
            editor,
            reason: FINALIZE_REASON,
            at,
        });

        let mut fields = merged.fields;
        fields.validation_result = annotate_against_originals(
            current.master_raw.as_ref(),
            current.house_raw.as_ref(),
            &master,
            &house,
        );

        let pending: Vec<&str> = fields.unresolved().map(|d| d.field.as_str()).collect();
        if !pending.is_empty() {
            return Err(ReconError::validation(format!(
                "shipment {shipment_id} still has unresolved field(s): {}",
                pending.join(", ")
            )));
        }

        let house_number = house
            .house_number()
            .map(str::to_string)
            .or_else(|| current.house_number.clone());
        let master_number = master
            .master_number()
            .map(str::to_string)
            .or_else(|| current.master_number.clone());

        // 內容與已定案紀錄相同時不重寫，保持結果可重現
        let unchanged = current.raw_json.is_some()
            && current.updated_reason == FINALIZE_REASON
            && house_number == current.house_number
            && master_number == current.master_number
            && CanonicalShipment {
                shipment_info: current.fields.shipment_info.clone(),
                ..fields.clone()
            } == current.fields;
        if unchanged {
            tracing::info!("Shipment {} already finalized with these values", shipment_id);
            return Ok(current);
        }

        if let Some(number) = house_number.as_deref() {
            if let Some(owner) = self.store().find_by_house_number(number).await? {
                if owner.shipment_id != shipment_id {
                    return Err(ReconError::Conflict {
                        house_number: number.to_string(),
                        existing_shipment_id: owner.shipment_id,
                    });
                }
            }
        }

        let aggregate = ShipmentAggregate {
            master_number,
            house_number,
            raw_json: Some(fields.clone()),
            fields,
            updated_at: at,
            updated_by: editor.to_string(),
            updated_reason: FINALIZE_REASON.to_string(),
            version: current.version + 1,
            ..current
        };

        let entry = AuditEntry::for_aggregate(&aggregate, AuditAction::Finalized);
        self.store()
            .commit(WriteBatch::new().update(aggregate.clone()).audit(entry))
            .await?;

        tracing::info!("Shipment {} finalized", shipment_id);
        Ok(aggregate)
    }
}
