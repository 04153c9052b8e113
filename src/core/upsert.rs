use chrono::Utc;
use uuid::Uuid;

use crate::core::reconcile::{MergeRequest, Reconciler};
use crate::core::{resolve, ConfigProvider, Pipeline, ShipmentStore, WriteBatch};
use crate::domain::extraction::{DocumentType, RawExtraction};
use crate::domain::model::{
    AuditAction, AuditEntry, CanonicalShipment, PersistPlan, Resolution, ShipmentAggregate,
    UpsertAction, UpsertOutcome,
};
use crate::utils::error::{ReconError, Result};

/// Upload pipeline: resolve identity, reconcile fields, persist atomically.
pub struct UploadPipeline<S: ShipmentStore, C: ConfigProvider> {
    store: S,
    config: C,
    reconciler: Reconciler,
}

impl<S: ShipmentStore, C: ConfigProvider> UploadPipeline<S, C> {
    pub fn new(store: S, config: C) -> Result<Self> {
        let reconciler = Reconciler::new(config.ownership()?);
        Ok(Self {
            store,
            config,
            reconciler,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn new_shipment_id(&self) -> String {
        format!("{}{}", self.config.shipment_id_prefix(), Uuid::new_v4())
    }

    fn create_aggregate(&self, resolution: Resolution) -> PersistPlan {
        let Resolution {
            extraction,
            master_seed,
            received_at,
            ..
        } = resolution;
        let shipment_id = self.new_shipment_id();
        let editor = self.config.editor();

        let (master_raw, house_raw, reason) = match extraction.document_type {
            DocumentType::Master => (Some(extraction.clone()), None, "create shipment from master"),
            DocumentType::House => (master_seed, Some(extraction.clone()), "create shipment from house"),
        };

        let merged = self.reconciler.merge(&MergeRequest {
            master: master_raw.as_ref(),
            house: house_raw.as_ref(),
            previous: None,
            newest: Some(extraction.document_type),
            shipment_id: &shipment_id,
            editor,
            reason,
            at: received_at,
        });

        let aggregate = ShipmentAggregate {
            master_number: extraction
                .master_number()
                .or_else(|| master_raw.as_ref().and_then(RawExtraction::master_number))
                .map(str::to_string),
            house_number: house_raw
                .as_ref()
                .and_then(RawExtraction::house_number)
                .map(str::to_string),
            raw_json: display_copy(&merged.fields),
            fields: merged.fields,
            master_raw,
            house_raw,
            created_at: received_at,
            created_by: editor.to_string(),
            updated_at: received_at,
            updated_by: editor.to_string(),
            updated_reason: reason.to_string(),
            shipment_id,
            version: 1,
        };

        PersistPlan {
            action: UpsertAction::Created,
            extraction,
            aggregates: vec![aggregate],
            received_at,
        }
    }

    fn update_aggregates(&self, resolution: Resolution) -> PersistPlan {
        let Resolution {
            extraction,
            targets,
            master_seed,
            received_at,
            ..
        } = resolution;
        let editor = self.config.editor();
        let reason = match extraction.document_type {
            DocumentType::Master => "master re-upload",
            DocumentType::House => "house re-upload",
        };

        let aggregates = targets
            .into_iter()
            .map(|target| {
                let (master_raw, house_raw) = match extraction.document_type {
                    DocumentType::Master => (Some(extraction.clone()), target.house_raw.clone()),
                    DocumentType::House => (
                        master_seed.clone().or_else(|| target.master_raw.clone()),
                        Some(extraction.clone()),
                    ),
                };

                let merged = self.reconciler.merge(&MergeRequest {
                    master: master_raw.as_ref(),
                    house: house_raw.as_ref(),
                    previous: Some(&target.fields),
                    newest: Some(extraction.document_type),
                    shipment_id: &target.shipment_id,
                    editor,
                    reason,
                    at: received_at,
                });

                let master_number = match extraction.document_type {
                    DocumentType::Master => target.master_number.clone(),
                    // House 可能更正所屬的 Master 號碼
                    DocumentType::House => extraction
                        .master_number()
                        .map(str::to_string)
                        .or_else(|| target.master_number.clone()),
                };
                let house_number = match extraction.document_type {
                    DocumentType::Master => target.house_number.clone(),
                    DocumentType::House => extraction.house_number().map(str::to_string),
                };

                ShipmentAggregate {
                    shipment_id: target.shipment_id,
                    master_number,
                    house_number,
                    raw_json: display_copy(&merged.fields),
                    fields: merged.fields,
                    master_raw,
                    house_raw,
                    created_at: target.created_at,
                    created_by: target.created_by,
                    updated_at: received_at,
                    updated_by: editor.to_string(),
                    updated_reason: reason.to_string(),
                    version: target.version + 1,
                }
            })
            .collect();

        PersistPlan {
            action: UpsertAction::Updated,
            extraction,
            aggregates,
            received_at,
        }
    }

    /// A house number may only ever belong to one shipment.
    async fn check_house_ownership(&self, plan: &PersistPlan) -> Result<()> {
        for aggregate in &plan.aggregates {
            let Some(house_number) = aggregate.house_number.as_deref() else {
                continue;
            };
            let Some(owner) = self.store.find_by_house_number(house_number).await? else {
                continue;
            };
            if owner.shipment_id == aggregate.shipment_id {
                continue;
            }

            return Err(match plan.action {
                UpsertAction::Created => ReconError::DuplicateHouseNumber {
                    house_number: house_number.to_string(),
                },
                UpsertAction::Updated => ReconError::Conflict {
                    house_number: house_number.to_string(),
                    existing_shipment_id: owner.shipment_id,
                },
            });
        }
        Ok(())
    }
}

/// Display copy of a merge; withheld while any discrepancy is unresolved.
pub fn display_copy(fields: &CanonicalShipment) -> Option<CanonicalShipment> {
    if fields.has_unresolved() {
        None
    } else {
        Some(fields.clone())
    }
}

#[async_trait::async_trait]
impl<S: ShipmentStore, C: ConfigProvider> Pipeline for UploadPipeline<S, C> {
    async fn resolve(&self, extraction: RawExtraction) -> Result<Resolution> {
        resolve::resolve(&self.store, extraction, Utc::now()).await
    }

    async fn reconcile(&self, resolution: Resolution) -> Result<PersistPlan> {
        let plan = if resolution.create_new {
            self.create_aggregate(resolution)
        } else {
            self.update_aggregates(resolution)
        };

        for aggregate in &plan.aggregates {
            let pending: Vec<&str> = aggregate
                .fields
                .unresolved()
                .map(|d| d.field.as_str())
                .collect();
            if !pending.is_empty() {
                tracing::info!(
                    "Shipment {} has {} field(s) awaiting arbitration: {}",
                    aggregate.shipment_id,
                    pending.len(),
                    pending.join(", ")
                );
            }
        }

        Ok(plan)
    }

    async fn persist(&self, plan: PersistPlan) -> Result<UpsertOutcome> {
        self.check_house_ownership(&plan).await?;

        let audit_action = match plan.action {
            UpsertAction::Created => AuditAction::Created,
            UpsertAction::Updated => AuditAction::Updated,
        };
        let affected_ids: Vec<String> = plan
            .aggregates
            .iter()
            .map(|a| a.shipment_id.clone())
            .collect();
        let is_broadcast = plan.extraction.document_type == DocumentType::Master
            && plan.action == UpsertAction::Updated
            && plan.aggregates.len() > 1;
        let master_number = plan
            .extraction
            .master_number()
            .unwrap_or_default()
            .to_string();
        let attempted = plan.aggregates.len();

        let mut batch = WriteBatch::new().archive(plan.extraction, plan.received_at);
        for aggregate in plan.aggregates {
            let entry = AuditEntry::for_aggregate(&aggregate, audit_action);
            batch = match plan.action {
                UpsertAction::Created => batch.create(aggregate),
                UpsertAction::Updated => batch.update(aggregate),
            }
            .audit(entry);
        }

        tracing::debug!("Committing {} write(s)", batch.len());
        match self.store.commit(batch).await {
            Ok(()) => Ok(UpsertOutcome {
                action: plan.action,
                affected_ids,
            }),
            Err(e) if is_broadcast && !e.is_lost_race() => Err(ReconError::PartialFailure {
                master_number,
                attempted,
                reason: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}
