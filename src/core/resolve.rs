use chrono::{DateTime, Utc};

use crate::core::ShipmentStore;
use crate::domain::extraction::{DocumentType, RawExtraction};
use crate::domain::model::Resolution;
use crate::utils::error::{ReconError, Result};

/// Rejects an extraction that lacks its own correlation key.
pub fn validate_extraction(extraction: &RawExtraction) -> Result<&str> {
    extraction.own_number().ok_or_else(|| {
        let key = match extraction.document_type {
            DocumentType::Master => "master_number",
            DocumentType::House => "house_number",
        };
        ReconError::validation(format!(
            "{} document has no {key}",
            extraction.document_type
        ))
    })
}

/// Finds the aggregates an upload belongs to.
///
/// Master uploads target every aggregate sharing the master number; House
/// uploads target at most the one aggregate owning the house number.
pub async fn resolve<S: ShipmentStore>(
    store: &S,
    extraction: RawExtraction,
    received_at: DateTime<Utc>,
) -> Result<Resolution> {
    let own_number = validate_extraction(&extraction)?.to_string();

    match extraction.document_type {
        DocumentType::Master => {
            let targets = store.find_by_master_number(&own_number).await?;
            tracing::debug!(
                "Master {} matches {} existing shipment(s)",
                own_number,
                targets.len()
            );

            Ok(Resolution {
                create_new: targets.is_empty(),
                targets,
                master_seed: None,
                extraction,
                received_at,
            })
        }
        DocumentType::House => {
            let existing = store.find_by_house_number(&own_number).await?;

            let archived = match extraction.master_number() {
                Some(declared) => store.latest_master_extraction(declared).await?,
                None => None,
            };
            // 沒有存檔的 Master 時沿用既有紀錄的 Master 端資料
            let master_seed =
                archived.or_else(|| existing.as_ref().and_then(|a| a.master_raw.clone()));

            tracing::debug!(
                "House {} {}, master seed {}",
                own_number,
                if existing.is_some() { "exists" } else { "is new" },
                if master_seed.is_some() { "found" } else { "missing" }
            );

            Ok(Resolution {
                create_new: existing.is_none(),
                targets: existing.into_iter().collect(),
                master_seed,
                extraction,
                received_at,
            })
        }
    }
}
