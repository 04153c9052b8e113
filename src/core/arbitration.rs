//! Human arbitration of mismatched discrepancy fields.
//!
//! A session is a value: every pick consumes the session and returns a new
//! one. The stored extractions are never modified; picks land on working
//! copies that are handed to finalization.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::reconcile::{compare, normalize};
use crate::domain::extraction::{RawExtraction, ShipmentField};
use crate::domain::model::{Discrepancy, FieldStatus, ShipmentAggregate, Side};
use crate::utils::error::{ReconError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrationRow {
    pub field: String,
    pub master_value: Option<String>,
    pub house_value: Option<String>,
    /// Always computed from the original extractions.
    pub status: FieldStatus,
    pub pick: Option<Side>,
    pub resolved: bool,
}

#[derive(Debug, Clone)]
pub struct ArbitrationSession {
    shipment_id: String,
    master_original: RawExtraction,
    house_original: RawExtraction,
    master_working: RawExtraction,
    house_working: RawExtraction,
    picks: BTreeMap<ShipmentField, Side>,
}

impl ArbitrationSession {
    /// Starts from the aggregate's newest originals; earlier picks are not carried over.
    pub fn open(aggregate: &ShipmentAggregate) -> Result<Self> {
        let originals = (aggregate.raw(Side::Master), aggregate.raw(Side::House));
        let (Some(master), Some(house)) = originals else {
            let missing = if originals.0.is_none() { Side::Master } else { Side::House };
            return Err(ReconError::validation(format!(
                "shipment {} has no {missing} document to arbitrate against",
                aggregate.shipment_id
            )));
        };

        Ok(Self {
            shipment_id: aggregate.shipment_id.clone(),
            master_original: master.clone(),
            house_original: house.clone(),
            master_working: master.clone(),
            house_working: house.clone(),
            picks: BTreeMap::new(),
        })
    }

    pub fn shipment_id(&self) -> &str {
        &self.shipment_id
    }

    pub fn rows(&self) -> Vec<ArbitrationRow> {
        compare(Some(&self.master_original), Some(&self.house_original))
            .into_iter()
            .map(|d| {
                let pick = d
                    .field
                    .parse::<ShipmentField>()
                    .ok()
                    .and_then(|f| self.picks.get(&f).copied());
                ArbitrationRow {
                    resolved: d.status == FieldStatus::Match || pick.is_some(),
                    field: d.field,
                    master_value: d.master_value,
                    house_value: d.house_value,
                    status: d.status,
                    pick,
                }
            })
            .collect()
    }

    /// Takes `side`'s original value for `field` into both working copies.
    pub fn select(mut self, field: ShipmentField, side: Side) -> Result<Self> {
        if !field.is_discrepancy_field() {
            return Err(ReconError::validation(format!(
                "{field} is not arbitrated; choose one of {}",
                ShipmentField::DISCREPANCY
                    .iter()
                    .map(ShipmentField::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let original = match side {
            Side::Master => &self.master_original,
            Side::House => &self.house_original,
        };
        let value = original.shipment.slot(field).clone();

        self.master_working.set_field(field, value.clone());
        self.house_working.set_field(field, value);
        self.picks.insert(field, side);

        tracing::debug!("Shipment {}: {} resolved from {}", self.shipment_id, field, side);
        Ok(self)
    }

    pub fn resolved_count(&self) -> usize {
        self.rows().iter().filter(|r| r.resolved).count()
    }

    pub fn pending_fields(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .filter(|r| !r.resolved)
            .map(|r| r.field)
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.rows().iter().all(|r| r.resolved)
    }

    pub fn working_copies(&self) -> (&RawExtraction, &RawExtraction) {
        (&self.master_working, &self.house_working)
    }

    pub fn into_working_copies(self) -> (RawExtraction, RawExtraction) {
        (self.master_working, self.house_working)
    }
}

/// Discrepancy report for a finalized record.
///
/// Status comes from the originals; a field is resolved when it matched
/// originally or the working copies now agree on it.
pub fn annotate_against_originals(
    master_original: Option<&RawExtraction>,
    house_original: Option<&RawExtraction>,
    master_working: &RawExtraction,
    house_working: &RawExtraction,
) -> Vec<Discrepancy> {
    compare(master_original, house_original)
        .into_iter()
        .map(|mut d| {
            let Ok(field) = d.field.parse::<ShipmentField>() else {
                return d;
            };
            let working_master = master_working.shipment.slot(field).as_deref();
            let working_house = house_working.shipment.slot(field).as_deref();

            if normalize(working_master) == normalize(working_house) {
                d.resolved = true;
                d.resolved_value = working_master
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
            d
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::DocumentType;
    use crate::domain::model::CanonicalShipment;
    use chrono::Utc;

    fn aggregate(master_weight: &str, house_weight: &str) -> ShipmentAggregate {
        let mut master = RawExtraction::new(DocumentType::Master);
        master.set_field(ShipmentField::MasterNumber, Some("MBL1".to_string()));
        master.set_field(ShipmentField::TotalWeight, Some(master_weight.to_string()));
        master.set_field(ShipmentField::TotalPackage, Some("10".to_string()));

        let mut house = RawExtraction::new(DocumentType::House);
        house.set_field(ShipmentField::HouseNumber, Some("HBL1".to_string()));
        house.set_field(ShipmentField::TotalWeight, Some(house_weight.to_string()));
        house.set_field(ShipmentField::TotalPackage, Some("12".to_string()));

        let now = Utc::now();
        ShipmentAggregate {
            shipment_id: "ocn-1".to_string(),
            master_number: Some("MBL1".to_string()),
            house_number: Some("HBL1".to_string()),
            fields: CanonicalShipment::default(),
            raw_json: None,
            master_raw: Some(master),
            house_raw: Some(house),
            created_at: now,
            created_by: "tester".to_string(),
            updated_at: now,
            updated_by: "tester".to_string(),
            updated_reason: "test".to_string(),
            version: 1,
        }
    }

    #[test]
    fn test_rows_start_from_originals() {
        let session = ArbitrationSession::open(&aggregate("100", "105")).unwrap();

        let rows = session.rows();
        assert_eq!(rows.len(), ShipmentField::DISCREPANCY.len());
        assert_eq!(session.resolved_count(), 2);
        assert_eq!(session.pending_fields(), vec!["total_weight", "total_package"]);
        assert!(!session.is_fully_resolved());
    }

    #[test]
    fn test_select_resolves_without_changing_displayed_status() {
        let session = ArbitrationSession::open(&aggregate("100", "105"))
            .unwrap()
            .select(ShipmentField::TotalWeight, Side::Master)
            .unwrap();

        let weight = session
            .rows()
            .into_iter()
            .find(|r| r.field == "total_weight")
            .unwrap();
        assert_eq!(weight.status, FieldStatus::Mismatch);
        assert_eq!(weight.pick, Some(Side::Master));
        assert!(weight.resolved);
        assert_eq!(weight.house_value.as_deref(), Some("105"));

        let (master, house) = session.working_copies();
        assert_eq!(master.field(ShipmentField::TotalWeight), Some("100"));
        assert_eq!(house.field(ShipmentField::TotalWeight), Some("100"));
    }

    #[test]
    fn test_repicking_replaces_previous_choice() {
        let session = ArbitrationSession::open(&aggregate("100", "105"))
            .unwrap()
            .select(ShipmentField::TotalWeight, Side::Master)
            .unwrap()
            .select(ShipmentField::TotalWeight, Side::House)
            .unwrap()
            .select(ShipmentField::TotalPackage, Side::House)
            .unwrap();

        assert!(session.is_fully_resolved());
        let (master, house) = session.into_working_copies();
        assert_eq!(master.field(ShipmentField::TotalWeight), Some("105"));
        assert_eq!(house.field(ShipmentField::TotalPackage), Some("12"));
        assert_eq!(master.field(ShipmentField::TotalPackage), Some("12"));
    }

    #[test]
    fn test_select_rejects_non_arbitrated_field() {
        let session = ArbitrationSession::open(&aggregate("100", "105")).unwrap();
        let result = session.select(ShipmentField::VesselName, Side::Master);
        assert!(matches!(result, Err(ReconError::Validation { .. })));
    }

    #[test]
    fn test_open_requires_both_documents() {
        let mut agg = aggregate("100", "100");
        agg.house_raw = None;

        let err = ArbitrationSession::open(&agg).unwrap_err();
        assert!(err.to_string().contains("no house document"));

        let mut agg = aggregate("100", "100");
        agg.master_raw = None;

        let err = ArbitrationSession::open(&agg).unwrap_err();
        assert!(err.to_string().contains("no master document"));
    }

    #[test]
    fn test_annotation_keeps_original_status() {
        let agg = aggregate("100", "105");
        let session = ArbitrationSession::open(&agg)
            .unwrap()
            .select(ShipmentField::TotalWeight, Side::Master)
            .unwrap();
        let (master, house) = session.working_copies();

        let report = annotate_against_originals(
            agg.master_raw.as_ref(),
            agg.house_raw.as_ref(),
            master,
            house,
        );

        let weight = report.iter().find(|d| d.field == "total_weight").unwrap();
        assert_eq!(weight.status, FieldStatus::Mismatch);
        assert!(weight.resolved);
        assert_eq!(weight.resolved_value.as_deref(), Some("100"));

        let package = report.iter().find(|d| d.field == "total_package").unwrap();
        assert!(!package.resolved);
    }
}
