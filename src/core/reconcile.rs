//! Field reconciliation: merges a Master and a House extraction into one
//! canonical record and reports disagreements on the discrepancy fields.
//!
//! Everything here is pure. Identical requests produce identical output.

use chrono::{DateTime, Utc};

use crate::core::ownership::OwnershipTable;
use crate::domain::extraction::{
    DocumentType, Party, PartyRole, RawExtraction, ShipmentField, ShipmentSection,
};
use crate::domain::model::{
    CanonicalShipment, Discrepancy, FieldStatus, InvolvedParty, ShipmentInfo, Side,
};

#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub master: Option<&'a RawExtraction>,
    pub house: Option<&'a RawExtraction>,
    /// The aggregate's current canonical record, if it already exists.
    pub previous: Option<&'a CanonicalShipment>,
    /// Type of the upload that triggered this merge; `None` for finalization.
    pub newest: Option<DocumentType>,
    pub shipment_id: &'a str,
    pub editor: &'a str,
    pub reason: &'a str,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub fields: CanonicalShipment,
    pub discrepancies: Vec<Discrepancy>,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    ownership: OwnershipTable,
}

impl Reconciler {
    pub fn new(ownership: OwnershipTable) -> Self {
        Self { ownership }
    }

    pub fn merge(&self, request: &MergeRequest<'_>) -> MergeOutput {
        let master = request.master;
        let house = request.house;

        let involved_party = InvolvedParty {
            shipper: self.merge_party(PartyRole::Shipper, master, house),
            consignee: self.merge_party(PartyRole::Consignee, master, house),
            notify_party: self.merge_party(PartyRole::NotifyParty, master, house),
            origin_agent: master.map(|m| m.shipper.clone()).unwrap_or_default(),
            destination_agent: master.map(|m| m.consignee.clone()).unwrap_or_default(),
        };

        let discrepancies = compare(master, house);

        let mut shipment = ShipmentSection::default();
        for field in ShipmentField::ALL {
            let value = if field.is_discrepancy_field() {
                discrepancy_value(field, master, house, &discrepancies, request.previous)
            } else {
                self.owned_value(field, master, house)
            };
            *shipment.slot_mut(field) = value;
        }

        let containers = pick_list(request, |e| e.containers.as_slice(), |p| p.containers.as_slice());
        let freight_charges = pick_list(
            request,
            |e| e.freight_charges.as_slice(),
            |p| p.freight_charges.as_slice(),
        );

        let fields = CanonicalShipment {
            shipment_info: ShipmentInfo {
                shipment_id: request.shipment_id.to_string(),
                updated_at: Some(request.at),
                updated_by: Some(request.editor.to_string()),
                updated_reason: Some(request.reason.to_string()),
            },
            involved_party,
            shipment,
            containers,
            freight_charges,
            validation_result: discrepancies.clone(),
        };

        MergeOutput {
            fields,
            discrepancies,
        }
    }

    fn merge_party(
        &self,
        role: PartyRole,
        master: Option<&RawExtraction>,
        house: Option<&RawExtraction>,
    ) -> Party {
        let master_party = master.map(|m| m.party(role)).filter(|p| p.is_supplied());
        let house_party = house.map(|h| h.party(role)).filter(|p| p.is_supplied());

        let picked = match self.ownership.party_owner(role) {
            Side::House => house_party.or(master_party),
            Side::Master => master_party.or(house_party),
        };
        picked.cloned().unwrap_or_default()
    }

    fn owned_value(
        &self,
        field: ShipmentField,
        master: Option<&RawExtraction>,
        house: Option<&RawExtraction>,
    ) -> Option<String> {
        let master_value = master.and_then(|m| m.field(field));
        let house_value = house.and_then(|h| h.field(field));

        let picked = match self.ownership.field_owner(field) {
            Side::House => house_value.or(master_value),
            Side::Master => master_value.or(house_value),
        };
        picked.map(str::to_string)
    }
}

/// Trim and stringify; absent values compare as the empty string.
pub fn normalize(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or_default().to_string()
}

/// Compares the discrepancy fields of two raw extractions.
///
/// Only meaningful when both documents are present; otherwise returns nothing.
pub fn compare(master: Option<&RawExtraction>, house: Option<&RawExtraction>) -> Vec<Discrepancy> {
    let (Some(master), Some(house)) = (master, house) else {
        return Vec::new();
    };

    ShipmentField::DISCREPANCY
        .iter()
        .map(|&field| {
            let master_value = master.shipment.slot(field).as_deref();
            let house_value = house.shipment.slot(field).as_deref();
            let matched = normalize(master_value) == normalize(house_value);

            Discrepancy {
                field: field.as_str().to_string(),
                status: if matched {
                    FieldStatus::Match
                } else {
                    FieldStatus::Mismatch
                },
                master_value: master_value.map(str::to_string),
                house_value: house_value.map(str::to_string),
                resolved: matched,
                resolved_value: if matched {
                    master_value
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                } else {
                    None
                },
            }
        })
        .collect()
}

fn discrepancy_value(
    field: ShipmentField,
    master: Option<&RawExtraction>,
    house: Option<&RawExtraction>,
    discrepancies: &[Discrepancy],
    previous: Option<&CanonicalShipment>,
) -> Option<String> {
    match discrepancies.iter().find(|d| d.field == field.as_str()) {
        Some(d) if d.status == FieldStatus::Match => d.resolved_value.clone(),
        // 不一致時不套用預設值，保留上一次確定的值等待人工裁決
        Some(_) => previous.and_then(|p| p.field(field)).map(str::to_string),
        None => master
            .and_then(|m| m.field(field))
            .or_else(|| house.and_then(|h| h.field(field)))
            .map(str::to_string),
    }
}

fn pick_list<T: Clone>(
    request: &MergeRequest<'_>,
    from_raw: impl Fn(&RawExtraction) -> &[T],
    from_previous: impl Fn(&CanonicalShipment) -> &[T],
) -> Vec<T> {
    let (newest, counterpart) = match request.newest {
        Some(DocumentType::Master) => (request.master, request.house),
        Some(DocumentType::House) => (request.house, request.master),
        None => (None, None),
    };

    // 依序：最新上傳 → 既有紀錄 → 另一份文件；定稿時沒有最新上傳
    let candidates = [
        newest.map(&from_raw),
        request.previous.map(&from_previous),
        counterpart.map(&from_raw),
        request.master.map(&from_raw),
        request.house.map(&from_raw),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|list| !list.is_empty())
        .map(<[T]>::to_vec)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::ContainerLine;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn master(weight: &str) -> RawExtraction {
        let mut m = RawExtraction::new(DocumentType::Master);
        m.set_field(ShipmentField::MasterNumber, Some("MBL1".to_string()));
        m.set_field(ShipmentField::VesselName, Some("Star".to_string()));
        m.set_field(ShipmentField::PortOfLoading, Some("CNSHA".to_string()));
        m.set_field(ShipmentField::TotalWeight, Some(weight.to_string()));
        m.shipper.name = Some("Origin Forwarding Ltd".to_string());
        m.consignee.name = Some("Destination Agent Inc".to_string());
        m
    }

    fn house(weight: &str) -> RawExtraction {
        let mut h = RawExtraction::new(DocumentType::House);
        h.set_field(ShipmentField::HouseNumber, Some("HBL1".to_string()));
        h.set_field(ShipmentField::MasterNumber, Some("MBL1".to_string()));
        h.set_field(ShipmentField::VesselName, Some("Star (feeder)".to_string()));
        h.set_field(ShipmentField::TotalWeight, Some(weight.to_string()));
        h.shipper.name = Some("Acme Exports".to_string());
        h.consignee.name = Some("Buyer GmbH".to_string());
        h
    }

    fn request<'a>(
        master: Option<&'a RawExtraction>,
        house: Option<&'a RawExtraction>,
        previous: Option<&'a CanonicalShipment>,
        newest: Option<DocumentType>,
    ) -> MergeRequest<'a> {
        MergeRequest {
            master,
            house,
            previous,
            newest,
            shipment_id: "ocn-test",
            editor: "tester",
            reason: "unit test",
            at: at(),
        }
    }

    fn status_of(output: &MergeOutput, field: ShipmentField) -> Option<FieldStatus> {
        output
            .discrepancies
            .iter()
            .find(|d| d.field == field.as_str())
            .map(|d| d.status)
    }

    #[test]
    fn test_float_weight_matches_integer_string() {
        let m = RawExtraction::from_json_str(
            r#"{"documentType": "mbl", "shipment": {"mbl_number": "MBL1", "total_weight": 100.0}}"#,
        )
        .unwrap();
        let h = house("100");

        let output = Reconciler::default().merge(&request(Some(&m), Some(&h), None, None));

        assert_eq!(status_of(&output, ShipmentField::TotalWeight), Some(FieldStatus::Match));
        assert_eq!(output.fields.field(ShipmentField::TotalWeight), Some("100"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let h = house("105");
        let req = request(Some(&m), Some(&h), None, Some(DocumentType::House));

        assert_eq!(reconciler.merge(&req), reconciler.merge(&req));
    }

    #[test]
    fn test_house_owned_and_master_owned_fields() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let h = house("100");

        let output = reconciler.merge(&request(Some(&m), Some(&h), None, Some(DocumentType::House)));
        let party = &output.fields.involved_party;

        assert_eq!(party.shipper.name.as_deref(), Some("Acme Exports"));
        assert_eq!(party.consignee.name.as_deref(), Some("Buyer GmbH"));
        assert_eq!(party.origin_agent.name.as_deref(), Some("Origin Forwarding Ltd"));
        assert_eq!(party.destination_agent.name.as_deref(), Some("Destination Agent Inc"));
        assert_eq!(output.fields.field(ShipmentField::VesselName), Some("Star"));
        assert_eq!(output.fields.field(ShipmentField::HouseNumber), Some("HBL1"));
    }

    #[test]
    fn test_single_source_wins_regardless_of_owner() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let mut h = house("100");
        h.shipper = Party::default();
        h.set_field(ShipmentField::VesselName, None);
        let mut m_without_ports = m.clone();
        m_without_ports.set_field(ShipmentField::PortOfLoading, None);
        h.set_field(ShipmentField::PortOfLoading, Some("SGSIN".to_string()));

        let output = reconciler.merge(&request(
            Some(&m_without_ports),
            Some(&h),
            None,
            Some(DocumentType::House),
        ));

        // House is silent on the shipper, so Master's value fills the gap.
        assert_eq!(
            output.fields.involved_party.shipper.name.as_deref(),
            Some("Origin Forwarding Ltd")
        );
        assert_eq!(output.fields.field(ShipmentField::VesselName), Some("Star"));
        assert_eq!(output.fields.field(ShipmentField::PortOfLoading), Some("SGSIN"));
    }

    #[test]
    fn test_both_sources_missing_yields_nulls() {
        let reconciler = Reconciler::default();
        let output = reconciler.merge(&request(None, None, None, None));

        assert!(output.discrepancies.is_empty());
        assert!(output.fields.field(ShipmentField::VesselName).is_none());
        assert_eq!(output.fields.involved_party, InvolvedParty::default());
        assert!(output.fields.containers.is_empty());
        assert_eq!(output.fields.shipment_info.shipment_id, "ocn-test");
    }

    #[test]
    fn test_whitespace_only_difference_is_a_match() {
        let reconciler = Reconciler::default();
        let m = master(" 100 ");
        let h = house("100");

        let output = reconciler.merge(&request(Some(&m), Some(&h), None, Some(DocumentType::House)));

        assert_eq!(status_of(&output, ShipmentField::TotalWeight), Some(FieldStatus::Match));
        assert_eq!(output.fields.field(ShipmentField::TotalWeight), Some("100"));
        assert!(!output.fields.has_unresolved());
    }

    #[test]
    fn test_mismatch_is_not_silently_defaulted() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let h = house("105");

        let output = reconciler.merge(&request(Some(&m), Some(&h), None, Some(DocumentType::House)));

        let weight = output
            .discrepancies
            .iter()
            .find(|d| d.field == "total_weight")
            .unwrap();
        assert_eq!(weight.status, FieldStatus::Mismatch);
        assert_eq!(weight.master_value.as_deref(), Some("100"));
        assert_eq!(weight.house_value.as_deref(), Some("105"));
        assert!(!weight.resolved);
        assert!(output.fields.field(ShipmentField::TotalWeight).is_none());
    }

    #[test]
    fn test_mismatch_holds_previous_value() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let h = house("105");
        let mut previous = CanonicalShipment::default();
        previous.shipment.total_weight = Some("100".to_string());

        let output = reconciler.merge(&request(
            Some(&m),
            Some(&h),
            Some(&previous),
            Some(DocumentType::House),
        ));

        assert_eq!(output.fields.field(ShipmentField::TotalWeight), Some("100"));
        assert!(output.fields.has_unresolved());
    }

    #[test]
    fn test_null_against_value_is_a_mismatch() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let mut h = house("100");
        h.set_field(ShipmentField::TotalVolume, Some("12 m3".to_string()));

        let output = reconciler.merge(&request(Some(&m), Some(&h), None, Some(DocumentType::House)));

        assert_eq!(status_of(&output, ShipmentField::TotalVolume), Some(FieldStatus::Mismatch));
        assert_eq!(status_of(&output, ShipmentField::TotalPackage), Some(FieldStatus::Match));
        assert_eq!(status_of(&output, ShipmentField::Extendable), Some(FieldStatus::Match));
    }

    #[test]
    fn test_single_document_reports_no_discrepancies() {
        let reconciler = Reconciler::default();
        let m = master("100");

        let output = reconciler.merge(&request(Some(&m), None, None, Some(DocumentType::Master)));

        assert!(output.discrepancies.is_empty());
        assert_eq!(output.fields.field(ShipmentField::TotalWeight), Some("100"));
    }

    #[test]
    fn test_newest_source_replaces_lists_wholesale() {
        let reconciler = Reconciler::default();
        let mut m = master("100");
        m.containers = vec![ContainerLine {
            container_number: Some("MSCU0000001".to_string()),
            ..ContainerLine::default()
        }];
        let mut h = house("100");
        h.containers = vec![
            ContainerLine {
                container_number: Some("HLXU0000001".to_string()),
                ..ContainerLine::default()
            },
            ContainerLine {
                container_number: Some("HLXU0000002".to_string()),
                ..ContainerLine::default()
            },
        ];

        let from_house = reconciler.merge(&request(Some(&m), Some(&h), None, Some(DocumentType::House)));
        assert_eq!(from_house.fields.containers, h.containers);

        let from_master = reconciler.merge(&request(
            Some(&m),
            Some(&h),
            Some(&from_house.fields),
            Some(DocumentType::Master),
        ));
        assert_eq!(from_master.fields.containers, m.containers);
    }

    #[test]
    fn test_omitted_list_keeps_previous() {
        let reconciler = Reconciler::default();
        let m = master("100");
        let h = house("100");
        let mut previous = CanonicalShipment::default();
        previous.containers = vec![ContainerLine {
            container_number: Some("OLDU0000001".to_string()),
            ..ContainerLine::default()
        }];

        let output = reconciler.merge(&request(
            Some(&m),
            Some(&h),
            Some(&previous),
            Some(DocumentType::Master),
        ));

        assert_eq!(output.fields.containers, previous.containers);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Some(" 100 ")), "100");
        assert_eq!(normalize(None), "");
        assert_eq!(normalize(Some("")), normalize(None));
    }
}
