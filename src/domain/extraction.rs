//! Typed view over the output of the external extraction service.
//!
//! Extractions are untrusted: every scalar is optional, numbers and booleans are
//! stringified on the way in, and missing sections default to empty values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::{ReconError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Master,
    House,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::House => "house",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" | "mbl" | "master_bill_of_lading" => Ok(Self::Master),
            "house" | "hbl" | "house_bill_of_lading" => Ok(Self::House),
            other => Err(ReconError::validation(format!("unknown document type '{other}'"))),
        }
    }
}

impl<'de> Deserialize<'de> for DocumentType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub postal_code: Option<String>,
}

impl Party {
    /// A party counts as supplied when at least its name or address is non-blank.
    pub fn is_supplied(&self) -> bool {
        non_blank(&self.name).is_some() || non_blank(&self.address).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartyRole {
    Shipper,
    Consignee,
    NotifyParty,
}

impl PartyRole {
    pub const ALL: [PartyRole; 3] = [Self::Shipper, Self::Consignee, Self::NotifyParty];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shipper => "shipper",
            Self::Consignee => "consignee",
            Self::NotifyParty => "notify_party",
        }
    }
}

/// Closed list of scalar fields in the `shipment` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShipmentField {
    MasterNumber,
    HouseNumber,
    CarrierScacCode,
    CarrierBookingNumber,
    VesselName,
    VoyageNumber,
    PortOfLoading,
    PortOfDischarge,
    PlaceOfReceipt,
    PlaceOfDelivery,
    PlaceOfRelease,
    DateOfRelease,
    PlaceOfIssue,
    DateOfIssue,
    ShippedOnBoardDate,
    Mode,
    FreightTerm,
    FreightService,
    TotalNumberOfContainers,
    TotalWeight,
    TotalVolume,
    TotalPackage,
    Extendable,
}

impl ShipmentField {
    pub const ALL: [ShipmentField; 23] = [
        Self::MasterNumber,
        Self::HouseNumber,
        Self::CarrierScacCode,
        Self::CarrierBookingNumber,
        Self::VesselName,
        Self::VoyageNumber,
        Self::PortOfLoading,
        Self::PortOfDischarge,
        Self::PlaceOfReceipt,
        Self::PlaceOfDelivery,
        Self::PlaceOfRelease,
        Self::DateOfRelease,
        Self::PlaceOfIssue,
        Self::DateOfIssue,
        Self::ShippedOnBoardDate,
        Self::Mode,
        Self::FreightTerm,
        Self::FreightService,
        Self::TotalNumberOfContainers,
        Self::TotalWeight,
        Self::TotalVolume,
        Self::TotalPackage,
        Self::Extendable,
    ];

    /// Fields that must agree across Master and House.
    pub const DISCREPANCY: [ShipmentField; 4] = [
        Self::TotalWeight,
        Self::TotalVolume,
        Self::TotalPackage,
        Self::Extendable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterNumber => "master_number",
            Self::HouseNumber => "house_number",
            Self::CarrierScacCode => "carrier_scac_code",
            Self::CarrierBookingNumber => "carrier_booking_number",
            Self::VesselName => "vessel_name",
            Self::VoyageNumber => "voyage_number",
            Self::PortOfLoading => "port_of_loading",
            Self::PortOfDischarge => "port_of_discharge",
            Self::PlaceOfReceipt => "place_of_receipt",
            Self::PlaceOfDelivery => "place_of_delivery",
            Self::PlaceOfRelease => "place_of_release",
            Self::DateOfRelease => "date_of_release",
            Self::PlaceOfIssue => "place_of_issue",
            Self::DateOfIssue => "date_of_issue",
            Self::ShippedOnBoardDate => "shipped_on_board_date",
            Self::Mode => "mode",
            Self::FreightTerm => "freight_term",
            Self::FreightService => "freight_service",
            Self::TotalNumberOfContainers => "total_number_of_containers",
            Self::TotalWeight => "total_weight",
            Self::TotalVolume => "total_volume",
            Self::TotalPackage => "total_package",
            Self::Extendable => "extendable",
        }
    }

    pub fn is_discrepancy_field(&self) -> bool {
        Self::DISCREPANCY.contains(self)
    }
}

impl fmt::Display for ShipmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentField {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == wanted)
            .ok_or_else(|| ReconError::validation(format!("unknown shipment field '{wanted}'")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentSection {
    #[serde(default, deserialize_with = "lenient::string")]
    pub master_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub house_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub carrier_scac_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub carrier_booking_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub vessel_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub voyage_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub port_of_loading: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub port_of_discharge: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub place_of_receipt: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub place_of_delivery: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub place_of_release: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date_of_release: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub place_of_issue: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub date_of_issue: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub shipped_on_board_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub freight_term: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub freight_service: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub total_number_of_containers: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub total_weight: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub total_volume: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub total_package: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub extendable: Option<String>,
}

impl ShipmentSection {
    pub fn slot(&self, field: ShipmentField) -> &Option<String> {
        match field {
            ShipmentField::MasterNumber => &self.master_number,
            ShipmentField::HouseNumber => &self.house_number,
            ShipmentField::CarrierScacCode => &self.carrier_scac_code,
            ShipmentField::CarrierBookingNumber => &self.carrier_booking_number,
            ShipmentField::VesselName => &self.vessel_name,
            ShipmentField::VoyageNumber => &self.voyage_number,
            ShipmentField::PortOfLoading => &self.port_of_loading,
            ShipmentField::PortOfDischarge => &self.port_of_discharge,
            ShipmentField::PlaceOfReceipt => &self.place_of_receipt,
            ShipmentField::PlaceOfDelivery => &self.place_of_delivery,
            ShipmentField::PlaceOfRelease => &self.place_of_release,
            ShipmentField::DateOfRelease => &self.date_of_release,
            ShipmentField::PlaceOfIssue => &self.place_of_issue,
            ShipmentField::DateOfIssue => &self.date_of_issue,
            ShipmentField::ShippedOnBoardDate => &self.shipped_on_board_date,
            ShipmentField::Mode => &self.mode,
            ShipmentField::FreightTerm => &self.freight_term,
            ShipmentField::FreightService => &self.freight_service,
            ShipmentField::TotalNumberOfContainers => &self.total_number_of_containers,
            ShipmentField::TotalWeight => &self.total_weight,
            ShipmentField::TotalVolume => &self.total_volume,
            ShipmentField::TotalPackage => &self.total_package,
            ShipmentField::Extendable => &self.extendable,
        }
    }

    pub fn slot_mut(&mut self, field: ShipmentField) -> &mut Option<String> {
        match field {
            ShipmentField::MasterNumber => &mut self.master_number,
            ShipmentField::HouseNumber => &mut self.house_number,
            ShipmentField::CarrierScacCode => &mut self.carrier_scac_code,
            ShipmentField::CarrierBookingNumber => &mut self.carrier_booking_number,
            ShipmentField::VesselName => &mut self.vessel_name,
            ShipmentField::VoyageNumber => &mut self.voyage_number,
            ShipmentField::PortOfLoading => &mut self.port_of_loading,
            ShipmentField::PortOfDischarge => &mut self.port_of_discharge,
            ShipmentField::PlaceOfReceipt => &mut self.place_of_receipt,
            ShipmentField::PlaceOfDelivery => &mut self.place_of_delivery,
            ShipmentField::PlaceOfRelease => &mut self.place_of_release,
            ShipmentField::DateOfRelease => &mut self.date_of_release,
            ShipmentField::PlaceOfIssue => &mut self.place_of_issue,
            ShipmentField::DateOfIssue => &mut self.date_of_issue,
            ShipmentField::ShippedOnBoardDate => &mut self.shipped_on_board_date,
            ShipmentField::Mode => &mut self.mode,
            ShipmentField::FreightTerm => &mut self.freight_term,
            ShipmentField::FreightService => &mut self.freight_service,
            ShipmentField::TotalNumberOfContainers => &mut self.total_number_of_containers,
            ShipmentField::TotalWeight => &mut self.total_weight,
            ShipmentField::TotalVolume => &mut self.total_volume,
            ShipmentField::TotalPackage => &mut self.total_package,
            ShipmentField::Extendable => &mut self.extendable,
        }
    }

    /// Non-blank value of `field`.
    pub fn get(&self, field: ShipmentField) -> Option<&str> {
        non_blank(self.slot(field))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLine {
    #[serde(default, deserialize_with = "lenient::string")]
    pub container_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub seal_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub container_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub number_of_packages: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub package_uom: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub weight: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub weight_uom: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub volume: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub volume_uom: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub product_item_description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub product_item_hscode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeLine {
    #[serde(default, deserialize_with = "lenient::string")]
    pub charge_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub rate: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub quantity: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub amount: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub prepaid_or_collect: Option<String>,
}

/// One uploaded document as produced by the extraction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct RawExtraction {
    #[serde(rename = "documentType")]
    pub document_type: DocumentType,
    pub shipper: Party,
    pub consignee: Party,
    pub notify_party: Party,
    pub shipment: ShipmentSection,
    pub containers: Vec<ContainerLine>,
    pub freight_charges: Vec<ChargeLine>,
}

/// Wire shape of [`RawExtraction`] once alternate key spellings are folded away.
#[derive(Deserialize)]
struct ExtractionPayload {
    #[serde(rename = "documentType")]
    document_type: DocumentType,
    #[serde(default, deserialize_with = "lenient::object")]
    shipper: Party,
    #[serde(default, deserialize_with = "lenient::object")]
    consignee: Party,
    #[serde(default, deserialize_with = "lenient::object")]
    notify_party: Party,
    #[serde(default, deserialize_with = "lenient::object")]
    shipment: ShipmentSection,
    #[serde(default, deserialize_with = "lenient::list")]
    containers: Vec<ContainerLine>,
    #[serde(default, deserialize_with = "lenient::list")]
    freight_charges: Vec<ChargeLine>,
}

impl TryFrom<serde_json::Value> for RawExtraction {
    type Error = serde_json::Error;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        let payload: ExtractionPayload =
            serde_json::from_value(lenient::dealias(
            value,
            <RawExtraction as lenient::Aliased>::ALIASES,
        ))?;
        Ok(Self {
            document_type: payload.document_type,
            shipper: payload.shipper,
            consignee: payload.consignee,
            notify_party: payload.notify_party,
            shipment: payload.shipment,
            containers: payload.containers,
            freight_charges: payload.freight_charges,
        })
    }
}

impl lenient::Aliased for RawExtraction {
    const ALIASES: lenient::AliasTable = &[("documentType", &["document_type", "fileType"])];
}

impl lenient::Aliased for Party {
    const ALIASES: lenient::AliasTable = &[];
}

impl lenient::Aliased for ShipmentSection {
    const ALIASES: lenient::AliasTable = &[
        ("master_number", &["mbl_number"]),
        ("house_number", &["hbl_number"]),
        ("vessel_name", &["vessel"]),
        ("mode", &["freight_mode"]),
        ("total_volume", &["total_volumn"]),
    ];
}

impl lenient::Aliased for ContainerLine {
    const ALIASES: lenient::AliasTable = &[
        ("number_of_packages", &["packages"]),
        ("product_item_description", &["description"]),
        ("product_item_hscode", &["hs_code"]),
    ];
}

impl lenient::Aliased for ChargeLine {
    const ALIASES: lenient::AliasTable = &[
        ("unit", &["unit(Currency)", "currency"]),
        ("prepaid_or_collect", &["prepaid or collect"]),
    ];
}

impl RawExtraction {
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            shipper: Party::default(),
            consignee: Party::default(),
            notify_party: Party::default(),
            shipment: ShipmentSection::default(),
            containers: Vec::new(),
            freight_charges: Vec::new(),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn master_number(&self) -> Option<&str> {
        self.shipment.get(ShipmentField::MasterNumber)
    }

    pub fn house_number(&self) -> Option<&str> {
        self.shipment.get(ShipmentField::HouseNumber)
    }

    /// The correlation key this document is identified by.
    pub fn own_number(&self) -> Option<&str> {
        match self.document_type {
            DocumentType::Master => self.master_number(),
            DocumentType::House => self.house_number(),
        }
    }

    pub fn party(&self, role: PartyRole) -> &Party {
        match role {
            PartyRole::Shipper => &self.shipper,
            PartyRole::Consignee => &self.consignee,
            PartyRole::NotifyParty => &self.notify_party,
        }
    }

    pub fn field(&self, field: ShipmentField) -> Option<&str> {
        self.shipment.get(field)
    }

    pub fn set_field(&mut self, field: ShipmentField, value: Option<String>) {
        *self.shipment.slot_mut(field) = value;
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// `(canonical key, alternate spellings)` pairs, checked in order.
    pub type AliasTable = &'static [(&'static str, &'static [&'static str])];

    pub trait Aliased {
        const ALIASES: AliasTable;
    }

    /// Folds alternate key spellings into the canonical key.
    ///
    /// The first non-blank value wins, canonical key first; alternates are
    /// always removed so a payload carrying several spellings still parses.
    pub fn dealias(value: Value, aliases: AliasTable) -> Value {
        let Value::Object(mut map) = value else {
            return value;
        };
        for (canonical, alternates) in aliases {
            let original = map.remove(*canonical);
            let mut picked = original.clone().filter(is_supplied);
            for alternate in *alternates {
                let candidate = map.remove(*alternate);
                if picked.is_none() {
                    picked = candidate.filter(is_supplied);
                }
            }
            if let Some(v) = picked.or(original) {
                map.insert(canonical.to_string(), v);
            }
        }
        Value::Object(map)
    }

    fn is_supplied(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    /// Accepts strings, numbers, booleans or null; never fails on a scalar.
    pub fn string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.and_then(stringify))
    }

    /// Integral floats render without a fraction, so `100.0` reads as `"100"`.
    pub fn stringify(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
                Some(f) if n.is_f64() => f.to_string(),
                _ => n.to_string(),
            }),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Null or a non-object falls back to the default value.
    pub fn object<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default + Aliased,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            Some(v @ Value::Object(_)) => {
                serde_json::from_value(dealias(v, T::ALIASES)).map_err(serde::de::Error::custom)
            }
            _ => Ok(T::default()),
        }
    }

    /// Null becomes an empty list; entries that are not objects are skipped.
    pub fn list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Aliased,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        let Some(Value::Array(items)) = value else {
            return Ok(Vec::new());
        };
        items
            .into_iter()
            .filter(Value::is_object)
            .map(|item| {
                serde_json::from_value(dealias(item, T::ALIASES)).map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
