use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::extraction::{
    ChargeLine, ContainerLine, Party, RawExtraction, ShipmentField, ShipmentSection,
};
use crate::utils::error::{ReconError, Result};

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    pub shipment_id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    pub updated_reason: Option<String>,
}

/// Shipper/consignee come from House, agents from Master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvolvedParty {
    pub shipper: Party,
    pub consignee: Party,
    pub notify_party: Party,
    pub origin_agent: Party,
    pub destination_agent: Party,
}

/// The merged, per-shipment structure handed to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalShipment {
    pub shipment_info: ShipmentInfo,
    pub involved_party: InvolvedParty,
    pub shipment: ShipmentSection,
    pub containers: Vec<ContainerLine>,
    pub freight_charges: Vec<ChargeLine>,
    pub validation_result: Vec<Discrepancy>,
}

impl CanonicalShipment {
    pub fn field(&self, field: ShipmentField) -> Option<&str> {
        self.shipment.get(field)
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &Discrepancy> {
        self.validation_result.iter().filter(|d| !d.resolved)
    }

    pub fn has_unresolved(&self) -> bool {
        self.unresolved().next().is_some()
    }
}

// ---------------------------------------------------------------------------
// Discrepancies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Match,
    Mismatch,
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Mismatch => write!(f, "mismatch"),
        }
    }
}

/// Which document a value, or a user's pick, comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Master,
    House,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::House => write!(f, "house"),
        }
    }
}

impl FromStr for Side {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "master" | "mbl" => Ok(Self::Master),
            "house" | "hbl" => Ok(Self::House),
            other => Err(ReconError::validation(format!(
                "unknown side '{other}', expected master or house"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub field: String,
    pub status: FieldStatus,
    pub master_value: Option<String>,
    pub house_value: Option<String>,
    /// Match, or a mismatch the user has arbitrated.
    pub resolved: bool,
    pub resolved_value: Option<String>,
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentAggregate {
    pub shipment_id: String,
    pub master_number: Option<String>,
    pub house_number: Option<String>,
    pub fields: CanonicalShipment,
    /// Display-ready canonical record; `None` while arbitration is pending.
    pub raw_json: Option<CanonicalShipment>,
    pub master_raw: Option<RawExtraction>,
    pub house_raw: Option<RawExtraction>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_reason: String,
    /// Bumped on every stored write; an update only lands on the version it was read at.
    #[serde(default)]
    pub version: i64,
}

impl ShipmentAggregate {
    pub fn containers(&self) -> &[ContainerLine] {
        &self.fields.containers
    }

    pub fn freight_charges(&self) -> &[ChargeLine] {
        &self.fields.freight_charges
    }

    pub fn discrepancies(&self) -> &[Discrepancy] {
        &self.fields.validation_result
    }

    pub fn is_display_ready(&self) -> bool {
        self.raw_json.is_some()
    }

    pub fn raw(&self, side: Side) -> Option<&RawExtraction> {
        match side {
            Side::Master => self.master_raw.as_ref(),
            Side::House => self.house_raw.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Upsert results + audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub affected_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Finalized,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Finalized => "finalized",
        }
    }
}

impl FromStr for AuditAction {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "finalized" => Ok(Self::Finalized),
            other => Err(ReconError::validation(format!("unknown audit action '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub shipment_id: String,
    pub action: AuditAction,
    pub reason: String,
    pub editor: String,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn for_aggregate(aggregate: &ShipmentAggregate, action: AuditAction) -> Self {
        Self {
            shipment_id: aggregate.shipment_id.clone(),
            action,
            reason: aggregate.updated_reason.clone(),
            editor: aggregate.updated_by.clone(),
            at: aggregate.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Output of identity resolution: which aggregates an upload touches.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub extraction: RawExtraction,
    pub targets: Vec<ShipmentAggregate>,
    pub create_new: bool,
    /// Master-side input for a House upload, looked up by its declared master number.
    pub master_seed: Option<RawExtraction>,
    pub received_at: DateTime<Utc>,
}

/// Output of reconciliation: fully merged aggregates ready to be written.
#[derive(Debug, Clone)]
pub struct PersistPlan {
    pub action: UpsertAction,
    pub extraction: RawExtraction,
    pub aggregates: Vec<ShipmentAggregate>,
    pub received_at: DateTime<Utc>,
}
