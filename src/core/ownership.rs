use std::collections::BTreeMap;

use crate::domain::extraction::{PartyRole, ShipmentField};
use crate::domain::model::Side;
use crate::utils::error::{ReconError, Result};

/// Which document wins a field when both supply a value.
///
/// Keys are party roles (`shipper`, `consignee`, `notify_party`) and the
/// non-discrepancy shipment field names. Unlisted keys belong to Master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTable {
    owners: BTreeMap<&'static str, Side>,
}

impl OwnershipTable {
    pub fn known_keys() -> Vec<&'static str> {
        PartyRole::ALL
            .iter()
            .map(PartyRole::as_str)
            .chain(
                ShipmentField::ALL
                    .iter()
                    .filter(|f| !f.is_discrepancy_field())
                    .map(ShipmentField::as_str),
            )
            .collect()
    }

    /// Builds a table from explicit owner lists; later lists do not override earlier ones.
    pub fn from_lists(house: &[String], master: &[String]) -> Result<Self> {
        let known = Self::known_keys();
        let mut owners = BTreeMap::new();

        for (side, keys) in [(Side::House, house), (Side::Master, master)] {
            for key in keys {
                let canonical = known
                    .iter()
                    .copied()
                    .find(|k| *k == key.as_str())
                    .ok_or_else(|| ReconError::InvalidConfigValueError {
                        field: format!("ownership.{side}"),
                        value: key.clone(),
                        reason: "not an ownable field".to_string(),
                    })?;
                owners.entry(canonical).or_insert(side);
            }
        }

        Ok(Self { owners })
    }

    pub fn owner_of(&self, key: &str) -> Side {
        self.owners.get(key).copied().unwrap_or(Side::Master)
    }

    pub fn party_owner(&self, role: PartyRole) -> Side {
        self.owner_of(role.as_str())
    }

    pub fn field_owner(&self, field: ShipmentField) -> Side {
        self.owner_of(field.as_str())
    }
}

impl Default for OwnershipTable {
    /// House owns the commercial parties and its own issue details; Master owns the rest.
    fn default() -> Self {
        let mut owners = BTreeMap::new();
        for key in [
            PartyRole::Shipper.as_str(),
            PartyRole::Consignee.as_str(),
            PartyRole::NotifyParty.as_str(),
            ShipmentField::HouseNumber.as_str(),
            ShipmentField::PlaceOfIssue.as_str(),
            ShipmentField::DateOfIssue.as_str(),
        ] {
            owners.insert(key, Side::House);
        }
        Self { owners }
    }
}
