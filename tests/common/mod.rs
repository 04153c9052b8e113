#![allow(dead_code)]

use serde_json::json;
use shipment_recon::core::{ShipmentStore, WriteBatch};
use shipment_recon::domain::model::{AuditEntry, ShipmentAggregate};
use shipment_recon::{RawExtraction, ReconConfig, ReconEngine, Result, SqliteShipmentStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub type SqliteEngine = ReconEngine<SqliteShipmentStore, ReconConfig>;

pub fn memory_engine() -> SqliteEngine {
    let store = SqliteShipmentStore::open_in_memory().unwrap();
    ReconEngine::from_parts(store, ReconConfig::default()).unwrap()
}

pub fn master_doc(master_number: &str, vessel: &str, total_weight: u32) -> RawExtraction {
    RawExtraction::from_json_str(
        &json!({
            "documentType": "mbl",
            "shipper": { "name": "Origin Forwarding Ltd", "city": "Shanghai" },
            "consignee": { "name": "Destination Agent Inc", "city": "Los Angeles" },
            "shipment": {
                "mbl_number": master_number,
                "vessel": vessel,
                "voyage_number": "0421E",
                "port_of_loading": "CNSHA",
                "port_of_discharge": "USLAX",
                "total_weight": total_weight,
                "total_package": 40
            },
            "containers": [
                { "container_number": "MSCU1234567", "container_type": "40HC", "weight": total_weight }
            ],
            "freight_charges": []
        })
        .to_string(),
    )
    .unwrap()
}

pub fn house_doc(house_number: &str, master_number: &str, total_weight: u32) -> RawExtraction {
    RawExtraction::from_json_str(
        &json!({
            "documentType": "hbl",
            "shipper": { "name": "Acme Exports", "city": "Ningbo" },
            "consignee": { "name": "Buyer GmbH", "city": "Hamburg" },
            "notify_party": { "name": "Buyer GmbH" },
            "shipment": {
                "hbl_number": house_number,
                "master_number": master_number,
                "vessel_name": "Star (feeder)",
                "place_of_issue": "Ningbo",
                "total_weight": total_weight,
                "total_package": "40"
            },
            "freight_charges": [
                { "charge_name": "Ocean Freight", "amount": 1200, "unit(Currency)": "USD", "prepaid or collect": "P" }
            ]
        })
        .to_string(),
    )
    .unwrap()
}

/// Hides the next house-number lookup, as if another upload created the
/// shipment right after this one read the store.
pub struct StaleReadStore<S> {
    inner: S,
    hide_next_house_lookup: AtomicBool,
}

impl<S: ShipmentStore> StaleReadStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            hide_next_house_lookup: AtomicBool::new(false),
        }
    }

    pub fn hide_next_house_lookup(&self) {
        self.hide_next_house_lookup.store(true, Ordering::SeqCst);
    }
}

impl<S: ShipmentStore> ShipmentStore for StaleReadStore<S> {
    async fn find_by_master_number(&self, master_number: &str) -> Result<Vec<ShipmentAggregate>> {
        self.inner.find_by_master_number(master_number).await
    }

    async fn find_by_house_number(&self, house_number: &str) -> Result<Option<ShipmentAggregate>> {
        if self.hide_next_house_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_house_number(house_number).await
    }

    async fn find_by_id(&self, shipment_id: &str) -> Result<Option<ShipmentAggregate>> {
        self.inner.find_by_id(shipment_id).await
    }

    async fn latest_master_extraction(&self, master_number: &str) -> Result<Option<RawExtraction>> {
        self.inner.latest_master_extraction(master_number).await
    }

    async fn audit_trail(&self, shipment_id: &str) -> Result<Vec<AuditEntry>> {
        self.inner.audit_trail(shipment_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.inner.commit(batch).await
    }
}

/// Which read [`SlowReadStore`] holds up after it returns from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowRead {
    MasterLookup,
    ArchivedMaster,
}

const READ_DELAY: Duration = Duration::from_millis(50);

/// Sleeps after one kind of read, so a concurrent upload can commit between
/// this upload's read and its write.
pub struct SlowReadStore<S> {
    inner: S,
    slow: SlowRead,
}

impl<S: ShipmentStore> SlowReadStore<S> {
    pub fn new(inner: S, slow: SlowRead) -> Self {
        Self { inner, slow }
    }

    async fn pause(&self, read: SlowRead) {
        if self.slow == read {
            tokio::time::sleep(READ_DELAY).await;
        }
    }
}

impl<S: ShipmentStore> ShipmentStore for SlowReadStore<S> {
    async fn find_by_master_number(&self, master_number: &str) -> Result<Vec<ShipmentAggregate>> {
        let found = self.inner.find_by_master_number(master_number).await;
        self.pause(SlowRead::MasterLookup).await;
        found
    }

    async fn find_by_house_number(&self, house_number: &str) -> Result<Option<ShipmentAggregate>> {
        self.inner.find_by_house_number(house_number).await
    }

    async fn find_by_id(&self, shipment_id: &str) -> Result<Option<ShipmentAggregate>> {
        self.inner.find_by_id(shipment_id).await
    }

    async fn latest_master_extraction(&self, master_number: &str) -> Result<Option<RawExtraction>> {
        let found = self.inner.latest_master_extraction(master_number).await;
        self.pause(SlowRead::ArchivedMaster).await;
        found
    }

    async fn audit_trail(&self, shipment_id: &str) -> Result<Vec<AuditEntry>> {
        self.inner.audit_trail(shipment_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.inner.commit(batch).await
    }
}
