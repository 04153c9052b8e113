// Adapters layer: concrete implementations of the domain ports.

pub mod sqlite;

pub use sqlite::SqliteShipmentStore;
