//! hbmon-store: the filesystem boundary.
//!
//! Telemetry ledgers and test-event logs are stored as one JSON document
//! per id and are always rewritten whole. Retirement moves documents into
//! parallel archive directories.

pub mod error;
pub mod layout;
pub mod retire;
pub mod telemetry;
pub mod testers;

pub use error::{LoadWarning, StoreError};
pub use layout::StoreLayout;
pub use retire::{MoveOutcome, RetireReport, retire};
pub use telemetry::SessionLedger;
pub use testers::TestEventLedger;
