pub mod config;
pub mod coprocessor;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod report;
