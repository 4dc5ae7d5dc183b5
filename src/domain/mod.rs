// Domain model for plantrace: units, classification, caller context,
// and the sequence diagram being recorded.

pub mod caller;
pub mod classify;
pub mod diagram;
pub mod discovery;
pub mod instrument;
pub mod registry;
pub mod unit;
