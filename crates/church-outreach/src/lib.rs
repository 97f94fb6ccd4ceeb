//! Outbound SMS and WhatsApp campaign dispatch for church outreach.
//!
//! A campaign resolves a targeting spec into recipients, renders the message for each of them,
//! fans it out through a channel adapter and records every delivery outcome in the campaign
//! ledger, which in turn backs history queries and CSV exports.

pub mod campaigns;
pub mod config;
pub mod error;
pub mod telemetry;
