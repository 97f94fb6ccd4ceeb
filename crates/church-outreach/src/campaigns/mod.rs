//! Campaign dispatch pipeline: targeting, rendering, channel fan-out, ledger and export.

pub mod audit;
pub mod dispatcher;
pub mod domain;
pub mod export;
pub mod ledger;
pub mod phone;
pub mod recipients;
pub mod roster;
pub mod router;
pub mod sender;
pub mod template;

#[cfg(test)]
mod tests;

pub use audit::{AuditEntry, AuditError, AuditSink, InMemoryAuditLog, TracingAuditLog};
pub use dispatcher::{
    BatchDispatcher, DeliveryReport, DispatchError, DispatchRequest, TestSendRequest,
};
pub use domain::{
    Batch, BatchId, BatchStatus, BatchSummary, Channel, DeliveryOutcome, DeliveryStatus,
    DepartmentId, GroupId, MemberId, Recipient, RecipientType, RenderedMessage, TemplateId,
};
pub use export::{CampaignExporter, ExportError};
pub use ledger::{
    BatchQuery, CampaignLedger, DateRange, FileLedger, InMemoryLedger, LedgerError, OutcomeQuery,
};
pub use recipients::{
    AdHocRecipient, DirectoryError, Member, MemberDirectory, RecipientResolver, TargetingSpec,
};
pub use roster::{MemberRoster, RosterError};
pub use router::campaign_router;
pub use sender::{
    ChannelSender, DryRunTransport, HttpCarrierTransport, SenderRegistry, SmsSender,
    WhatsAppSender,
};
pub use template::{InMemoryTemplateStore, MessageSource, TemplateEngine, TemplateStore};
