//! Human-reviewed tool governance.
//!
//! Agents propose tools as source; a [`Reviewer`] approves or declines each
//! proposal; approved tools are versioned in the [`ToolCatalog`], published to
//! the live registry, and guarded by a `tool.<name>` scope. An [`Agent`] runs
//! tools only when its identity holds every scope the tool needs.
//! [`Governance`] wires the whole stack from configuration.

#![warn(missing_docs, clippy::pedantic)]

pub mod agent;
pub mod approval;
pub mod catalog;
pub mod deps;
mod error;
pub mod governor;
pub mod rejection;
pub mod runtime;

pub use agent::Agent;
pub use approval::{
    PendingReview, ReviewDecision, ReviewInbox, ReviewQueue, ReviewSubject, Reviewer,
    review_queue,
};
pub use catalog::{CatalogEntries, Restored, ToolCatalog, ToolRecord, ToolVersion};
pub use deps::CatalogDependencies;
pub use error::{GovernanceError, GovernanceResult};
pub use governor::{
    MaterializeReport, ProposalOutcome, RemovalOutcome, RollbackOutcome, ToolGovernor,
    ToolSummary,
};
pub use rejection::{Rejection, RejectionLog};
pub use runtime::Governance;
