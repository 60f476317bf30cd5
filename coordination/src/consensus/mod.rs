//! Consensus over competing fixes
//!
//! Proposals that still fail the PoC or break the regression suite are
//! excluded first. Survivors are anonymized, ranked by every council
//! member, and aggregated with a Borda count.

pub mod aggregate;
pub mod anonymize;
pub mod engine;

pub use anonymize::{AnonymizationMap, AnonymousProposal};
pub use engine::{apply_gates, ConsensusDecision, ConsensusEngine, ConsensusRequest};
