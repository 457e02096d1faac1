//! Core domain types for merge-relay.
//!
//! This module contains the provider-independent event model and the
//! identifiers used throughout the pipeline.

pub mod branch;
pub mod event;
pub mod ids;

pub use branch::{BranchSets, BranchType, RiskLevel};
pub use event::{EnrichedEvent, MergeEvent, MergeEventDraft, Provider, ValidationError};
pub use ids::{DeliveryId, EventId, PrNumber, Sha};
