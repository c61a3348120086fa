//! Core domain types and shared logic for the Tessella grid file catalogue.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Logical paths in the catalogue namespace
//! - Time-ordered content identities (GUIDs) and their generator
//! - Permission bits, entry kinds and the catalogue-entity view
//! - Principals (accounts and roles)
//! - Configuration types

pub mod config;
pub mod entity;
pub mod error;
pub mod guid;
pub mod path;
pub mod principal;

pub use config::{BookingConfig, CacheConfig, CatalogueConfig, CleanupConfig, RouterConfig};
pub use entity::{CatalogEntity, EntryKind, Permissions};
pub use error::{Error, Result};
pub use guid::{Guid, GuidFactory};
pub use path::LogicalPath;
pub use principal::Principal;
