//! Error types for chain construction, pricing and persistence

use rust_decimal::Decimal;
use thiserror::Error;

/// The item catalog could not resolve a type.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown item type {0}")]
    NotFound(i64),
    #[error("catalog backend failure: {0}")]
    Backend(String),
}

/// The market price service failed as a whole. Per-type gaps are warnings, not errors.
#[derive(Debug, Error)]
#[error("price service failed for region {region_id}: {reason}")]
pub struct PriceServiceError {
    pub region_id: i64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("production chain {chain_id} not found for owner {owner_id}")]
    NotFound { owner_id: i64, chain_id: i64 },
    #[error("row {id} references missing parent {parent_id}")]
    OrphanedNode { id: i64, parent_id: i64 },
    #[error("expected exactly one root row, found {0}")]
    MultipleRoots(usize),
    #[error("production chain store failure: {0}")]
    WriteFailure(String),
}

/// Rejected operator edits and invalid node values.
#[derive(Debug, Error, PartialEq)]
pub enum ChainError {
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
    #[error("material efficiency must be in [0, 1), got {0}")]
    InvalidMaterialEfficiency(Decimal),
    #[error("market price must not be negative, got {0}")]
    NegativePrice(Decimal),
    #[error("unknown production kind '{0}', expected buy or build")]
    UnknownKind(String),
    #[error("no line {0} in production chain")]
    UnknownLine(usize),
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Backend(err.to_string())
    }
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        PersistenceError::WriteFailure(err.to_string())
    }
}
