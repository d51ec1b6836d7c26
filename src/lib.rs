//! Receipt Ingestion Orchestrator
//!
//! Turns two untrusted external inputs into normalized financial
//! transactions:
//! - Receipt images/PDFs, reconciled across two independently failing
//!   extraction engines (offline OCR sidecar, cloud document vision)
//! - Exported transaction-history text, reconstructed by a tolerant
//!   schema-agnostic tabular parser
//!
//! FLOW A: bytes → extract → normalize → trust decision → (category,
//! assembly, file promotion, persistence)
//! FLOW B: text → parse → per-record category resolution → bulk write

pub mod api;
pub mod assembler;
pub mod categories;
pub mod engines;
pub mod error;
pub mod import;
pub mod models;
pub mod orchestrator;
pub mod service;
pub mod stores;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use service::{AutoFileOutcome, CreateFromExtracted, ReceiptIngestService};
