//! # Export
//!
//! Read-only renderers over a stage's generated markdown: styled documents
//! for download or printing, and a slide deck for presenting.

pub mod document;
pub mod markdown;
pub mod presentation;

pub use document::{export_document, ExportFormat, ExportedDocument};
pub use presentation::{render_presentation, sections, structured_blocks, Section};
