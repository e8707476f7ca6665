//! # flatlens-core
//!
//! A library for checking and explaining FlatBuffers binaries using a schema
//! loaded at runtime.
//!
//! This crate provides the core functionality for:
//! - Loading compiled binary schemas (`.bfbs`) into an in-memory [`Schema`]
//! - Verifying that an untrusted buffer is structurally sound before any
//!   accessor touches it
//! - Annotating every byte of a buffer with its role, producing a region map
//!   that survives corrupt input
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`schema`]: The reflection model and `.bfbs` decoding
//! - [`verifier`]: Wire-level checks and resource limits
//! - [`annotate`]: Region maps and their `.afb` text rendering
//! - [`error`]: Error types and handling
//!
//! Verification and annotation share one schema-driven walk. Verification
//! stops at the first violation; annotation records it and keeps going.
//!
//! ## Example
//!
//! ```no_run
//! use flatlens_core::{Annotator, Schema, TextRenderer};
//! use std::fs;
//!
//! let schema = Schema::load("monster.bfbs")?;
//! let data = fs::read("monster.bin")?;
//!
//! if !flatlens_core::verify(&schema, &data) {
//!     let annotations = Annotator::new(&schema, &data).annotate();
//!     print!("{}", TextRenderer::new(&annotations, &data).render());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod annotate;
pub mod error;
pub mod schema;
pub mod verifier;

mod walker;

// Re-export primary types for convenience
pub use annotate::{
    Annotations, Annotator, AnnotatorConfig, BinaryRegion, BinarySection, CommentKind,
    RegionComment, RegionStatus, RegionType, SectionKind, TextConfig, TextRenderer,
};
pub use error::{Error, Result, VerifyError, VerifyResult};
pub use schema::{BaseType, Enum, EnumVal, Field, Object, Schema, Type};
pub use verifier::{BufferOptions, Verifier, VerifierOptions};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whether `buffer` is a valid, unprefixed instance of the schema's root
/// table, using default limits.
///
/// The file identifier is checked when the schema declares one.
pub fn verify(schema: &Schema, buffer: &[u8]) -> bool {
    let mut opts = BufferOptions::new();
    if let Some(ident) = schema.file_identifier() {
        opts = opts.identifier(ident);
    }
    verify_with_options(schema, buffer, &opts, VerifierOptions::for_schema(schema))
}

/// Like [`verify`] with explicit framing and limits
pub fn verify_with_options(
    schema: &Schema,
    buffer: &[u8],
    opts: &BufferOptions,
    limits: VerifierOptions,
) -> bool {
    try_verify(schema, buffer, opts, limits).is_ok()
}

/// Verifies `buffer` and reports the first violation
pub fn try_verify(
    schema: &Schema,
    buffer: &[u8],
    opts: &BufferOptions,
    limits: VerifierOptions,
) -> VerifyResult<()> {
    Verifier::with_options(buffer, limits).verify_buffer(schema, opts)
}

/// Annotates `buffer` with default settings
pub fn annotate(schema: &Schema, buffer: &[u8]) -> Annotations {
    Annotator::new(schema, buffer).annotate()
}
