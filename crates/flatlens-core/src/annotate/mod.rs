//! Byte-level annotation of FlatBuffers buffers.
//!
//! The [`Annotator`] walks a buffer the same way the verifier does, but
//! instead of stopping at the first problem it records every byte range it
//! can explain as a [`BinaryRegion`], grouped into [`BinarySection`]s keyed by
//! their starting offset. Problems become region statuses. Bytes that no
//! section explains end up in padding or unknown sections, so the final map
//! covers the whole buffer.
//!
//! ## Example
//!
//! ```no_run
//! use flatlens_core::{Annotator, Schema, TextRenderer};
//!
//! # fn example() -> flatlens_core::Result<()> {
//! let schema = Schema::load("monster.bfbs")?;
//! let bytes = std::fs::read("monster.bin").map_err(|e| flatlens_core::Error::file_read("monster.bin", e))?;
//! let annotations = Annotator::new(&schema, &bytes).annotate();
//! print!("{}", TextRenderer::new(&annotations, &bytes).render());
//! # Ok(())
//! # }
//! ```

mod region;
mod text;

pub use region::{
    BinaryRegion, BinarySection, CommentKind, RegionComment, RegionStatus, RegionType, SectionKind,
};
pub use text::{TextConfig, TextRenderer};

use crate::schema::Schema;
use crate::verifier::{BufferOptions, BufferReader, Verifier, VerifierOptions, MIN_BUFFER_SIZE};
use crate::walker::{padding_region, Sink, Walker};
use std::collections::BTreeMap;
use tracing::debug;

/// Longest zero run between sections still treated as ordinary alignment
const MAX_ALIGNMENT_PADDING: usize = 7;

/// Limits and framing for one annotation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotatorConfig {
    /// Whether the buffer starts with a 32-bit size prefix
    pub size_prefixed: bool,
    /// Deepest table nesting followed before giving up on a branch
    pub max_depth: usize,
    /// Most tables visited in total
    pub max_tables: usize,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        let limits = VerifierOptions::default();
        Self {
            size_prefixed: false,
            max_depth: limits.max_depth,
            max_tables: limits.max_tables,
        }
    }
}

impl AnnotatorConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the buffer is size prefixed
    pub fn size_prefixed(mut self, prefixed: bool) -> Self {
        self.size_prefixed = prefixed;
        self
    }

    /// Set the nesting limit
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the table count limit
    pub fn max_tables(mut self, tables: usize) -> Self {
        self.max_tables = tables;
        self
    }
}

/// Builds the region map of one buffer
#[derive(Debug, Clone)]
pub struct Annotator<'s, 'b> {
    schema: &'s Schema,
    buffer: &'b [u8],
    config: AnnotatorConfig,
}

impl<'s, 'b> Annotator<'s, 'b> {
    /// Create an annotator for `buffer` laid out according to `schema`
    pub fn new(schema: &'s Schema, buffer: &'b [u8]) -> Self {
        Self {
            schema,
            buffer,
            config: AnnotatorConfig::default(),
        }
    }

    /// Use a custom configuration
    pub fn with_config(mut self, config: AnnotatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Annotate the buffer. Never fails: corrupt input shows up as region
    /// statuses, and a buffer shorter than the smallest valid FlatBuffer
    /// yields no sections.
    pub fn annotate(&self) -> Annotations {
        if self.buffer.len() < MIN_BUFFER_SIZE {
            debug!(
                size = self.buffer.len(),
                "Buffer too small to annotate"
            );
            return Annotations::default();
        }

        let opts = VerifierOptions::new()
            .max_depth(self.config.max_depth)
            .max_tables(self.config.max_tables)
            .check_alignment(false)
            .large_buffers(true);
        let mut verifier = Verifier::with_options(self.buffer, opts);
        let mut buffer_opts = BufferOptions::new().size_prefixed(self.config.size_prefixed);
        if let Some(ident) = self.schema.file_identifier() {
            buffer_opts = buffer_opts.identifier(ident);
        }

        let mut walker = Walker::new(self.schema, &mut verifier, SectionMap::default());
        if let Err(err) = walker.walk_buffer(&buffer_opts) {
            debug!(%err, "Annotation stopped early");
        }
        let mut sections = walker.into_sink().sections;

        let reader = BufferReader::new(self.buffer).with_alignment(false);
        for section in sections.values_mut() {
            fill_region_gaps(&reader, section);
        }
        fill_section_gaps(&reader, &mut sections);

        let annotations = Annotations { sections };
        debug!(
            sections = annotations.len(),
            errors = annotations.errors().count(),
            "Buffer annotated"
        );
        annotations
    }
}

/// Lenient sink collecting sections by starting offset
#[derive(Debug, Default)]
struct SectionMap {
    sections: BTreeMap<usize, BinarySection>,
    ends: BTreeMap<usize, usize>,
}

impl Sink for SectionMap {
    const STRICT: bool = false;

    fn add_section(&mut self, offset: usize, section: BinarySection) {
        let Some(end) = section.end() else {
            return;
        };
        self.ends.entry(offset).or_insert(end);
        self.sections.entry(offset).or_insert(section);
    }

    fn contains(&self, offset: usize) -> bool {
        self.ends
            .range(..=offset)
            .next_back()
            .map_or(false, |(_, &end)| offset < end)
    }

    fn append_name(&mut self, offset: usize, name: &str) {
        if let Some(section) = self.sections.get_mut(&offset) {
            section.name.push_str(", ");
            section.name.push_str(name);
        }
    }
}

/// Sorts a section's regions and fills the holes between them with padding
fn fill_region_gaps(reader: &BufferReader<'_>, section: &mut BinarySection) {
    section.regions.sort_by_key(|r| r.offset);

    let mut gaps = Vec::new();
    let mut cursor: Option<usize> = None;
    for region in &section.regions {
        if let Some(end) = cursor {
            if end < region.offset {
                gaps.push(padding_region(reader, end, region.offset - end));
            }
        }
        cursor = Some(cursor.map_or(region.end(), |c| c.max(region.end())));
    }

    if !gaps.is_empty() {
        section.regions.extend(gaps);
        section.regions.sort_by_key(|r| r.offset);
    }
}

/// Adds sections for every byte range no section covers
fn fill_section_gaps(reader: &BufferReader<'_>, sections: &mut BTreeMap<usize, BinarySection>) {
    let mut gaps = Vec::new();
    let mut cursor = 0;
    for section in sections.values() {
        let (Some(start), Some(end)) = (section.start(), section.end()) else {
            continue;
        };
        if cursor < start {
            gaps.push((cursor, start - cursor));
        }
        cursor = cursor.max(end);
    }
    if cursor < reader.len() {
        gaps.push((cursor, reader.len() - cursor));
    }

    for (offset, length) in gaps {
        sections
            .entry(offset)
            .or_insert_with(|| gap_section(reader, offset, length));
    }
}

fn gap_section(reader: &BufferReader<'_>, offset: usize, length: usize) -> BinarySection {
    if reader.is_zero(offset, length) {
        let status = if length > MAX_ALIGNMENT_PADDING {
            RegionStatus::WarnPaddingLength
        } else {
            RegionStatus::Ok
        };
        let region = BinaryRegion::new(
            offset,
            length,
            RegionType::Uint8,
            RegionComment::new(CommentKind::Padding).with_status(status),
        )
        .with_array_length(length);
        BinarySection::new("", SectionKind::Padding, vec![region])
    } else {
        let status = if length > MAX_ALIGNMENT_PADDING {
            RegionStatus::WarnNoReferences
        } else {
            RegionStatus::WarnCorruptedPadding
        };
        let region = BinaryRegion::new(
            offset,
            length,
            RegionType::Unknown,
            RegionComment::new(CommentKind::Unknown).with_status(status),
        )
        .with_array_length(length);
        BinarySection::new("no known references", SectionKind::Unknown, vec![region])
    }
}

/// The region map of one buffer, ordered by offset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    sections: BTreeMap<usize, BinarySection>,
}

impl Annotations {
    /// Sections with their starting offsets, in offset order
    pub fn sections(&self) -> impl Iterator<Item = (usize, &BinarySection)> {
        self.sections.iter().map(|(&offset, section)| (offset, section))
    }

    /// The section starting at `offset`
    pub fn get(&self, offset: usize) -> Option<&BinarySection> {
        self.sections.get(&offset)
    }

    /// Number of sections
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether no section was produced
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Every region of every section
    pub fn regions(&self) -> impl Iterator<Item = &BinaryRegion> {
        self.sections.values().flat_map(|s| s.regions.iter())
    }

    /// Regions carrying an error status
    pub fn errors(&self) -> impl Iterator<Item = &BinaryRegion> {
        self.regions().filter(|r| r.status().is_error())
    }

    /// Whether any region carries an error status
    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Take the underlying map
    pub fn into_sections(self) -> BTreeMap<usize, BinarySection> {
        self.sections
    }
}
