//! Plain-text rendering of [`Annotations`] in the `.afb` layout.
//!
//! Every region becomes one line (more for long arrays) of the form
//!
//! ```text
//!   +0x0000 | 0C 00 00 00 | UOffset32 | 0x0000000C (12) Loc: 0x000C | offset to root table `Monster`
//! ```
//!
//! Columns are padded to the widest entry in the whole file.

use super::{Annotations, BinaryRegion, BinarySection, CommentKind, RegionComment, RegionType, SectionKind};
use crate::verifier::{BufferReader, Scalar};
use std::fmt::{self, Write as FmtWrite};

/// Minimum width of the value column
const MIN_VALUE_WIDTH: usize = 20;

/// Output options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextConfig {
    /// Bytes shown per line before wrapping
    pub max_bytes_per_line: usize,
    /// Print every element of vectors; when false, long vectors are
    /// abbreviated to their first and last regions
    pub include_vector_contents: bool,
    /// Column separator
    pub delimiter: char,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_line: 8,
            include_vector_contents: true,
            delimiter: '|',
        }
    }
}

impl TextConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bytes per line
    pub fn max_bytes_per_line(mut self, bytes: usize) -> Self {
        self.max_bytes_per_line = bytes.max(1);
        self
    }

    /// Set whether vector contents are printed in full
    pub fn include_vector_contents(mut self, include: bool) -> Self {
        self.include_vector_contents = include;
        self
    }

    /// Set the column separator
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Renders annotations of a buffer as text
pub struct TextRenderer<'a> {
    annotations: &'a Annotations,
    reader: BufferReader<'a>,
    config: TextConfig,
    schema_file: String,
    binary_file: String,
}

impl<'a> TextRenderer<'a> {
    /// Create a renderer for `annotations` of `buffer`
    pub fn new(annotations: &'a Annotations, buffer: &'a [u8]) -> Self {
        Self {
            annotations,
            reader: BufferReader::new(buffer).with_alignment(false),
            config: TextConfig::default(),
            schema_file: String::new(),
            binary_file: String::new(),
        }
    }

    /// Use a custom configuration
    pub fn with_config(mut self, config: TextConfig) -> Self {
        self.config = config;
        self
    }

    /// File names shown in the header
    pub fn with_files(mut self, schema: impl Into<String>, binary: impl Into<String>) -> Self {
        self.schema_file = schema.into();
        self.binary_file = binary.into();
        self
    }

    /// Render to a string
    pub fn render(&self) -> String {
        let mut output = String::new();
        self.write_to(&mut output).expect("String write cannot fail");
        output
    }

    /// Render into `w`
    pub fn write_to(&self, w: &mut impl FmtWrite) -> fmt::Result {
        let mut writer = AfbWriter::new(w, &self.config, self.reader);
        writer.measure(self.annotations);

        writeln!(writer.writer, "// Annotated Flatbuffer Binary")?;
        writeln!(writer.writer, "//")?;
        writeln!(writer.writer, "// Schema file: {}", self.schema_file)?;
        writeln!(writer.writer, "// Binary file: {}", self.binary_file)?;

        for (_, section) in self.annotations.sections() {
            writer.write_section(section)?;
        }
        Ok(())
    }
}

struct AfbWriter<'a, W: FmtWrite> {
    writer: &'a mut W,
    config: &'a TextConfig,
    reader: BufferReader<'a>,
    offset_width: usize,
    type_width: usize,
    value_width: usize,
}

impl<'a, W: FmtWrite> AfbWriter<'a, W> {
    fn new(writer: &'a mut W, config: &'a TextConfig, reader: BufferReader<'a>) -> Self {
        let len = reader.len();
        let offset_width = match len {
            0..=0xFF => 2,
            0x100..=0xFFFF => 4,
            0x1_0000..=0xFF_FFFF => 6,
            _ => 8,
        };
        Self {
            writer,
            config,
            reader,
            offset_width,
            type_width: 0,
            value_width: MIN_VALUE_WIDTH,
        }
    }

    /// Sizes the type and value columns to fit every region
    fn measure(&mut self, annotations: &Annotations) {
        for region in annotations.regions() {
            self.type_width = self.type_width.max(type_label(region).len());
            let value = self.value_label(region);
            let width = if region.array_length.is_some() {
                value.chars().count().min(self.config.max_bytes_per_line)
            } else {
                value.len()
            };
            self.value_width = self.value_width.max(width);
        }
    }

    fn write_section(&mut self, section: &BinarySection) -> fmt::Result {
        write!(self.writer, "\n{}", section.kind.name())?;
        if !section.name.is_empty() {
            write!(self.writer, " ({})", section.name)?;
        }
        write!(self.writer, ":")?;

        let regions = &section.regions;
        let abbreviate = !self.config.include_vector_contents
            && matches!(section.kind, SectionKind::Vector | SectionKind::Vector64)
            && regions.len() > 4;
        if abbreviate {
            for region in &regions[..2] {
                self.write_region(region)?;
            }
            write!(self.writer, "\n  <{} regions omitted>", regions.len() - 3)?;
            self.write_region(&regions[regions.len() - 1])?;
        } else {
            for region in regions {
                self.write_region(region)?;
            }
        }
        writeln!(self.writer)
    }

    fn write_region(&mut self, region: &BinaryRegion) -> fmt::Result {
        let Some(bytes) = self.reader.slice(region.offset, region.length) else {
            return Ok(());
        };
        let per_line = self.config.max_bytes_per_line.max(1);
        let d = self.config.delimiter;
        let type_text = type_label(region);
        let value = self.value_label(region);
        let comment = comment_text(&region.comment);

        // Array values wrap together with their bytes
        let value_lines: Vec<String> = if region.array_length.is_some() {
            let chars: Vec<char> = value.chars().collect();
            chars.chunks(per_line).map(|c| c.iter().collect()).collect()
        } else {
            vec![value]
        };

        for (i, chunk) in bytes.chunks(per_line).enumerate() {
            let mut line = format!(
                "  +0x{:0w$X} {d}",
                region.offset + i * per_line,
                w = self.offset_width
            );
            for byte in chunk {
                write!(line, " {byte:02X}")?;
            }
            for _ in chunk.len()..per_line {
                line.push_str("   ");
            }
            line.push_str(&format!(" {d}"));

            let value_line = value_lines.get(i).map_or("", String::as_str);
            if i == 0 {
                write!(
                    line,
                    " {type_text:<tw$} {d} {value_line:<vw$} {d} {comment}",
                    tw = self.type_width,
                    vw = self.value_width
                )?;
            } else if !value_line.is_empty() {
                write!(line, " {:<tw$} {d} {value_line}", "", tw = self.type_width)?;
            }
            write!(self.writer, "\n{}", line.trim_end())?;
        }
        Ok(())
    }

    fn value_label(&self, region: &BinaryRegion) -> String {
        let Some(bytes) = self.reader.slice(region.offset, region.length) else {
            return String::new();
        };
        if region.array_length.is_some() {
            return bytes.iter().map(|&b| printable(b)).collect();
        }

        let hex: String = bytes.iter().rev().map(|b| format!("{b:02X}")).collect();
        let mut value = format!("0x{hex}");
        if let Some(decoded) = scalar_text(region.region_type, bytes) {
            value.push_str(&format!(" ({decoded})"));
        }
        if let Some(target) = region.points_to {
            value.push_str(&format!(" Loc: 0x{target:0w$X}", w = self.offset_width));
        }
        value
    }
}

fn printable(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    }
}

fn type_label(region: &BinaryRegion) -> String {
    match region.array_length {
        Some(count) => format!("{}[{count}]", region.region_type.name()),
        None => region.region_type.name().to_owned(),
    }
}

fn scalar_text(region_type: RegionType, bytes: &[u8]) -> Option<String> {
    fn decode<T: Scalar + fmt::Display>(bytes: &[u8]) -> Option<String> {
        T::from_le_slice(bytes).map(|v| v.to_string())
    }

    match region_type {
        RegionType::Unknown => None,
        RegionType::Bool => decode::<bool>(bytes),
        RegionType::Byte | RegionType::Int8 => decode::<i8>(bytes),
        RegionType::Char => u8::from_le_slice(bytes).map(|b| printable(b).to_string()),
        RegionType::Uint8 | RegionType::UType => decode::<u8>(bytes),
        RegionType::Int16 => decode::<i16>(bytes),
        RegionType::Uint16 | RegionType::VOffset => decode::<u16>(bytes),
        RegionType::Int32 | RegionType::SOffset => decode::<i32>(bytes),
        RegionType::Uint32 | RegionType::UOffset => decode::<u32>(bytes),
        RegionType::Int64 => decode::<i64>(bytes),
        RegionType::Uint64 | RegionType::UOffset64 => decode::<u64>(bytes),
        RegionType::Float => decode::<f32>(bytes),
        RegionType::Double => decode::<f64>(bytes),
    }
}

/// The comment column for one region, status first when it is not clean
fn comment_text(comment: &RegionComment) -> String {
    let name = &comment.name;
    let index = comment.index;
    let text = match comment.kind {
        CommentKind::Unknown => String::new(),
        CommentKind::SizePrefix => "size prefix".to_owned(),
        CommentKind::RootTableOffset => format!("offset to root table `{name}`"),
        CommentKind::FileIdentifier => "File Identifier".to_owned(),
        CommentKind::Padding => "padding".to_owned(),
        CommentKind::VTableSize => "size of this vtable".to_owned(),
        CommentKind::VTableReferringTableLength => "size of referring table".to_owned(),
        CommentKind::VTableFieldOffset => format!("offset to field `{name}` (id: {index})"),
        CommentKind::VTableUnknownFieldOffset => format!("offset to unknown field (id: {index})"),
        CommentKind::TableVTableOffset => "offset to vtable".to_owned(),
        CommentKind::TableField => format!("table field `{name}`"),
        CommentKind::TableUnknownField => "unknown field".to_owned(),
        CommentKind::TableOffsetField => format!("offset to field `{name}`"),
        CommentKind::StructField => format!("struct field `{name}`"),
        CommentKind::ArrayField => format!("array field `{name}`[{index}]"),
        CommentKind::StringLength => "length of string".to_owned(),
        CommentKind::StringValue => "string literal".to_owned(),
        CommentKind::StringTerminator => "string terminator".to_owned(),
        CommentKind::VectorLength => "length of vector (# items)".to_owned(),
        CommentKind::VectorValue => format!("value[{index}]"),
        CommentKind::VectorTableValue => format!("offset to table[{index}]"),
        CommentKind::VectorStringValue => format!("offset to string[{index}]"),
        CommentKind::VectorUnionValue => format!("offset to union[{index}]"),
    };
    let text = match (text.is_empty(), comment.detail.is_empty()) {
        (_, true) => text,
        (true, false) => comment.detail.clone(),
        (false, false) => format!("{text} {}", comment.detail),
    };

    let status = comment.status;
    if status.is_error() {
        if text.is_empty() {
            format!("ERROR: {}", status.message())
        } else {
            format!("ERROR: {text}. {}", status.message())
        }
    } else if status.is_warning() {
        if text.is_empty() {
            format!("WARN: {}", status.message())
        } else {
            format!("WARN: {text}. {}", status.message())
        }
    } else {
        text
    }
}
