//! Source map v3 generation with Base64 VLQ mappings

use crate::error::{CrushError, Result};
use crate::tokens::{Trace, TRACE_RE};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const VLQ_SHIFT: u32 = 5;
const VLQ_CONTINUATION: i64 = 1 << VLQ_SHIFT;
const VLQ_MASK: i64 = VLQ_CONTINUATION - 1;

/// One generated position mapped back to its source (all 0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: usize,
    pub generated_column: usize,
    pub source: usize,
    pub original_line: usize,
    pub original_column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u8,
    pub file: String,
    pub sources: Vec<String>,
    pub names: Vec<String>,
    pub mappings: String,
}

pub fn encode_vlq(value: i64, out: &mut String) {
    let mut vlq = if value < 0 { ((-value) << 1) | 1 } else { value << 1 };
    loop {
        let mut digit = vlq & VLQ_MASK;
        vlq >>= VLQ_SHIFT;
        if vlq > 0 {
            digit |= VLQ_CONTINUATION;
        }
        out.push(BASE64[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Decode one segment of VLQ digits into its fields
pub fn decode_vlq(segment: &str) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    let mut value: i64 = 0;
    let mut shift = 0u32;
    for c in segment.bytes() {
        let digit = BASE64
            .iter()
            .position(|&b| b == c)
            .ok_or_else(|| CrushError::InvalidFormat {
                message: format!("Invalid base64 digit '{}' in source map", c as char),
            })? as i64;
        value += (digit & VLQ_MASK) << shift;
        if digit & VLQ_CONTINUATION != 0 {
            shift += VLQ_SHIFT;
            if shift > 60 {
                return Err(CrushError::InvalidFormat {
                    message: "VLQ value too large".to_string(),
                });
            }
            continue;
        }
        let negative = value & 1 == 1;
        value >>= 1;
        values.push(if negative { -value } else { value });
        value = 0;
        shift = 0;
    }
    if shift != 0 {
        return Err(CrushError::InvalidFormat {
            message: "Truncated VLQ segment".to_string(),
        });
    }
    Ok(values)
}

/// Encode mappings sorted by generated position; lines are separated by `;`
/// and segments by `,`, every field relative to the previous segment
pub fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut out = String::new();
    let mut line = 0;
    let mut previous_column = 0i64;
    let mut previous_source = 0i64;
    let mut previous_line = 0i64;
    let mut previous_original_column = 0i64;
    let mut first_in_line = true;

    for mapping in mappings {
        while line < mapping.generated_line {
            out.push(';');
            line += 1;
            previous_column = 0;
            first_in_line = true;
        }
        if !first_in_line {
            out.push(',');
        }
        first_in_line = false;
        encode_vlq(mapping.generated_column as i64 - previous_column, &mut out);
        encode_vlq(mapping.source as i64 - previous_source, &mut out);
        encode_vlq(mapping.original_line as i64 - previous_line, &mut out);
        encode_vlq(mapping.original_column as i64 - previous_original_column, &mut out);
        previous_column = mapping.generated_column as i64;
        previous_source = mapping.source as i64;
        previous_line = mapping.original_line as i64;
        previous_original_column = mapping.original_column as i64;
    }
    out
}

pub fn decode_mappings(mappings: &str) -> Result<Vec<Mapping>> {
    let mut out = Vec::new();
    let (mut source, mut original_line, mut original_column) = (0i64, 0i64, 0i64);
    for (generated_line, line) in mappings.split(';').enumerate() {
        let mut column = 0i64;
        for segment in line.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq(segment)?;
            column += fields[0];
            if fields.len() >= 4 {
                source += fields[1];
                original_line += fields[2];
                original_column += fields[3];
                out.push(Mapping {
                    generated_line,
                    generated_column: column.max(0) as usize,
                    source: source.max(0) as usize,
                    original_line: original_line.max(0) as usize,
                    original_column: original_column.max(0) as usize,
                });
            }
        }
    }
    Ok(out)
}

fn advance(chunk: &str, line: &mut usize, column: &mut usize) {
    for c in chunk.chars() {
        if c == '\n' {
            *line += 1;
            *column = 0;
        } else {
            *column += 1;
        }
    }
}

/// Remove trace labels from `text`, recording where each one stood.
/// Columns count characters.
pub fn extract_traces(text: &str, traces: &IndexMap<String, Trace>) -> (String, Vec<Mapping>) {
    let mut out = String::with_capacity(text.len());
    let mut mappings = Vec::new();
    let mut line = 0;
    let mut column = 0;
    let mut last = 0;

    for m in TRACE_RE.find_iter(text) {
        let chunk = &text[last..m.start()];
        advance(chunk, &mut line, &mut column);
        out.push_str(chunk);
        if let Some(trace) = traces.get(m.as_str()) {
            mappings.push(Mapping {
                generated_line: line,
                generated_column: column,
                source: trace.source,
                original_line: trace.line,
                original_column: trace.column,
            });
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    (out, mappings)
}

impl SourceMap {
    pub fn new(file: impl Into<String>, sources: Vec<String>, mappings: &[Mapping]) -> Self {
        Self {
            version: 3,
            file: file.into(),
            sources,
            names: Vec::new(),
            mappings: encode_mappings(mappings),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CrushError::InvalidFormat {
            message: format!("Source map serialization failed: {}", e),
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CrushError::InvalidFormat {
            message: format!("Invalid source map: {}", e),
        })
    }

    pub fn decode(&self) -> Result<Vec<Mapping>> {
        decode_mappings(&self.mappings)
    }
}

/// The comment linking a stylesheet to its map
pub fn mapping_url_comment(map_name: &str) -> String {
    format!("/*# sourceMappingURL={} */", map_name)
}
