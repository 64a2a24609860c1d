// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content parsers: declared file type selects the parser.

use fab_error::{FabricError, Result};
use serde_json::{json, Value};

/// Outcome of parsing one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedContent {
    /// Which parser produced this.
    pub parser_type: String,
    /// Schema of the parsed records.
    pub schema: Value,
    /// How many records were found.
    pub record_count: u64,
    /// Normalized text representation (for embedding).
    pub text: String,
}

/// Parse file bytes according to the declared file type and MIME type.
///
/// Structured content (or `text/csv`) parses as delimiter-separated
/// records with a header row; everything else parses as text lines.
///
/// # Errors
///
/// `invalid_parameters` when the bytes are not valid UTF-8.
pub fn parse_bytes(file_type: &str, mime_type: &str, bytes: &[u8]) -> Result<ParsedContent> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FabricError::invalid_parameters("file content is not valid utf-8").with_source(e))?;

    if file_type == "structured" || mime_type == "text/csv" {
        parse_delimited(text)
    } else {
        Ok(parse_lines(text))
    }
}

fn parse_delimited(text: &str) -> Result<ParsedContent> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| FabricError::invalid_parameters("structured file has no header row"))?;
    let fields: Vec<String> = header.split(',').map(|f| f.trim().to_string()).collect();
    let record_count = lines.count() as u64;
    Ok(ParsedContent {
        parser_type: "delimited".into(),
        schema: json!({"fields": fields}),
        record_count,
        text: text.to_string(),
    })
}

fn parse_lines(text: &str) -> ParsedContent {
    let record_count = text.lines().filter(|l| !l.trim().is_empty()).count() as u64;
    ParsedContent {
        parser_type: "text_lines".into(),
        schema: json!({"fields": []}),
        record_count,
        text: text.to_string(),
    }
}
