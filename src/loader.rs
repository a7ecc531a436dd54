//! Multi-format document loading: bytes + MIME hint → canonical UTF-8 text.
//!
//! | Format | Canonical rendering |
//! |--------|---------------------|
//! | txt / md | UTF-8 (lossy), BOM stripped, `\n` line endings |
//! | PDF | per-page text with `[Page K]` markers, K from 1 |
//! | DOCX | body paragraphs in order; tables as tab-separated lines |
//! | CSV / TSV | header line, then one readable line per row |
//! | XLSX | `# Sheet: <name>` banner per sheet, CSV-like rows |
//!
//! Binary formats are parsed by streaming the OOXML parts out of the ZIP
//! container with bounded reads, so a hostile archive cannot balloon
//! memory. The size ceiling itself is enforced upstream; the loader
//! assumes the bytes fit in memory.

use std::io::Read;

use crate::error::{EngineError, Result};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_TSV: &str = "text/tab-separated-values";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Cells wider than this switch a row to `column: value` rendering.
const NARROW_CELL_MAX: usize = 32;

/// Canonical text plus the structural hints the loader could observe.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub text: String,
    pub mime_type: String,
    /// PDF only.
    pub page_count: Option<u32>,
    /// Tabular formats only: number of data rows.
    pub row_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Markdown,
    Pdf,
    Docx,
    Csv,
    Tsv,
    Xlsx,
}

impl Format {
    fn mime(self) -> &'static str {
        match self {
            Format::Text => MIME_TEXT,
            Format::Markdown => MIME_MARKDOWN,
            Format::Pdf => MIME_PDF,
            Format::Docx => MIME_DOCX,
            Format::Csv => MIME_CSV,
            Format::Tsv => MIME_TSV,
            Format::Xlsx => MIME_XLSX,
        }
    }

    fn from_extension(ext: &str) -> Option<Format> {
        match ext {
            "txt" => Some(Format::Text),
            "md" => Some(Format::Markdown),
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "csv" => Some(Format::Csv),
            "tsv" => Some(Format::Tsv),
            "xlsx" => Some(Format::Xlsx),
            _ => None,
        }
    }

    fn from_mime(mime: &str) -> Option<Format> {
        // Hints often carry parameters ("text/csv; charset=utf-8").
        let base = mime.split(';').next().unwrap_or(mime).trim();
        match base {
            MIME_TEXT => Some(Format::Text),
            MIME_MARKDOWN | "text/x-markdown" => Some(Format::Markdown),
            MIME_PDF => Some(Format::Pdf),
            MIME_DOCX => Some(Format::Docx),
            MIME_CSV => Some(Format::Csv),
            MIME_TSV => Some(Format::Tsv),
            MIME_XLSX => Some(Format::Xlsx),
            _ => None,
        }
    }
}

/// Decode a document into canonical text. The format is resolved from the
/// filename extension first, then the MIME hint.
pub fn load(bytes: &[u8], filename: &str, mime_hint: Option<&str>) -> Result<LoadedDocument> {
    let format = resolve_format(filename, mime_hint)?;

    match format {
        Format::Text | Format::Markdown => Ok(LoadedDocument {
            text: decode_text(bytes),
            mime_type: format.mime().to_string(),
            page_count: None,
            row_count: None,
        }),
        Format::Pdf => load_pdf(bytes),
        Format::Docx => load_docx(bytes),
        Format::Csv | Format::Tsv => {
            let delim = if format == Format::Tsv {
                '\t'
            } else {
                sniff_delimiter(bytes)
            };
            load_delimited(bytes, delim, format.mime())
        }
        Format::Xlsx => load_xlsx(bytes),
    }
}

fn resolve_format(filename: &str, mime_hint: Option<&str>) -> Result<Format> {
    let ext = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(format) = Format::from_extension(&ext) {
        return Ok(format);
    }
    if let Some(format) = mime_hint.and_then(Format::from_mime) {
        return Ok(format);
    }
    Err(EngineError::UnsupportedFormat(format!(
        "{} ({})",
        filename,
        mime_hint.unwrap_or("no MIME hint")
    )))
}

/// Lossy UTF-8 decode with BOM stripping and `\n` line endings.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);
    normalize_newlines(&text)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ============ PDF ============

fn load_pdf(bytes: &[u8]) -> Result<LoadedDocument> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        EngineError::Decode {
            format: "pdf".to_string(),
            message: e.to_string(),
        }
    })?;

    let page_count = pages.len() as u32;
    let rendered: Vec<String> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("[Page {}]\n{}", i + 1, normalize_newlines(page.trim())))
        .collect();

    Ok(LoadedDocument {
        text: rendered.join("\n\n"),
        mime_type: MIME_PDF.to_string(),
        page_count: Some(page_count),
        row_count: None,
    })
}

// ============ DOCX ============

fn load_docx(bytes: &[u8]) -> Result<LoadedDocument> {
    let mut archive = open_archive(bytes, "docx")?;
    let xml = read_zip_entry(&mut archive, "word/document.xml", "docx")?;

    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut table_rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut table_depth = 0usize;
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                let s = t.unescape().unwrap_or_default();
                if table_depth > 0 {
                    cell.push_str(&s);
                } else {
                    paragraph.push_str(&s);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if table_depth == 0 {
                        let p = paragraph.trim();
                        if !p.is_empty() {
                            blocks.push(p.to_string());
                        }
                        paragraph.clear();
                    }
                }
                b"tc" => {
                    cells.push(cell.trim().to_string());
                    cell.clear();
                }
                b"tr" => {
                    table_rows.push(cells.join("\t"));
                    cells.clear();
                }
                b"tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !table_rows.is_empty() {
                        blocks.push(table_rows.join("\n"));
                        table_rows.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::Decode {
                    format: "docx".to_string(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(LoadedDocument {
        text: blocks.join("\n\n"),
        mime_type: MIME_DOCX.to_string(),
        page_count: None,
        row_count: None,
    })
}

// ============ CSV / TSV ============

/// Pick the delimiter by counting candidates in the first kilobyte.
fn sniff_delimiter(bytes: &[u8]) -> char {
    let sample = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    let tabs = sample.matches('\t').count();
    let commas = sample.matches(',').count();
    if tabs > commas {
        '\t'
    } else {
        ','
    }
}

fn load_delimited(bytes: &[u8], delim: char, mime: &str) -> Result<LoadedDocument> {
    let text = decode_text(bytes);
    let records = parse_delimited(&text, delim);
    if records.is_empty() {
        return Ok(LoadedDocument {
            text: String::new(),
            mime_type: mime.to_string(),
            page_count: None,
            row_count: Some(0),
        });
    }

    let header = &records[0];
    let mut lines: Vec<String> = vec![header.join("\t")];

    for row in &records[1..] {
        if row.iter().all(|cell| cell.len() <= NARROW_CELL_MAX) {
            lines.push(row.join("\t"));
        } else {
            // Wide cells read better as labelled pairs.
            let mut parts: Vec<String> = Vec::with_capacity(row.len());
            for (i, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                let name = header.get(i).map(|h| h.as_str()).unwrap_or("column");
                parts.push(format!("{}: {}", name, cell));
            }
            lines.push(parts.join("\n"));
            lines.push(String::new());
        }
    }

    let row_count = (records.len() - 1) as u32;
    Ok(LoadedDocument {
        text: lines.join("\n").trim_end().to_string(),
        mime_type: mime.to_string(),
        page_count: None,
        row_count: Some(row_count),
    })
}

/// Minimal delimited-text parser: quoted fields, doubled-quote escapes,
/// newlines inside quotes.
fn parse_delimited(text: &str, delim: char) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            c if c == delim => record.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if record.iter().any(|f| !f.is_empty()) {
            records.push(record);
        }
    }
    records
}

// ============ XLSX ============

fn load_xlsx(bytes: &[u8]) -> Result<LoadedDocument> {
    let mut archive = open_archive(bytes, "xlsx")?;
    let shared = read_shared_strings(&mut archive)?;
    let sheet_names = read_sheet_names(&mut archive);

    let mut worksheet_files: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    worksheet_files.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut sections: Vec<String> = Vec::new();
    let mut total_rows = 0u32;

    for (i, file) in worksheet_files.iter().enumerate() {
        let xml = read_zip_entry(&mut archive, file, "xlsx")?;
        let rows = extract_sheet_rows(&xml, &shared)?;
        total_rows += rows.len() as u32;

        let name = sheet_names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", i + 1));
        let mut section = format!("# Sheet: {}\n", name);
        section.push_str(&rows.join("\n"));
        sections.push(section.trim_end().to_string());
    }

    Ok(LoadedDocument {
        text: sections.join("\n\n"),
        mime_type: MIME_XLSX.to_string(),
        page_count: None,
        row_count: Some(total_rows),
    })
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive<'a>(bytes: &'a [u8], format: &str) -> Result<Archive<'a>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| EngineError::Decode {
        format: format.to_string(),
        message: e.to_string(),
    })
}

fn read_zip_entry(archive: &mut Archive<'_>, name: &str, format: &str) -> Result<Vec<u8>> {
    let decode = |message: String| EngineError::Decode {
        format: format.to_string(),
        message,
    };
    let entry = archive.by_name(name).map_err(|e| decode(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| decode(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(decode(format!("ZIP entry {} exceeds size limit", name)));
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    // Absent sharedStrings.xml just means no string cells.
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry(archive, "xl/sharedStrings.xml", "xlsx")?;

    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_si = false;
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                current.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::Decode {
                    format: "xlsx".to_string(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet display names from `xl/workbook.xml`, in workbook order.
fn read_sheet_names(archive: &mut Archive<'_>) -> Vec<String> {
    let Ok(xml) = read_zip_entry(archive, "xl/workbook.xml", "xlsx") else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e) | quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"name" {
                            names.push(
                                String::from_utf8_lossy(attr.value.as_ref()).into_owned(),
                            );
                        }
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    names
}

fn extract_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>> {
    let mut rows: Vec<String> = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut cell_kind = CellKind::Number;
    let mut in_value = false;
    let mut in_inline_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    cell_kind = cell_type(&e);
                    value.clear();
                }
                b"v" => in_value = true,
                b"t" if cell_kind == CellKind::Inline => in_inline_text = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) if in_value || in_inline_text => {
                value.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                b"c" => {
                    cells.push(resolve_cell(&value, cell_kind, shared));
                    value.clear();
                }
                b"row" => {
                    if cells.iter().any(|c| !c.is_empty()) {
                        rows.push(render_csv_row(&cells));
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(EngineError::Decode {
                    format: "xlsx".to_string(),
                    message: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Number,
}

fn cell_type(e: &quick_xml::events::BytesStart<'_>) -> CellKind {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"t" {
            return match attr.value.as_ref() {
                b"s" => CellKind::Shared,
                b"inlineStr" => CellKind::Inline,
                _ => CellKind::Number,
            };
        }
    }
    CellKind::Number
}

fn resolve_cell(value: &str, kind: CellKind, shared: &[String]) -> String {
    match kind {
        CellKind::Shared => value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .cloned()
            .unwrap_or_default(),
        CellKind::Inline | CellKind::Number => value.trim().to_string(),
    }
}

fn render_csv_row(cells: &[String]) -> String {
    cells
        .iter()
        .map(|c| {
            if c.contains(',') || c.contains('"') {
                format!("\"{}\"", c.replace('"', "\"\""))
            } else {
                c.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_rejected() {
        let err = load(b"bytes", "archive.bin", Some("application/octet-stream")).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_mime_hint_used_when_extension_unknown() {
        let doc = load(b"hello world", "upload", Some("text/plain")).unwrap();
        assert_eq!(doc.text, "hello world");
        assert_eq!(doc.mime_type, MIME_TEXT);
    }

    #[test]
    fn test_bom_stripped_and_newlines_normalized() {
        let bytes = b"\xEF\xBB\xBFline one\r\nline two\rline three";
        let doc = load(bytes, "notes.txt", None).unwrap();
        assert_eq!(doc.text, "line one\nline two\nline three");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let bytes = b"good \xFF bad";
        let doc = load(bytes, "notes.txt", None).unwrap();
        assert!(doc.text.contains('\u{FFFD}'));
        assert!(doc.text.starts_with("good "));
    }

    #[test]
    fn test_invalid_pdf_is_decode_error() {
        let err = load(b"not a pdf", "report.pdf", None).unwrap_err();
        assert!(matches!(err, EngineError::Decode { .. }));
    }

    #[test]
    fn test_invalid_docx_is_decode_error() {
        let err = load(b"not a zip", "report.docx", None).unwrap_err();
        assert!(matches!(err, EngineError::Decode { .. }));
    }

    #[test]
    fn test_csv_header_and_rows() {
        let csv = "name,role\nalice,admin\nbob,viewer\n";
        let doc = load(csv.as_bytes(), "users.csv", None).unwrap();
        assert_eq!(doc.row_count, Some(2));
        let mut lines = doc.text.lines();
        assert_eq!(lines.next(), Some("name\trole"));
        assert_eq!(lines.next(), Some("alice\tadmin"));
        assert_eq!(lines.next(), Some("bob\tviewer"));
    }

    #[test]
    fn test_csv_wide_cells_rendered_as_pairs() {
        let long = "x".repeat(80);
        let csv = format!("id,notes\n7,{}\n", long);
        let doc = load(csv.as_bytes(), "notes.csv", None).unwrap();
        assert!(doc.text.contains("id: 7"));
        assert!(doc.text.contains(&format!("notes: {}", long)));
    }

    #[test]
    fn test_csv_quoted_fields() {
        let csv = "a,b\n\"one, two\",\"say \"\"hi\"\"\"\n";
        let doc = load(csv.as_bytes(), "q.csv", None).unwrap();
        assert!(doc.text.contains("one, two"));
        assert!(doc.text.contains("say \"hi\""));
        assert_eq!(doc.row_count, Some(1));
    }

    #[test]
    fn test_tsv_uses_tab_delimiter() {
        let tsv = "a\tb\n1,5\t2\n";
        let doc = load(tsv.as_bytes(), "data.tsv", None).unwrap();
        // The comma stays inside the first cell.
        assert!(doc.text.contains("1,5\t2"));
    }

    #[test]
    fn test_csv_sniffs_tabs_when_they_dominate() {
        let data = "a\tb\tc\n1\t2\t3\n4\t5\t6\n";
        let doc = load(data.as_bytes(), "odd.csv", None).unwrap();
        assert_eq!(doc.row_count, Some(2));
        assert!(doc.text.lines().next().unwrap().contains("a\tb\tc"));
    }

    #[test]
    fn test_parse_delimited_skips_blank_lines() {
        let records = parse_delimited("a,b\n\n1,2\n", ',');
        assert_eq!(records.len(), 2);
    }
}
