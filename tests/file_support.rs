//! Loader tests over minimal hand-built binary fixtures.
//!
//! Each fixture is the smallest valid file of its format that still
//! exercises the interesting path: PDF page markers, DOCX paragraphs and
//! tables, XLSX sheet banners with shared strings and numeric cells.

use std::io::Write;

use sdch::loader;

/// Minimal valid single-page PDF containing `phrase`, with a correct xref
/// table so pdf-extract can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn minimal_docx() -> Vec<u8> {
    let document = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Intro paragraph text.</w:t></w:r></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>cell one</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>cell two</w:t></w:r></w:p></w:tc>
      </w:tr>
      <w:tr>
        <w:tc><w:p><w:r><w:t>cell three</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>cell four</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
    <w:p><w:r><w:t>Closing paragraph.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
    zip_with(&[("word/document.xml", document)])
}

fn minimal_xlsx() -> Vec<u8> {
    let workbook = r#"<?xml version="1.0"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheets><sheet name="Revenue" sheetId="1"/></sheets>
</workbook>"#;
    let shared = r#"<?xml version="1.0"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3">
  <si><t>region</t></si>
  <si><t>total</t></si>
  <si><t>north</t></si>
</sst>"#;
    let sheet = r#"<?xml version="1.0"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <sheetData>
    <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
    <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>1250</v></c></row>
  </sheetData>
</worksheet>"#;
    zip_with(&[
        ("xl/workbook.xml", workbook),
        ("xl/sharedStrings.xml", shared),
        ("xl/worksheets/sheet1.xml", sheet),
    ])
}

#[test]
fn pdf_gets_page_markers_and_count() {
    let bytes = minimal_pdf("ledger summary phrase");
    let doc = loader::load(&bytes, "report.pdf", None).unwrap();

    assert_eq!(doc.page_count, Some(1));
    assert!(doc.text.starts_with("[Page 1]"));
    assert!(doc.text.contains("ledger summary phrase"));
    assert_eq!(doc.mime_type, loader::MIME_PDF);
}

#[test]
fn docx_paragraphs_and_tables() {
    let bytes = minimal_docx();
    let doc = loader::load(&bytes, "memo.docx", None).unwrap();

    assert!(doc.text.contains("Intro paragraph text."));
    assert!(doc.text.contains("cell one\tcell two"));
    assert!(doc.text.contains("cell three\tcell four"));
    assert!(doc.text.contains("Closing paragraph."));

    // Paragraph order is preserved: intro, table, closing.
    let intro = doc.text.find("Intro paragraph").unwrap();
    let table = doc.text.find("cell one").unwrap();
    let closing = doc.text.find("Closing paragraph").unwrap();
    assert!(intro < table && table < closing);
}

#[test]
fn docx_without_document_xml_is_decode_error() {
    let bytes = zip_with(&[("other.xml", "<x/>")]);
    let err = loader::load(&bytes, "memo.docx", None).unwrap_err();
    assert!(matches!(err, sdch::error::EngineError::Decode { .. }));
}

#[test]
fn xlsx_sheet_banner_and_rows() {
    let bytes = minimal_xlsx();
    let doc = loader::load(&bytes, "numbers.xlsx", None).unwrap();

    assert!(doc.text.contains("# Sheet: Revenue"));
    assert!(doc.text.contains("region,total"));
    assert!(doc.text.contains("north,1250"));
    assert_eq!(doc.row_count, Some(2));
}

#[test]
fn xlsx_without_shared_strings_still_loads() {
    let workbook = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets><sheet name="Data" sheetId="1"/></sheets></workbook>"#;
    let sheet = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1"><v>42</v></c></row></sheetData></worksheet>"#;
    let bytes = zip_with(&[
        ("xl/workbook.xml", workbook),
        ("xl/worksheets/sheet1.xml", sheet),
    ]);
    let doc = loader::load(&bytes, "plain.xlsx", None).unwrap();
    assert!(doc.text.contains("# Sheet: Data"));
    assert!(doc.text.contains("42"));
}
