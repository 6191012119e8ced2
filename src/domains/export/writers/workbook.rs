//! Minimal SpreadsheetML package writer.
//!
//! Produces a single-sheet `.xlsx` with a styled header row, inline string
//! cells and fixed column widths sized to the content.

use std::io::{Seek, Write};

use zip::result::ZipResult;
use zip::write::FileOptions;
use zip::ZipWriter;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Style index of the bold, grey-filled header cells in `styles.xml`.
const HEADER_STYLE: u32 = 1;
const MAX_COLUMN_WIDTH: usize = 255;
const COLUMN_PADDING: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(i64),
    Text(String),
}

impl Cell {
    fn display_len(&self) -> usize {
        match self {
            Cell::Number(n) => n.to_string().len(),
            Cell::Text(s) => s.chars().count(),
        }
    }
}

/// Rows of one worksheet held in memory until the package is written.
#[derive(Debug, Clone)]
pub struct SheetBuilder {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
    widths: Vec<usize>,
}

impl SheetBuilder {
    pub fn new(name: &str, header: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
            widths: header.iter().map(|h| h.chars().count()).collect(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.display_len();
            match self.widths.get_mut(i) {
                Some(width) => *width = (*width).max(len),
                None => self.widths.push(len),
            }
        }
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column widths in characters, as written to `<cols>`.
    pub fn column_widths(&self) -> Vec<usize> {
        self.widths
            .iter()
            .map(|w| (w + COLUMN_PADDING).min(MAX_COLUMN_WIDTH))
            .collect()
    }

    fn sheet_xml(&self) -> String {
        let mut xml = String::with_capacity(256 + self.rows.len() * 256);
        xml.push_str(XML_DECL);
        xml.push_str(&format!(r#"<worksheet xmlns="{}">"#, MAIN_NS));

        xml.push_str("<cols>");
        for (i, width) in self.column_widths().iter().enumerate() {
            xml.push_str(&format!(
                r#"<col min="{n}" max="{n}" width="{w}" customWidth="1"/>"#,
                n = i + 1,
                w = width
            ));
        }
        xml.push_str("</cols>");

        xml.push_str("<sheetData>");
        xml.push_str(r#"<row r="1">"#);
        for (col, title) in self.header.iter().enumerate() {
            push_text_cell(&mut xml, col, 1, title, Some(HEADER_STYLE));
        }
        xml.push_str("</row>");

        for (i, row) in self.rows.iter().enumerate() {
            let row_num = i + 2;
            xml.push_str(&format!(r#"<row r="{}">"#, row_num));
            for (col, cell) in row.iter().enumerate() {
                match cell {
                    Cell::Number(n) => xml.push_str(&format!(
                        r#"<c r="{}{}"><v>{}</v></c>"#,
                        column_letter(col),
                        row_num,
                        n
                    )),
                    Cell::Text(s) => push_text_cell(&mut xml, col, row_num, s, None),
                }
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData></worksheet>");
        xml
    }

    fn workbook_xml(&self) -> String {
        format!(
            r#"{}<workbook xmlns="{}" xmlns:r="{}"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            XML_DECL,
            MAIN_NS,
            REL_NS,
            escape_xml(&self.name)
        )
    }

    /// Write the complete package and return the underlying writer.
    pub fn write_package<W: Write + Seek>(&self, writer: W) -> ZipResult<W> {
        let mut zip = ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        let parts: [(&str, String); 6] = [
            ("[Content_Types].xml", content_types_xml()),
            ("_rels/.rels", root_rels_xml()),
            ("xl/workbook.xml", self.workbook_xml()),
            ("xl/_rels/workbook.xml.rels", workbook_rels_xml()),
            ("xl/styles.xml", styles_xml()),
            ("xl/worksheets/sheet1.xml", self.sheet_xml()),
        ];

        for (name, content) in parts.iter() {
            zip.start_file(*name, options)?;
            zip.write_all(content.as_bytes())?;
        }

        zip.finish()
    }
}

fn push_text_cell(xml: &mut String, col: usize, row: usize, value: &str, style: Option<u32>) {
    let style_attr = style.map(|s| format!(r#" s="{}""#, s)).unwrap_or_default();
    xml.push_str(&format!(
        r#"<c r="{}{}" t="inlineStr"{}><is><t xml:space="preserve">{}</t></is></c>"#,
        column_letter(col),
        row,
        style_attr,
        escape_xml(value)
    ));
}

/// Zero-based column index to spreadsheet letters (0 -> A, 26 -> AA).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Escape markup characters and drop code points XML 1.0 cannot carry.
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

fn content_types_xml() -> String {
    format!(
        concat!(
            "{}",
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Default Extension="xml" ContentType="application/xml"/>"#,
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
            r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
            "</Types>"
        ),
        XML_DECL
    )
}

fn root_rels_xml() -> String {
    format!(
        r#"{}<Relationships xmlns="{}"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        XML_DECL, PKG_REL_NS, REL_NS
    )
}

fn workbook_rels_xml() -> String {
    format!(
        concat!(
            "{decl}",
            r#"<Relationships xmlns="{pkg}">"#,
            r#"<Relationship Id="rId1" Type="{rel}/worksheet" Target="worksheets/sheet1.xml"/>"#,
            r#"<Relationship Id="rId2" Type="{rel}/styles" Target="styles.xml"/>"#,
            "</Relationships>"
        ),
        decl = XML_DECL,
        pkg = PKG_REL_NS,
        rel = REL_NS
    )
}

/// Font 1 is bold; fill 2 is a solid 25% grey (indexed colour 22).
fn styles_xml() -> String {
    format!(
        concat!(
            "{decl}",
            r#"<styleSheet xmlns="{ns}">"#,
            r#"<fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts>"#,
            r#"<fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill>"#,
            r#"<fill><patternFill patternType="solid"><fgColor rgb="FFC0C0C0"/><bgColor indexed="64"/></patternFill></fill></fills>"#,
            r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
            r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
            r#"<cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#,
            r#"<xf numFmtId="0" fontId="1" fillId="2" borderId="0" xfId="0" applyFont="1" applyFill="1"/></cellXfs>"#,
            r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#,
            "</styleSheet>"
        ),
        decl = XML_DECL,
        ns = MAIN_NS
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut part = archive.by_name(name).unwrap();
        let mut content = String::new();
        part.read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(7), "H");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(701), "ZZ");
        assert_eq!(column_letter(702), "AAA");
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a & b <c>"), "a &amp; b &lt;c&gt;");
        assert_eq!(escape_xml("O'Neil \"x\""), "O&apos;Neil &quot;x&quot;");
        assert_eq!(escape_xml("bell\u{7}tab\t"), "belltab\t");
    }

    #[test]
    fn test_widths_track_longest_value() {
        let mut sheet = SheetBuilder::new("Customers", &["ID", "Name"]);
        sheet.push_row(vec![Cell::Number(123456), Cell::Text("Al".into())]);
        assert_eq!(sheet.column_widths(), vec![8, 6]);

        sheet.push_row(vec![Cell::Number(1), Cell::Text("x".repeat(400))]);
        assert_eq!(sheet.column_widths()[1], MAX_COLUMN_WIDTH);
    }

    #[test]
    fn test_package_contains_all_parts() {
        let mut sheet = SheetBuilder::new("Customers", &["Customer ID", "Name"]);
        sheet.push_row(vec![Cell::Number(1), Cell::Text("Alice & Co".into())]);

        let bytes = sheet.write_package(Cursor::new(Vec::new())).unwrap().into_inner();
        let archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/styles.xml",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(names.contains(&part), "missing part {}", part);
        }

        let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet_xml.contains(r#"<c r="A1" t="inlineStr" s="1">"#));
        assert!(sheet_xml.contains(r#"<c r="A2"><v>1</v></c>"#));
        assert!(sheet_xml.contains("Alice &amp; Co"));
        assert_eq!(sheet_xml.matches("<row ").count(), 2);

        let workbook_xml = read_part(&bytes, "xl/workbook.xml");
        assert!(workbook_xml.contains(r#"<sheet name="Customers""#));

        let styles = read_part(&bytes, "xl/styles.xml");
        assert!(styles.contains("<b/>"));
        assert!(styles.contains(r#"patternType="solid""#));
    }
}
