use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::PathBuf;

use base64::{engine::general_purpose, Engine as _};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::error::ConversionError;

/// Document format, decided by the file header and nothing else. File
/// extensions lie too often to be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocFormat {
    /// Legacy binary Word document (OLE compound file).
    Doc,
    /// OOXML word-processing document (ZIP container).
    Docx,
}

const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

impl DocFormat {
    pub fn sniff(bytes: &[u8]) -> Result<DocFormat, ConversionError> {
        if bytes.starts_with(b"PK\x03\x04") {
            Ok(DocFormat::Docx)
        } else if bytes.starts_with(&OLE_MAGIC) {
            Ok(DocFormat::Doc)
        } else {
            Err(ConversionError::UnknownFormat)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocFormat::Doc => "doc",
            DocFormat::Docx => "docx",
        }
    }
}

pub struct Conversion {
    pub html: String,
    pub format: DocFormat,
    pub extracted_images: Vec<String>,
}

/// What to do with images embedded in the document.
pub enum ImageHandling {
    /// Drop them.
    Skip,
    /// Emit `data:` URIs directly in the HTML.
    Inline,
    /// Write them into a directory and reference them by path. Only for
    /// local callers; the directory is never taken from request input.
    ExtractTo(PathBuf),
}

/// Convert a word-processor document to HTML.
pub fn word_to_html(bytes: &[u8], images: &ImageHandling) -> Result<Conversion, ConversionError> {
    match DocFormat::sniff(bytes)? {
        DocFormat::Docx => docx_to_html(bytes, images),
        DocFormat::Doc => {
            let html = doc_to_html(bytes)?;
            Ok(Conversion {
                html,
                format: DocFormat::Doc,
                extracted_images: Vec::new(),
            })
        }
    }
}

pub fn docx_to_html(
    bytes: &[u8],
    images: &ImageHandling,
) -> Result<Conversion, ConversionError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let document_xml = read_archive_entry(&mut archive, "word/document.xml")?;
    let relationships = match read_archive_entry(&mut archive, "word/_rels/document.xml.rels") {
        Ok(xml) => parse_relationships(&xml)?,
        Err(_) => HashMap::new(),
    };

    let mut reader = Reader::from_reader(document_xml.as_slice());
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut blocks: Vec<String> = Vec::new();
    let mut extracted_images = Vec::new();

    let mut paragraph = String::new();
    let mut in_text = false;
    let mut in_run_props = false;
    let mut bold = false;
    let mut italic = false;

    let mut in_table = false;
    let mut in_cell = false;
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();
    let mut table_rows: Vec<Vec<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"p" if !in_cell => paragraph.clear(),
                b"r" => {
                    bold = false;
                    italic = false;
                }
                b"rPr" => in_run_props = true,
                b"t" => in_text = true,
                b"tbl" => {
                    in_table = true;
                    table_rows.clear();
                }
                b"tr" if in_table => row.clear(),
                b"tc" if in_table => {
                    in_cell = true;
                    cell.clear();
                }
                b"b" if in_run_props => bold = flag_enabled(e),
                b"i" if in_run_props => italic = flag_enabled(e),
                b"blip" => {
                    if let Some(tag) = extract_image(
                        e,
                        &relationships,
                        &mut archive,
                        images,
                        &mut extracted_images,
                    )? {
                        push_markup(&mut paragraph, &mut cell, in_cell, &tag);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match local_name(e.name().as_ref()) {
                b"b" if in_run_props => bold = flag_enabled(e),
                b"i" if in_run_props => italic = flag_enabled(e),
                b"br" => push_markup(&mut paragraph, &mut cell, in_cell, "<br/>"),
                b"blip" => {
                    if let Some(tag) = extract_image(
                        e,
                        &relationships,
                        &mut archive,
                        images,
                        &mut extracted_images,
                    )? {
                        push_markup(&mut paragraph, &mut cell, in_cell, &tag);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if in_text {
                    let raw = e.unescape()?;
                    let mut text = escape_html(&raw);
                    if bold {
                        text = format!("<strong>{}</strong>", text);
                    }
                    if italic {
                        text = format!("<em>{}</em>", text);
                    }
                    push_markup(&mut paragraph, &mut cell, in_cell, &text);
                }
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"t" => in_text = false,
                b"rPr" => in_run_props = false,
                b"p" => {
                    if in_cell {
                        if !cell.is_empty() {
                            cell.push_str("<br/>");
                        }
                    } else if !paragraph.is_empty() {
                        blocks.push(format!("<p>{}</p>", paragraph));
                        paragraph.clear();
                    }
                }
                b"tc" => {
                    in_cell = false;
                    row.push(cell.trim_end_matches("<br/>").to_string());
                }
                b"tr" if in_table => table_rows.push(std::mem::take(&mut row)),
                b"tbl" => {
                    in_table = false;
                    if !table_rows.is_empty() {
                        blocks.push(render_table(&table_rows));
                        table_rows.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ConversionError::Markup(e)),
        }
        buf.clear();
    }

    if blocks.is_empty() {
        return Err(ConversionError::Empty);
    }
    Ok(Conversion {
        html: wrap_html(&blocks.join("\n")),
        format: DocFormat::Docx,
        extracted_images,
    })
}

/// Legacy binary documents: pull the text range the file header points
/// at, with a raw UTF-16 scan as fallback for damaged containers.
pub fn doc_to_html(bytes: &[u8]) -> Result<String, ConversionError> {
    let text = read_word_binary_text(bytes).ok_or(ConversionError::Empty)?;
    let paragraphs: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect();
    if paragraphs.is_empty() {
        return Err(ConversionError::Empty);
    }
    Ok(wrap_html(&paragraphs.join("\n")))
}

fn read_archive_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ConversionError> {
    let mut entry = archive.by_name(name)?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| ConversionError::Archive(zip::result::ZipError::Io(e)))?;
    Ok(data)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ConversionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut map = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if local_name(e.name().as_ref()) == b"Relationship" {
                    if let (Some(id), Some(target)) =
                        (attr_value(e, b"Id"), attr_value(e, b"Target"))
                    {
                        map.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ConversionError::Markup(e)),
        }
        buf.clear();
    }
    Ok(map)
}

fn extract_image(
    e: &BytesStart,
    relationships: &HashMap<String, String>,
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    images: &ImageHandling,
    extracted: &mut Vec<String>,
) -> Result<Option<String>, ConversionError> {
    if matches!(images, ImageHandling::Skip) {
        return Ok(None);
    }
    let rel_id = match attr_value(e, b"embed") {
        Some(id) => id,
        None => return Ok(None),
    };
    let target = match relationships.get(&rel_id) {
        Some(target) => target,
        None => return Ok(None),
    };

    let entry_name = format!("word/{}", target.trim_start_matches("./"));
    let data = read_archive_entry(archive, &entry_name)?;
    let file_name = entry_name.rsplit('/').next().unwrap_or(&entry_name);

    let src = match images {
        ImageHandling::Skip => return Ok(None),
        ImageHandling::Inline => {
            extracted.push(file_name.to_string());
            format!(
                "data:{};base64,{}",
                image_mime(file_name),
                general_purpose::STANDARD.encode(&data)
            )
        }
        ImageHandling::ExtractTo(dir) => {
            let out_path = dir.join(file_name);
            std::fs::create_dir_all(dir).map_err(|e| ConversionError::ImageExtraction {
                name: entry_name.clone(),
                source: e,
            })?;
            std::fs::write(&out_path, data).map_err(|e| ConversionError::ImageExtraction {
                name: entry_name.clone(),
                source: e,
            })?;
            let src = out_path.display().to_string();
            extracted.push(src.clone());
            src
        }
    };
    Ok(Some(format!("<img src=\"{}\"/>", src)))
}

fn image_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn push_markup(paragraph: &mut String, cell: &mut String, in_cell: bool, markup: &str) {
    if in_cell {
        cell.push_str(markup);
    } else {
        paragraph.push_str(markup);
    }
}

fn render_table(rows: &[Vec<String>]) -> String {
    let mut out = String::from("<table>");
    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str("<td>");
            out.push_str(cell);
            out.push_str("</td>");
        }
        out.push_str("</tr>");
    }
    out.push_str("</table>");
    out
}

fn wrap_html(body: &str) -> String {
    format!(
        "<html><head><meta charset=\"utf-8\"/></head><body>\n{}\n</body></html>",
        body
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn local_name(name: &[u8]) -> &[u8] {
    name.split(|b| *b == b':').last().unwrap_or(name)
}

fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    for attr in e.attributes().with_checks(false).flatten() {
        if local_name(attr.key.as_ref()) == key {
            if let Ok(value) = attr.unescape_value() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

/// `w:b`/`w:i` without a `w:val` attribute means enabled.
fn flag_enabled(e: &BytesStart) -> bool {
    match attr_value(e, b"val") {
        None => true,
        Some(v) => v != "0" && v != "false" && v != "off" && v != "none",
    }
}

fn read_word_binary_text(bytes: &[u8]) -> Option<String> {
    if let Some(text) = read_word_via_ole(bytes) {
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    let fallback = extract_utf16_text(bytes);
    if fallback.trim().is_empty() {
        None
    } else {
        Some(fallback)
    }
}

fn read_word_via_ole(bytes: &[u8]) -> Option<String> {
    let mut ole = cfb::CompoundFile::open(Cursor::new(bytes)).ok()?;
    let mut word_stream = Vec::new();
    ole.open_stream("/WordDocument")
        .ok()?
        .read_to_end(&mut word_stream)
        .ok()?;

    let (fc_min, fc_mac) = parse_fib(&word_stream)?;
    let raw = decode_text_range(&word_stream, fc_min, fc_mac);
    let normalized = normalize_word_text(&raw);
    if normalized.trim().is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Minimal FIB read: verify the magic and return the fcMin/fcMac text
/// range offsets.
fn parse_fib(word_stream: &[u8]) -> Option<(u32, u32)> {
    if word_stream.len() < 256 {
        return None;
    }
    if read_u16_le(word_stream, 0)? != 0xA5EC {
        return None;
    }
    let fc_min = read_u32_le(word_stream, 0x18)?;
    let fc_mac = read_u32_le(word_stream, 0x1C)?;
    Some((fc_min, fc_mac))
}

fn decode_text_range(word_stream: &[u8], fc_min: u32, fc_mac: u32) -> String {
    if fc_mac <= fc_min || fc_min as usize >= word_stream.len() {
        return String::new();
    }
    let limit = std::cmp::min(fc_mac as usize, word_stream.len());
    let mut span = limit.saturating_sub(fc_min as usize);
    if span < 4 {
        return String::new();
    }
    if span % 2 != 0 {
        span -= 1;
    }
    let slice = &word_stream[fc_min as usize..fc_min as usize + span];
    let mut units = Vec::with_capacity(span / 2);
    let mut idx = 0;
    while idx + 1 < slice.len() {
        units.push(u16::from_le_bytes([slice[idx], slice[idx + 1]]));
        idx += 2;
    }
    String::from_utf16_lossy(&units)
}

/// Scan raw bytes for runs of printable UTF-16LE text.
fn extract_utf16_text(data: &[u8]) -> String {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<u16> = Vec::new();
    let mut offset = 0;
    while offset + 1 < data.len() {
        let value = u16::from_le_bytes([data[offset], data[offset + 1]]);
        let printable = value >= 0x20
            && value != 0xFFFF
            && value != 0xFFFE
            && !(0xD800..=0xDFFF).contains(&value);
        if printable {
            current.push(value);
        } else {
            if value == 0x000D || value == 0x000A {
                current.push(0x000A);
            } else if current.len() >= 3 {
                chunks.push(String::from_utf16_lossy(&current));
                current.clear();
            } else {
                current.clear();
            }
        }
        offset += 2;
    }
    if current.len() >= 3 {
        chunks.push(String::from_utf16_lossy(&current));
    }
    chunks.join("\n")
}

fn normalize_word_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\r' | '\u{000B}' => out.push('\n'),
            // Cell marks become tabs so tabular text stays readable.
            '\u{0007}' => out.push('\t'),
            '\n' | '\t' => out.push(ch),
            c if (c as u32) < 0x20 => {}
            '\u{FFFD}' => {}
            c => out.push(c),
        }
    }
    out
}

fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
