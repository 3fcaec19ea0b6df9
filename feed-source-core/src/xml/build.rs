//! Conversions into owned [`Document`]s.
//!
//! The DOM parser converts a whole `roxmltree` document. The streaming
//! parser snapshots single elements straight from the scratch file with a
//! second `quick_xml` reader positioned on the element's start tag.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::namespace::NamespaceScope;
use super::tree::{Attribute, Document, DocumentBuilder, QName, XmlElement};
use crate::error::{line_column, Severity, XmlParseError};

/// Parses `text` eagerly. Any well-formedness problem is reported with its
/// line and column; `file` names the source in the error.
pub fn parse_document(text: &str, file: &str) -> Result<Arc<Document>, XmlParseError> {
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = true;
    let parsed = roxmltree::Document::parse_with_options(text, options).map_err(|err| {
        let pos = err.pos();
        XmlParseError {
            severity: Severity::Fatal,
            message: err.to_string(),
            line: pos.row,
            column: pos.col,
            file: file.to_string(),
        }
    })?;

    let mut builder = DocumentBuilder::new();
    for child in parsed.root().children() {
        append_dom_node(&mut builder, child);
    }
    Ok(Arc::new(builder.finish()))
}

fn dom_qname(node: roxmltree::Node<'_, '_>, local: &str, namespace: Option<&str>) -> QName {
    let prefix = namespace
        .and_then(|uri| node.lookup_prefix(uri))
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_string);
    QName {
        prefix,
        local: local.to_string(),
    }
}

fn append_dom_node(builder: &mut DocumentBuilder, node: roxmltree::Node<'_, '_>) {
    if node.is_text() {
        if let Some(text) = node.text() {
            builder.text(text);
        }
        return;
    }
    if !node.is_element() {
        return;
    }
    let tag = node.tag_name();
    let attributes = node
        .attributes()
        .map(|attr| Attribute {
            name: dom_qname(node, attr.name(), attr.namespace()),
            namespace: attr.namespace().map(str::to_string),
            value: attr.value().to_string(),
        })
        .collect();
    builder.start_element(
        dom_qname(node, tag.name(), tag.namespace()),
        tag.namespace().map(str::to_string),
        attributes,
    );
    for child in node.children() {
        append_dom_node(builder, child);
    }
    builder.end_element();
}

/// Splits a start tag into its name, its `xmlns` declarations and its
/// ordinary attributes.
pub(crate) struct StartTag {
    pub name: QName,
    pub declarations: Vec<(Option<String>, String)>,
    pub attributes: Vec<(QName, String)>,
}

pub(crate) fn read_start_tag(start: &BytesStart<'_>) -> Result<StartTag, String> {
    let name = QName::parse(&String::from_utf8_lossy(start.name().as_ref()));
    let mut declarations = Vec::new();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .into_owned();
        if key == "xmlns" {
            declarations.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push((Some(prefix.to_string()), value));
        } else {
            attributes.push((QName::parse(&key), value));
        }
    }
    Ok(StartTag {
        name,
        declarations,
        attributes,
    })
}

fn resolve_tag(scope: &NamespaceScope, tag: StartTag) -> (QName, Option<String>, Vec<Attribute>) {
    let namespace = scope.resolve(tag.name.prefix.as_deref());
    let attributes = tag
        .attributes
        .into_iter()
        .map(|(name, value)| Attribute {
            namespace: name
                .prefix
                .as_deref()
                .and_then(|prefix| scope.resolve(Some(prefix))),
            name,
            value,
        })
        .collect();
    (tag.name, namespace, attributes)
}

fn configure<R>(reader: &mut Reader<R>) {
    let config = reader.config_mut();
    config.expand_empty_elements = true;
    config.trim_text_start = false;
    config.trim_text_end = false;
    config.check_end_names = true;
}

pub(crate) fn new_reader(file: File) -> Reader<BufReader<File>> {
    let mut reader = Reader::from_reader(BufReader::new(file));
    configure(&mut reader);
    reader
}

/// Copies the element whose start tag begins at byte `offset` of `file` into
/// its own document. `inherited` carries the namespace declarations in
/// scope at that point of the outer stream.
pub(crate) fn snapshot_element(
    mut file: File,
    offset: u64,
    inherited: Vec<(Option<String>, String)>,
    source: &str,
) -> Result<XmlElement, XmlParseError> {
    let fail = |message: String, at: u64, file: &mut File| {
        let (line, column) = position_in_file(file, at);
        XmlParseError {
            severity: Severity::Fatal,
            message,
            line,
            column,
            file: source.to_string(),
        }
    };

    let offset = match tag_start(&mut file, offset) {
        Ok(start) => start,
        Err(err) => return Err(fail(err.to_string(), offset, &mut file)),
    };
    if let Err(err) = file.seek(SeekFrom::Start(offset)) {
        return Err(fail(err.to_string(), offset, &mut file));
    }
    let handle = match file.try_clone() {
        Ok(handle) => handle,
        Err(err) => return Err(fail(err.to_string(), offset, &mut file)),
    };
    let mut reader = new_reader(handle);
    let mut scope = NamespaceScope::with_inherited(inherited);
    let mut builder = DocumentBuilder::new();
    let mut buf = Vec::new();

    loop {
        let event = reader.read_event_into(&mut buf);
        let at = offset + reader.buffer_position() as u64;
        match event {
            Ok(Event::Start(start)) => {
                let tag = read_start_tag(&start).map_err(|m| fail(m, at, &mut file))?;
                scope.push(tag.declarations.clone());
                let (name, namespace, attributes) = resolve_tag(&scope, tag);
                builder.start_element(name, namespace, attributes);
            }
            Ok(Event::End(_)) => {
                scope.pop();
                builder.end_element();
                if builder.depth() == 0 {
                    break;
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| fail(e.to_string(), at, &mut file))?;
                builder.text(&text);
            }
            Ok(Event::CData(cdata)) => {
                builder.text(&String::from_utf8_lossy(&cdata));
            }
            Ok(Event::Eof) => {
                return Err(fail(
                    "Premature end of data in tag".to_string(),
                    at,
                    &mut file,
                ));
            }
            Ok(_) => {}
            Err(err) => return Err(fail(err.to_string(), at, &mut file)),
        }
        buf.clear();
    }

    let doc = Arc::new(builder.finish());
    XmlElement::root_of(doc).ok_or_else(|| {
        fail(
            "Start tag expected".to_string(),
            offset,
            &mut file,
        )
    })
}

/// The `<` of the tag recorded at `offset`. The recorded position is either
/// on the `<` or just past it, depending on whether text preceded the tag.
fn tag_start(file: &mut File, offset: u64) -> std::io::Result<u64> {
    use std::io::Read;

    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    if file.read(&mut byte)? == 1 && byte[0] == b'<' {
        return Ok(offset);
    }
    if offset > 0 {
        file.seek(SeekFrom::Start(offset - 1))?;
        if file.read(&mut byte)? == 1 && byte[0] == b'<' {
            return Ok(offset - 1);
        }
    }
    Ok(offset)
}

/// Line and column of byte `offset`, read back from the scratch file.
pub(crate) fn position_in_file(file: &mut File, offset: u64) -> (u32, u32) {
    use std::io::Read;

    let mut prefix = Vec::new();
    if file.seek(SeekFrom::Start(0)).is_err() {
        return (0, 0);
    }
    if (&mut *file).take(offset).read_to_end(&mut prefix).is_err() {
        return (0, 0);
    }
    line_column(&prefix, prefix.len())
}
