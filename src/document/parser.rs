use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::trace;

/// Flat list of `(element, text)` pairs found inside the record element,
/// in document order. Duplicates are kept so the schema can reject them.
pub type RawRecord = Vec<(String, String)>;

/// Element names that shape the document.
#[derive(Debug, Clone, Copy)]
pub struct Layout<'a> {
    pub root: &'a str,
    pub record: &'a str,
    pub optional: &'a [String],
}

enum Level {
    Prolog,
    Root,
    Record,
    Field { name: String, text: String },
    Skipped { depth: usize },
    Done,
}

/// Parses `xml` into the record's child elements.
///
/// Fails when the document is not well formed, has a different root, does not
/// contain exactly one record element, or nests elements inside a field.
pub fn parse_record(xml: &str, layout: Layout<'_>) -> Result<RawRecord, String> {
    let mut reader = Reader::from_str(xml);
    let mut level = Level::Prolog;
    let mut fields = RawRecord::new();
    let mut records_seen = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("malformed XML at byte {}: {}", reader.buffer_position(), e))?;

        match event {
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => continue,
            _ => {}
        }

        level = match (level, event) {
            (Level::Prolog, Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                check_root(&name, layout.root)?;
                Level::Root
            }
            (Level::Prolog, Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                check_root(&name, layout.root)?;
                Level::Done
            }

            (Level::Root, Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                if name == layout.record {
                    records_seen += 1;
                    Level::Record
                } else if layout.optional.iter().any(|o| o == &name) {
                    trace!(element = %name, "Skipping optional element");
                    Level::Skipped { depth: 1 }
                } else {
                    return Err(format!(
                        "unexpected element '{}' under '{}'",
                        name, layout.root
                    ));
                }
            }
            (Level::Root, Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref())?;
                if name == layout.record {
                    records_seen += 1;
                } else if !layout.optional.iter().any(|o| o == &name) {
                    return Err(format!(
                        "unexpected element '{}' under '{}'",
                        name, layout.root
                    ));
                }
                Level::Root
            }
            (Level::Root, Event::End(_)) => Level::Done,

            (Level::Record, Event::Start(e)) => Level::Field {
                name: local_name(e.local_name().as_ref())?,
                text: String::new(),
            },
            (Level::Record, Event::Empty(e)) => {
                fields.push((local_name(e.local_name().as_ref())?, String::new()));
                Level::Record
            }
            (Level::Record, Event::End(_)) => Level::Root,

            (Level::Field { name, mut text }, Event::Text(t)) => {
                let value = t.unescape().map_err(|e| format!("bad text in '{}': {}", name, e))?;
                text.push_str(&value);
                Level::Field { name, text }
            }
            (Level::Field { name, mut text }, Event::CData(c)) => {
                let value = String::from_utf8(c.into_inner().into_owned())
                    .map_err(|_| format!("CDATA in '{}' is not valid UTF-8", name))?;
                text.push_str(&value);
                Level::Field { name, text }
            }
            (Level::Field { name, .. }, Event::Start(_) | Event::Empty(_)) => {
                return Err(format!("element '{}' must contain only text", name));
            }
            (Level::Field { name, text }, Event::End(_)) => {
                fields.push((name, text));
                Level::Record
            }

            (Level::Skipped { depth }, Event::Start(_)) => Level::Skipped { depth: depth + 1 },
            (Level::Skipped { depth }, Event::End(_)) if depth == 1 => Level::Root,
            (Level::Skipped { depth }, Event::End(_)) => Level::Skipped { depth: depth - 1 },
            (skipped @ Level::Skipped { .. }, _) => skipped,

            (state, Event::Text(t)) if is_blank(&t) => state,
            (Level::Done, _) => return Err("content after the root element".to_string()),
            (_, Event::Text(_) | Event::CData(_)) => {
                return Err("unexpected text outside of a field element".to_string());
            }
            (_, other) => return Err(format!("unexpected XML event {:?}", other)),
        };
    }

    match level {
        Level::Done => {}
        _ => return Err("unexpected end of document".to_string()),
    }

    match records_seen {
        1 => Ok(fields),
        0 => Err(format!(
            "element '{}' not found under '{}'",
            layout.record, layout.root
        )),
        n => Err(format!(
            "expected one '{}' element, found {}",
            layout.record, n
        )),
    }
}

fn check_root(found: &str, expected: &str) -> Result<(), String> {
    if found == expected {
        Ok(())
    } else {
        Err(format!(
            "expected root element '{}', found '{}'",
            expected, found
        ))
    }
}

fn local_name(raw: &[u8]) -> Result<String, String> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| "element name is not valid UTF-8".to_string())
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}
