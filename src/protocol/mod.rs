//! Decoding of the daemon's flat `Key: Value` response lines
//!
//! Every response body line is one record. Entities that span several lines
//! (a song, a stored playlist) are delimited by a start-of-entity key: each
//! time that key appears, a new entity begins.
//!
//! Decoding is all-or-nothing. One bad line fails the whole batch, because
//! grouping cannot safely resume in the middle of an entity.

pub mod catalog;

use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// Separator between key and value on a response line
pub const SEPARATOR: &str = ": ";

/// Start-of-entity key for song listings (queue, find, stored playlist contents)
pub const SONG_SENTINEL: &str = "file";

/// Start-of-entity key for `listplaylists`
pub const PLAYLIST_SENTINEL: &str = "playlist";

/// Free-form attributes of one daemon entity (status, song, playlist).
pub type Attrs = BTreeMap<String, String>;

/// One decoded response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Decode a single line, splitting on the first `": "`.
///
/// The value keeps any later `": "` occurrences intact. A missing separator or
/// an empty key is a decode failure, never an empty record.
pub fn parse_record(line: &str) -> Result<Record, ProtocolError> {
    match line.find(SEPARATOR) {
        Some(i) if i > 0 => Ok(Record {
            key: line[..i].to_string(),
            value: line[i + SEPARATOR.len()..].to_string(),
        }),
        _ => Err(ProtocolError::MalformedRecord {
            line: line.to_string(),
        }),
    }
}

/// Lazily decode a sequence of lines.
pub fn records<I, S>(lines: I) -> impl Iterator<Item = Result<Record, ProtocolError>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines.into_iter().map(|line| parse_record(line.as_ref()))
}

/// Decode a whole batch; the first malformed line fails everything.
pub fn parse_records<I, S>(lines: I) -> Result<Vec<Record>, ProtocolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    records(lines).collect()
}

/// Decode a response that describes exactly one entity (e.g. `status`).
///
/// Repeated keys keep the last value.
pub fn parse_attrs<I, S>(lines: I) -> Result<Attrs, ProtocolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut attrs = Attrs::new();
    for record in records(lines) {
        let Record { key, value } = record?;
        attrs.insert(key, value);
    }
    Ok(attrs)
}

/// Decode a response listing several entities, starting a new one at every
/// `sentinel` key.
pub fn parse_attrs_list<I, S>(lines: I, sentinel: &str) -> Result<Vec<Attrs>, ProtocolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut entities: Vec<Attrs> = Vec::new();
    for record in records(lines) {
        let Record { key, value } = record?;
        if key == sentinel {
            entities.push(Attrs::new());
        }
        match entities.last_mut() {
            Some(current) => {
                current.insert(key, value);
            }
            None => {
                return Err(ProtocolError::OrphanRecord {
                    key,
                    sentinel: sentinel.to_string(),
                })
            }
        }
    }
    Ok(entities)
}

/// Decode a single-tag listing (e.g. `list genre`) into its values.
pub fn parse_values<I, S>(lines: I) -> Result<Vec<String>, ProtocolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    records(lines)
        .map(|record| record.map(|r| r.value))
        .collect()
}
