//! Album catalog folding
//!
//! Two query paths produce album lists:
//!
//! - the grouped listing (`list album group albumartist group date`) returns
//!   flat `Album`, `AlbumArtist`, `Date` triples which are folded by
//!   [`CatalogGrouper`];
//! - the criteria search (`find ...`) returns full song records which are
//!   deduplicated by [`distinct_albums`].

use std::collections::HashSet;

use serde::Serialize;

use super::{parse_records, Attrs, Record};
use crate::error::ProtocolError;

const ALBUM: &str = "Album";
const ALBUM_ARTIST: &str = "AlbumArtist";
const DATE: &str = "Date";
const ARTIST: &str = "Artist";

/// One album in a browse listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlbumSummary {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Artist")]
    pub artist: String,
    #[serde(rename = "Date")]
    pub date: String,
}

/// Which key the grouper accepts next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Nothing read yet
    FirstAlbum,
    AlbumArtist,
    Date,
    /// A complete group is held; only the next `Album` may follow
    NextAlbum,
}

impl Expect {
    fn field(self) -> &'static str {
        match self {
            Expect::FirstAlbum | Expect::NextAlbum => ALBUM,
            Expect::AlbumArtist => ALBUM_ARTIST,
            Expect::Date => DATE,
        }
    }
}

/// Folds grouped album records into [`AlbumSummary`] values.
///
/// Each group is exactly `Album`, `AlbumArtist`, `Date`, in that order. A
/// repeated `Album` after a complete group flushes the accumulator, and the
/// record then starts the next group. The trailing group is flushed by
/// [`CatalogGrouper::finish`].
#[derive(Debug)]
pub struct CatalogGrouper {
    current: AlbumSummary,
    expect: Expect,
    albums: Vec<AlbumSummary>,
}

impl Default for CatalogGrouper {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogGrouper {
    pub fn new() -> Self {
        Self {
            current: AlbumSummary::default(),
            expect: Expect::FirstAlbum,
            albums: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Record) -> Result<(), ProtocolError> {
        let Record { key, value } = record;
        match (key.as_str(), self.expect) {
            (ALBUM, Expect::NextAlbum) => {
                self.flush();
                self.current.title = value;
                self.expect = Expect::AlbumArtist;
            }
            (ALBUM, Expect::FirstAlbum) => {
                self.current.title = value;
                self.expect = Expect::AlbumArtist;
            }
            (ALBUM_ARTIST, Expect::AlbumArtist) => {
                self.current.artist = value;
                self.expect = Expect::Date;
            }
            (DATE, Expect::Date) => {
                self.current.date = value;
                self.expect = Expect::NextAlbum;
            }
            (ALBUM | ALBUM_ARTIST | DATE, expected) => {
                return Err(ProtocolError::MissingField {
                    field: expected.field(),
                    found: Some(key),
                });
            }
            _ => return Err(ProtocolError::UnrecognizedField { key }),
        }
        Ok(())
    }

    /// Flush the trailing group and return every album in encounter order.
    pub fn finish(mut self) -> Result<Vec<AlbumSummary>, ProtocolError> {
        match self.expect {
            Expect::NextAlbum => {
                self.flush();
                Ok(self.albums)
            }
            Expect::FirstAlbum => Ok(self.albums),
            pending => Err(ProtocolError::MissingField {
                field: pending.field(),
                found: None,
            }),
        }
    }

    fn flush(&mut self) {
        self.albums.push(std::mem::take(&mut self.current));
    }
}

/// Fold already-decoded records into album summaries.
pub fn group_albums<I>(records: I) -> Result<Vec<AlbumSummary>, ProtocolError>
where
    I: IntoIterator<Item = Record>,
{
    let mut grouper = CatalogGrouper::new();
    for record in records {
        grouper.push(record)?;
    }
    grouper.finish()
}

/// Decode raw response lines and fold them into album summaries.
pub fn parse_album_listing<I, S>(lines: I) -> Result<Vec<AlbumSummary>, ProtocolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    group_albums(parse_records(lines)?)
}

/// Distinct albums of a song list, keyed on (artist, album title).
///
/// Keying on the title alone would merge same-titled albums by different
/// artists ("Greatest Hits").
pub fn distinct_albums(songs: &[Attrs]) -> Vec<AlbumSummary> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut albums = Vec::new();

    for song in songs {
        let artist = song.get(ARTIST).map(String::as_str).unwrap_or_default();
        let title = song.get(ALBUM).map(String::as_str).unwrap_or_default();
        if !seen.insert((artist, title)) {
            continue;
        }
        albums.push(AlbumSummary {
            title: title.to_string(),
            artist: artist.to_string(),
            date: song.get(DATE).cloned().unwrap_or_default(),
        });
    }

    albums
}
