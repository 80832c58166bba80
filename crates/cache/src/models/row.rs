use crate::error::{Error, ErrorKind, Result};
use crate::models::{Book, Cover, Library, Series};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Paths are stored as UTF-8 text; anything else can't be catalogued.
pub(crate) fn path_text(path: &Path) -> Result<String> {
    Ok(path.to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
}

pub(crate) fn seconds(at: UtcDateTime) -> i64 {
    at.unix_timestamp()
}

pub(crate) fn nanoseconds(at: UtcDateTime) -> Result<i64> {
    i64::try_from(at.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData("modify time"))
}

pub(crate) fn size(bytes: u64) -> Result<i64> {
    i64::try_from(bytes).or_raise(|| ErrorKind::InvalidData("file size"))
}

fn from_seconds(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

fn from_nanoseconds(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp_nanos(i128::from(value)).or_raise(|| ErrorKind::InvalidData(field))
}

#[derive(sqlx::FromRow)]
pub(crate) struct LibraryRow {
    id: i64,
    path: String,
    name: String,
    created_at: i64,
}
impl TryFrom<LibraryRow> for Library {
    type Error = Error;
    fn try_from(row: LibraryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            path: PathBuf::from(row.path),
            name: row.name,
            created_at: from_seconds(row.created_at, "library creation date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SeriesRow {
    id: i64,
    library_id: i64,
    path: String,
    deleted: bool,
    created_at: i64,
    updated_at: i64,
}
impl TryFrom<SeriesRow> for Series {
    type Error = Error;
    fn try_from(row: SeriesRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            library_id: row.library_id,
            path: PathBuf::from(row.path),
            deleted: row.deleted,
            created_at: from_seconds(row.created_at, "series creation date")?,
            updated_at: from_seconds(row.updated_at, "series update date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookRow {
    id: i64,
    series_id: i64,
    path: String,
    hash: String,
    file_size: i64,
    modified_at: i64,
    deleted: bool,
    title: Option<String>,
    author: Option<String>,
    manifest: Option<String>,
    created_at: i64,
}
impl TryFrom<BookRow> for Book {
    type Error = Error;
    fn try_from(row: BookRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            series_id: row.series_id,
            path: PathBuf::from(row.path),
            hash: row.hash,
            size: u64::try_from(row.file_size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            modified: from_nanoseconds(row.modified_at, "modify time")?,
            deleted: row.deleted,
            title: row.title,
            author: row.author,
            manifest: row.manifest,
            created_at: from_seconds(row.created_at, "book creation date")?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CoverRow {
    #[allow(dead_code)]
    book_id: i64,
    data: Vec<u8>,
    width: Option<i64>,
    height: Option<i64>,
    thumbnail: Option<Vec<u8>>,
    placeholder: Option<String>,
}
impl TryFrom<CoverRow> for Cover {
    type Error = Error;
    fn try_from(row: CoverRow) -> Result<Self> {
        Ok(Self {
            data: row.data,
            width: row.width.map(u32::try_from).transpose().or_raise(|| ErrorKind::InvalidData("cover width"))?,
            height: row.height.map(u32::try_from).transpose().or_raise(|| ErrorKind::InvalidData("cover height"))?,
            thumbnail: row.thumbnail,
            placeholder: row.placeholder,
        })
    }
}
