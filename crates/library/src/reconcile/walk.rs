use crate::reconcile::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::fs::{self, DirEntry};

/// A file that looks like a book, with the stat used to decide whether it
/// changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BookFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: UtcDateTime,
}
impl BookFile {
    pub(crate) fn from_metadata(path: PathBuf, metadata: &Metadata) -> Result<Self> {
        let modified = metadata.modified().or_raise(|| ErrorKind::Io(path.clone()))?;
        Ok(Self {
            size: metadata.len(),
            modified: modified.into(),
            path,
        })
    }
}

enum WalkEntry {
    Book(BookFile),
    Descend(PathBuf),
    Skip,
}

pub(crate) fn has_book_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|wanted| wanted.eq_ignore_ascii_case(ext)))
}

async fn process_entry(entry: DirEntry, extensions: &[String]) -> Result<WalkEntry> {
    let path = entry.path();
    let metadata = entry.metadata().await.or_raise(|| ErrorKind::Io(path.clone()))?;
    if metadata.is_dir() {
        return Ok(WalkEntry::Descend(path));
    }
    if metadata.is_file() && has_book_extension(&path, extensions) {
        return Ok(WalkEntry::Book(BookFile::from_metadata(path, &metadata)?));
    }
    // Other files, and symlinks which are never followed.
    Ok(WalkEntry::Skip)
}

/// Every book file at any depth below `root`.
///
/// A missing `root` yields nothing. Unreadable directories and entries are
/// yielded as errors and the walk carries on without them.
pub(crate) fn book_files<'a>(root: &'a Path, extensions: &'a [String]) -> impl Stream<Item = Result<BookFile>> + 'a {
    let mut stack = vec![root.to_path_buf()];
    stream! {
        'dirs: while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    yield Err(exn::Exn::from(err).raise(ErrorKind::Io(current.clone())));
                    continue 'dirs;
                }
            };
            'entries: loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break 'entries,
                    Err(err) => {
                        yield Err(exn::Exn::from(err).raise(ErrorKind::Io(current.clone())));
                        break 'entries;
                    },
                };
                match process_entry(entry, extensions).await {
                    Ok(WalkEntry::Book(book)) => yield Ok(book),
                    Ok(WalkEntry::Descend(dir)) => stack.push(dir),
                    Ok(WalkEntry::Skip) => {},
                    Err(err) => yield Err(err),
                };
            }
        }
    }
}
