use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::io::Read;
use std::path::Path;

/// Metadata read out of a single book file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Extracted {
    pub title: Option<String>,
    pub author: Option<String>,
    /// The package manifest, verbatim, for formats that have one.
    pub manifest: Option<String>,
    /// Raw bytes of the cover image, in whatever format the book embeds.
    pub cover: Option<Vec<u8>>,
}

/// Reads metadata out of a book file.
///
/// Implementations are called on a blocking thread and may read as much of
/// `reader` as they need. An error means the book is left as it was for this
/// pass; it is never fatal to the surrounding scan.
pub trait ContentExtractor: Send + Sync {
    fn extract(&self, path: &Path, reader: &mut dyn Read) -> Result<Extracted>;
}

/// Derives metadata from the file name alone.
///
/// Understands `Author - Title.ext` and plain `Title.ext`; underscores are read
/// as spaces. Never looks at the file contents and never finds a cover.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilenameExtractor;

impl ContentExtractor for FilenameExtractor {
    fn extract(&self, path: &Path, _reader: &mut dyn Read) -> Result<Extracted> {
        let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_raise(|| ErrorKind::Malformed("file name"))?;
        let stem = stem.replace('_', " ");
        let (author, title) = match stem.split_once(" - ") {
            Some((author, title)) => (tidy(author), tidy(title)),
            None => (None, tidy(&stem)),
        };
        // "Author - " with nothing after it: the whole thing is the title.
        let (author, title) = match title {
            Some(title) => (author, Some(title)),
            None => (None, tidy(&stem)),
        };
        Ok(Extracted { title, author, ..Extracted::default() })
    }
}

fn tidy(value: &str) -> Option<String> {
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    (!value.is_empty()).then_some(value)
}
