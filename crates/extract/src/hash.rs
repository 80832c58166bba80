use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// BLAKE3 digest of everything `reader` yields, hex encoded.
pub fn hash_reader(reader: impl Read) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(reader).or_raise(|| ErrorKind::Io)?;
    Ok(hasher.finalize().to_string())
}

/// BLAKE3 digest of a file, hex encoded. Blocking.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let file = File::open(path.as_ref()).or_raise(|| ErrorKind::Io)?;
    hash_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_hash_matches_one_shot_digest() {
        let bytes = b"It was a dark and stormy night.".repeat(10_000);
        let streamed = hash_reader(Cursor::new(&bytes)).unwrap();
        assert_eq!(streamed, blake3::hash(&bytes).to_string());
        assert_eq!(streamed.len(), 64);
    }

    #[test]
    fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"content").unwrap();
        assert_eq!(hash_file(&path).unwrap(), blake3::hash(b"content").to_string());
        let err = hash_file(dir.path().join("missing.epub")).unwrap_err();
        assert_eq!(*err, ErrorKind::Io);
    }
}
