//! Turning raw `notify` events into [`FileChangeEvent`]s.
//!
//! A series is always an immediate child of the library root, so any path
//! below the root is walked up, by its components alone, to that child. The
//! path does not have to exist any more.

use crate::event::{FileChangeEvent, FileChangeKind};
use notify::event::ModifyKind;
use notify::{Event, EventKind};
use stacks_cache::LibraryId;
use std::path::{Component, Path, PathBuf};

/// The series directory a path belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SeriesPath {
    pub path: PathBuf,
    /// Whether the original path *is* the series directory, rather than
    /// something inside it.
    pub is_series: bool,
}

/// Resolve `path` to the immediate child of `root` that contains it.
///
/// `None` for the root itself and for anything outside it.
pub fn resolve_series_path(root: &Path, path: &Path) -> Option<SeriesPath> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components().filter(|c| !matches!(c, Component::CurDir));
    let first = match components.next()? {
        Component::Normal(name) => name,
        _ => return None,
    };
    Some(SeriesPath {
        path: root.join(first),
        is_series: components.next().is_none(),
    })
}

pub fn classify(kind: &EventKind) -> Option<FileChangeKind> {
    match kind {
        EventKind::Create(_) => Some(FileChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Renamed),
        EventKind::Modify(_) | EventKind::Any => Some(FileChangeKind::Changed),
        EventKind::Remove(_) => Some(FileChangeKind::Deleted),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// Normalise one raw event for the library at `root`.
///
/// Renames and deletions *inside* a series only tell us that something in it
/// changed, so they are reported as [`FileChangeKind::Changed`] for the
/// series. A rename event naming both ends produces one event per end.
pub fn normalize(library_id: LibraryId, root: &Path, event: &Event) -> Vec<FileChangeEvent> {
    let Some(kind) = classify(&event.kind) else {
        return Vec::new();
    };
    let mut changes: Vec<FileChangeEvent> = Vec::with_capacity(event.paths.len());
    for path in &event.paths {
        let Some(series) = resolve_series_path(root, path) else {
            tracing::trace!(path = %path.display(), "ignoring event outside of any series");
            continue;
        };
        let kind = match kind {
            FileChangeKind::Renamed | FileChangeKind::Deleted if !series.is_series => FileChangeKind::Changed,
            kind => kind,
        };
        if changes.iter().any(|c| c.path == series.path && c.kind == kind) {
            continue;
        }
        changes.push(FileChangeEvent {
            library_id,
            library_root: root.to_path_buf(),
            kind,
            path: series.path,
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind, RenameMode};
    use rstest::rstest;

    const ROOT: &str = "/library";

    #[rstest]
    #[case("/library/Discworld", Some(("/library/Discworld", true)))]
    #[case("/library/Discworld/", Some(("/library/Discworld", true)))]
    #[case("/library/Discworld/Mort.epub", Some(("/library/Discworld", false)))]
    #[case("/library/Discworld/Extras/Maps/Ankh.epub", Some(("/library/Discworld", false)))]
    #[case("/library", None)]
    #[case("/elsewhere/Discworld", None)]
    #[case("/libraryish/Discworld", None)]
    fn test_resolve_series_path(#[case] path: &str, #[case] expected: Option<(&str, bool)>) {
        let expected = expected.map(|(path, is_series)| SeriesPath { path: PathBuf::from(path), is_series });
        assert_eq!(resolve_series_path(Path::new(ROOT), Path::new(path)), expected);
    }

    #[rstest]
    #[case(EventKind::Create(CreateKind::File), Some(FileChangeKind::Created))]
    #[case(EventKind::Modify(ModifyKind::Data(DataChange::Content)), Some(FileChangeKind::Changed))]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), Some(FileChangeKind::Renamed))]
    #[case(EventKind::Remove(RemoveKind::Folder), Some(FileChangeKind::Deleted))]
    #[case(EventKind::Any, Some(FileChangeKind::Changed))]
    #[case(EventKind::Access(AccessKind::Any), None)]
    #[case(EventKind::Other, None)]
    fn test_classify(#[case] kind: EventKind, #[case] expected: Option<FileChangeKind>) {
        assert_eq!(classify(&kind), expected);
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths.iter().fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    fn kinds(changes: &[FileChangeEvent]) -> Vec<(FileChangeKind, &str)> {
        changes.iter().map(|c| (c.kind, c.path.to_str().unwrap())).collect()
    }

    #[rstest]
    #[case(EventKind::Remove(RemoveKind::Folder), FileChangeKind::Deleted)]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::From)), FileChangeKind::Renamed)]
    fn test_series_level_event_kept(#[case] raw: EventKind, #[case] expected: FileChangeKind) {
        let changes = normalize(1, Path::new(ROOT), &event(raw, &["/library/Discworld"]));
        assert_eq!(kinds(&changes), vec![(expected, "/library/Discworld")]);
        assert_eq!(changes[0].library_id, 1);
        assert_eq!(changes[0].library_root, PathBuf::from(ROOT));
    }

    #[rstest]
    #[case(EventKind::Remove(RemoveKind::File))]
    #[case(EventKind::Modify(ModifyKind::Name(RenameMode::To)))]
    fn test_nested_event_becomes_change(#[case] raw: EventKind) {
        let changes = normalize(1, Path::new(ROOT), &event(raw, &["/library/Discworld/Mort.epub"]));
        assert_eq!(kinds(&changes), vec![(FileChangeKind::Changed, "/library/Discworld")]);
    }

    #[test]
    fn test_rename_between_series() {
        let raw = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/library/Discworld/Mort.epub", "/library/Death/Mort.epub"],
        );
        let changes = normalize(1, Path::new(ROOT), &raw);
        assert_eq!(
            kinds(&changes),
            vec![(FileChangeKind::Changed, "/library/Discworld"), (FileChangeKind::Changed, "/library/Death")]
        );
    }

    #[test]
    fn test_rename_out_of_library_keeps_inside_end() {
        let raw = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/library/Discworld", "/tmp/Discworld"],
        );
        let changes = normalize(1, Path::new(ROOT), &raw);
        assert_eq!(kinds(&changes), vec![(FileChangeKind::Renamed, "/library/Discworld")]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let raw = event(
            EventKind::Create(CreateKind::File),
            &["/library/Discworld/a.epub", "/library/Discworld/b.epub"],
        );
        assert_eq!(normalize(1, Path::new(ROOT), &raw).len(), 1);
    }

    #[test]
    fn test_root_and_access_events_ignored() {
        assert!(normalize(1, Path::new(ROOT), &event(EventKind::Create(CreateKind::Any), &[ROOT])).is_empty());
        let access = event(EventKind::Access(AccessKind::Any), &["/library/Discworld/Mort.epub"]);
        assert!(normalize(1, Path::new(ROOT), &access).is_empty());
    }
}
