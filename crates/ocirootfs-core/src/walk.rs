//! Early-terminating filesystem walk.
//!
//! The visitor answers each entry with a [`Step`]. A policy violation and a
//! genuine failure are separate outcomes, so a caller can never mistake one
//! for the other.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Visitor verdict for a single entry.
#[derive(Debug)]
pub enum Step<E> {
    /// Keep walking.
    Continue,
    /// The entry breaks the policy; stop here.
    Violation,
    /// A hard failure; stop and report it.
    Fail(E),
}

/// Result of a complete or aborted walk.
#[derive(Debug)]
pub enum WalkOutcome<E> {
    /// Every entry was visited and accepted.
    Completed,
    /// The walk stopped at the first violating entry.
    Violation(PathBuf),
    /// The walk stopped on a hard failure.
    Failed(E),
}

/// Visits `root` and everything beneath it, parents before children.
///
/// Symlinks are reported but never followed. Children are visited in file
/// name order. The visitor sees `Err` when an entry cannot be stat'ed, and
/// a directory is reported a second time with `Err` if its listing cannot
/// be read. Listings are read before the directory itself is handed to the
/// visitor.
pub fn walk<E, F>(root: &Path, mut visit: F) -> WalkOutcome<E>
where
    F: FnMut(&Path, io::Result<Metadata>) -> Step<E>,
{
    let entries = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in entries {
        let (path, metadata) = match entry {
            Ok(entry) => {
                let metadata = entry.metadata().map_err(io::Error::from);
                (entry.into_path(), metadata)
            }
            Err(err) => {
                let path = err
                    .path()
                    .map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                (path, Err(io::Error::from(err)))
            }
        };
        match visit(&path, metadata) {
            Step::Continue => {}
            Step::Violation => return WalkOutcome::Violation(path),
            Step::Fail(e) => return WalkOutcome::Failed(e),
        }
    }
    WalkOutcome::Completed
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("b/inner")).expect("mkdir");
        fs::create_dir_all(dir.path().join("a")).expect("mkdir");
        fs::write(dir.path().join("a/file"), b"x").expect("write");
        fs::write(dir.path().join("b/inner/deep"), b"y").expect("write");
        fs::write(dir.path().join("c"), b"z").expect("write");
        dir
    }

    fn relative(root: &Path, path: &Path) -> String {
        path.strip_prefix(root)
            .expect("under root")
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn visits_every_entry_parents_first_in_name_order() {
        let dir = tree();
        let mut seen = Vec::new();
        let outcome = walk::<(), _>(dir.path(), |path, entry| {
            assert!(entry.is_ok());
            seen.push(relative(dir.path(), path));
            Step::Continue
        });

        assert!(matches!(outcome, WalkOutcome::Completed));
        assert_eq!(seen, ["", "a", "a/file", "b", "b/inner", "b/inner/deep", "c"]);
    }

    #[test]
    fn stops_at_first_violation() {
        let dir = tree();
        let mut visited = 0;
        let outcome = walk::<(), _>(dir.path(), |path, _| {
            visited += 1;
            if path.ends_with("b") {
                Step::Violation
            } else {
                Step::Continue
            }
        });

        match outcome {
            WalkOutcome::Violation(path) => assert_eq!(path, dir.path().join("b")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(visited, 4);
    }

    #[test]
    fn failure_is_returned_unchanged() {
        let dir = tree();
        let outcome = walk(dir.path(), |path, _| {
            if path.ends_with("file") {
                Step::Fail("boom")
            } else {
                Step::Continue
            }
        });
        assert!(matches!(outcome, WalkOutcome::Failed("boom")));
    }

    #[test]
    fn missing_root_is_reported_to_the_visitor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let outcome = walk(&missing, |_, entry| match entry {
            Err(e) => Step::Fail(e.kind()),
            Ok(_) => Step::Continue,
        });
        assert!(matches!(outcome, WalkOutcome::Failed(io::ErrorKind::NotFound)));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path().join("b"), dir.path().join("link")).expect("symlink");
        let mut seen = Vec::new();
        let _ = walk::<(), _>(dir.path(), |path, _| {
            seen.push(relative(dir.path(), path));
            Step::Continue
        });
        assert!(seen.contains(&"link".to_string()));
        assert!(!seen.iter().any(|p| p.starts_with("link/")));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_reported_after_the_directory_itself() {
        use std::os::unix::fs::PermissionsExt;

        if nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tree();
        let locked = dir.path().join("b");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("chmod");

        let mut seen = Vec::new();
        let _ = walk::<(), _>(dir.path(), |path, entry| {
            seen.push((relative(dir.path(), path), entry.is_ok()));
            Step::Continue
        });
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("chmod");

        let b_reports: Vec<bool> = seen
            .iter()
            .filter(|(p, _)| p == "b")
            .map(|(_, ok)| *ok)
            .collect();
        assert_eq!(b_reports, [true, false]);
        assert!(!seen.iter().any(|(p, _)| p.starts_with("b/")));
        assert!(seen.iter().any(|(p, _)| p == "c"));
    }
}
