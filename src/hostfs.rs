//! Small ambient-authority helpers for host paths.

use std::io;

use camino::Utf8Path;
use cap_std::{
    ambient_authority,
    fs_utf8::{Dir, File},
};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &str)> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    Ok((parent, name))
}

/// Creates `path` and any missing parents. Returns `true` when the directory
/// did not exist before.
pub(crate) fn ensure_dir(path: &Utf8Path) -> io::Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    Dir::create_ambient_dir_all(path, ambient_authority())?;
    Ok(true)
}

/// Returns `true` when the directory at `path` has no entries.
pub(crate) fn is_empty_dir(path: &Utf8Path) -> io::Result<bool> {
    let dir = Dir::open_ambient_dir(path, ambient_authority())?;
    Ok(dir.entries()?.next().is_none())
}

/// Removes `path` recursively; a missing path is not an error.
pub(crate) fn remove_tree(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    match dir.remove_dir_all(name) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Removes the empty directory at `path`.
pub(crate) fn remove_empty_dir(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.remove_dir(name)
}

/// Removes the file at `path`; a missing file is not an error.
pub(crate) fn remove_file(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority())?.remove_file(name) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Reads a whole file into a string.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.read_to_string(name)
}

/// Writes `contents` to `path`, replacing any existing file.
#[cfg(test)]
pub(crate) fn write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let (parent, name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.write(name, contents)
}

/// Creates or truncates the file at `path` for writing.
pub(crate) fn create_file(path: &Utf8Path) -> io::Result<File> {
    let (parent, name) = split(path)?;
    Dir::open_ambient_dir(parent, ambient_authority())?.create(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn root(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non UTF-8 temp path {}", path.display()))
    }

    #[test]
    fn ensure_dir_reports_creation_once() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let target = root(&tmp).join("a/b");
        assert!(ensure_dir(&target).unwrap_or_else(|err| panic!("create: {err}")));
        assert!(!ensure_dir(&target).unwrap_or_else(|err| panic!("create: {err}")));
        assert!(is_empty_dir(&target).unwrap_or_else(|err| panic!("list: {err}")));
    }

    #[test]
    fn remove_tree_ignores_missing_paths() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let base = root(&tmp);
        remove_tree(&base.join("missing/deeper")).unwrap_or_else(|err| panic!("remove: {err}"));

        let store = base.join("store");
        ensure_dir(&store.join("nested")).unwrap_or_else(|err| panic!("create: {err}"));
        write(&store.join("nested/file"), b"x").unwrap_or_else(|err| panic!("write: {err}"));
        remove_tree(&store).unwrap_or_else(|err| panic!("remove: {err}"));
        assert!(!store.exists());
    }

    #[test]
    fn create_file_truncates_existing_contents() {
        use std::io::Write as _;

        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = root(&tmp).join("staged");
        write(&path, b"stale contents").unwrap_or_else(|err| panic!("write: {err}"));

        let mut file = create_file(&path).unwrap_or_else(|err| panic!("create: {err}"));
        file.write_all(b"new").unwrap_or_else(|err| panic!("write: {err}"));
        drop(file);

        assert_eq!(read_to_string(&path).unwrap_or_else(|err| panic!("read: {err}")), "new");
    }

    #[test]
    fn read_back_written_file() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let file = root(&tmp).join("mounts");
        write(&file, b"/dev/vdb /mnt/data xfs rw 0 0\n")
            .unwrap_or_else(|err| panic!("write: {err}"));
        let contents = read_to_string(&file).unwrap_or_else(|err| panic!("read: {err}"));
        assert!(contents.contains("/mnt/data"));
        assert!(!is_empty_dir(&root(&tmp)).unwrap_or_else(|err| panic!("list: {err}")));
    }
}
