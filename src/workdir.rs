//! Owner-only file access inside an instance's working-state directory.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Errors raised while touching the working-state directory.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{action} `{path}`: {message}")]
pub struct WorkdirError {
    /// What was being attempted (for example `write`).
    pub action: &'static str,
    /// Path involved.
    pub path: Utf8PathBuf,
    /// Underlying I/O error text.
    pub message: String,
}

impl WorkdirError {
    fn new(action: &'static str, path: &Utf8Path, err: &io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

fn open(workdir: &Utf8Path) -> Result<Dir, WorkdirError> {
    Dir::create_ambient_dir_all(workdir, ambient_authority())
        .map_err(|err| WorkdirError::new("create directory", workdir, &err))?;
    restrict(workdir, 0o700).map_err(|err| WorkdirError::new("restrict", workdir, &err))?;
    Dir::open_ambient_dir(workdir, ambient_authority())
        .map_err(|err| WorkdirError::new("open directory", workdir, &err))
}

/// Writes `contents` to `workdir/name` with mode `0600`, creating the
/// directory (mode `0700`) when needed. Returns the file path.
///
/// # Errors
///
/// Returns [`WorkdirError`] when the directory or file cannot be written or
/// its permissions cannot be restricted.
pub fn write_private(
    workdir: &Utf8Path,
    name: &str,
    contents: impl AsRef<[u8]>,
) -> Result<Utf8PathBuf, WorkdirError> {
    let dir = open(workdir)?;
    let path = workdir.join(name);
    dir.write(name, contents)
        .map_err(|err| WorkdirError::new("write", &path, &err))?;
    restrict(&path, 0o600).map_err(|err| WorkdirError::new("restrict", &path, &err))?;
    Ok(path)
}

/// Reads `workdir/name`, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns [`WorkdirError`] for any failure other than a missing file.
pub fn read_optional(workdir: &Utf8Path, name: &str) -> Result<Option<String>, WorkdirError> {
    let path = workdir.join(name);
    let dir = match Dir::open_ambient_dir(workdir, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(WorkdirError::new("open directory", workdir, &err)),
    };
    match dir.read_to_string(name) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(WorkdirError::new("read", &path, &err)),
    }
}

#[cfg(unix)]
fn restrict(path: &Utf8Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict(_path: &Utf8Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
