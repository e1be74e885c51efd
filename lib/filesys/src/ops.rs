//! Helpers running several operations against any [`FileSystem`].
//!
//! Each helper stops at the first failure and returns it.

use crate::{FileSystem, FsError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpsError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error("expected content '{expected}' in {path}, got '{actual}'")]
    ContentMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Write every file, creating missing parent directories.
pub fn put_files<F, P, D>(fs: &F, files: impl IntoIterator<Item = (P, D)>) -> Result<(), FsError>
where
    F: FileSystem + ?Sized,
    P: AsRef<str>,
    D: AsRef<[u8]>,
{
    for (path, data) in files {
        fs.put_file(path.as_ref(), data.as_ref())?;
    }
    Ok(())
}

/// `mkdir_all` for each path.
pub fn mkdir_many<F, P>(fs: &F, paths: impl IntoIterator<Item = P>) -> Result<(), FsError>
where
    F: FileSystem + ?Sized,
    P: AsRef<str>,
{
    for path in paths {
        fs.mkdir_all(path.as_ref())?;
    }
    Ok(())
}

/// Write `files`, then create `dirs`.
pub fn create_structure<F, P, D, Q>(
    fs: &F,
    files: impl IntoIterator<Item = (P, D)>,
    dirs: impl IntoIterator<Item = Q>,
) -> Result<(), FsError>
where
    F: FileSystem + ?Sized,
    P: AsRef<str>,
    D: AsRef<[u8]>,
    Q: AsRef<str>,
{
    put_files(fs, files)?;
    mkdir_many(fs, dirs)
}

/// Check that `path` is a file holding exactly `expected`.
pub fn verify_file_content<F>(fs: &F, path: &str, expected: &[u8]) -> Result<(), OpsError>
where
    F: FileSystem + ?Sized,
{
    let actual = fs.read_file(path)?;
    if actual != expected {
        return Err(OpsError::ContentMismatch {
            path: path.to_owned(),
            expected: abbreviate(expected),
            actual: abbreviate(&actual),
        });
    }
    Ok(())
}

fn abbreviate(content: &[u8]) -> String {
    if content.len() > 20 {
        format!("{}...", String::from_utf8_lossy(&content[..17]))
    } else {
        String::from_utf8_lossy(content).into_owned()
    }
}
