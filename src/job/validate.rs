//! Precondition checks shared by the inbound handlers.
//!
//! Every check returns [`RelayError::Validation`], which the HTTP layer maps
//! to `400 Bad Request`.

use std::path::{Component, Path};

use crate::error::{RelayError, Result};

const WINDOWS_DRIVE_MARKER: &str = ":\\";
const WINDOWS_SUBPATH_KEYWORD: &str = "\\oem-files\\";
const POSIX_SUBPATH_KEYWORD: &str = "/input/";

pub fn job_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(RelayError::validation("job id is empty"));
    }
    Ok(())
}

/// Name of a local input file: a bare name with no traversal.
pub fn input_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RelayError::validation("input file name is empty"));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(RelayError::validation(format!(
            "invalid input file name: {}",
            name
        )));
    }
    Ok(())
}

pub fn input_dir_name(dir: &str) -> Result<()> {
    if dir.contains("..") || dir.contains("./") || dir.contains("..\\") {
        return Err(RelayError::validation(format!(
            "invalid input directory: {}",
            dir
        )));
    }
    Ok(())
}

/// Name of a file posted over the wire: a bare file name only.
pub fn received_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(RelayError::validation(format!("invalid filename: {}", name)));
    }
    Ok(())
}

pub fn hostname(expected: &str, actual: &str) -> Result<()> {
    if expected != actual {
        return Err(RelayError::validation(format!(
            "job is addressed to host {}, this host is {}",
            actual, expected
        )));
    }
    Ok(())
}

pub fn file_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(RelayError::validation(format!(
            "file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Subfolder, relative to the receiving base folder, that mirrors the
/// sender's input directory layout.
///
/// Windows senders use `X:\...\oem-files\<sub>`; POSIX senders use
/// `.../input/<sub>`. A POSIX directory without the keyword maps to itself.
/// The result is always relative so it can be joined under a base folder.
pub fn mirrored_subpath(dir_name: &str) -> Result<String> {
    let sub = if dir_name.contains(WINDOWS_DRIVE_MARKER) {
        match dir_name.split_once(WINDOWS_SUBPATH_KEYWORD) {
            Some((_, sub)) => sub.replace('\\', "/"),
            None => {
                return Err(RelayError::Internal(format!(
                    "expected Windows path keyword {:?} in {}",
                    WINDOWS_SUBPATH_KEYWORD, dir_name
                )))
            }
        }
    } else {
        dir_name
            .rsplit(POSIX_SUBPATH_KEYWORD)
            .next()
            .unwrap_or(dir_name)
            .to_string()
    };

    let sub = sub.trim_start_matches('/');
    let escapes = Path::new(sub)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(RelayError::validation(format!(
            "input directory {} leaves the receiving folder",
            dir_name
        )));
    }
    Ok(sub.to_string())
}
