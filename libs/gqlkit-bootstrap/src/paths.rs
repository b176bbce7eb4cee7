use std::path::{Path, PathBuf};
use std::{env, fs};

#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("no home directory: {0} is not set")]
    EnvMissing(&'static str),
    #[error("home_dir must be absolute after ~ expansion: {0}")]
    NotAbsolute(String),
    #[error("failed to create home_dir: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(target_os = "windows")]
const USER_HOME_VARS: &[&str] = &["USERPROFILE", "HOME"];
#[cfg(not(target_os = "windows"))]
const USER_HOME_VARS: &[&str] = &["HOME"];

#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

fn user_home() -> Result<PathBuf, HomeDirError> {
    USER_HOME_VARS
        .iter()
        .find_map(|var| env::var_os(var))
        .map(PathBuf::from)
        .ok_or(HomeDirError::EnvMissing(USER_HOME_VARS[0]))
}

/// Expands a leading `~` and requires the result to be absolute.
fn expand(raw: &str) -> Result<PathBuf, HomeDirError> {
    let expanded = if raw == "~" {
        user_home()?
    } else if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        user_home()?.join(rest)
    } else {
        PathBuf::from(raw)
    };
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Err(HomeDirError::NotAbsolute(raw.to_string()))
    }
}

/// Resolves the server home directory.
///
/// An explicit value gets `~` expansion and must end up absolute. Without one
/// the default is `<base>/<default_subdir>`, where `<base>` is `%APPDATA%` on
/// Windows and `$HOME` elsewhere. With `create` the directory is created.
pub fn resolve_home_dir(
    configured: Option<&str>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => expand(raw)?,
        None => env::var_os(DEFAULT_BASE_VAR)
            .map(|base| Path::new(&base).join(default_subdir))
            .ok_or(HomeDirError::EnvMissing(DEFAULT_BASE_VAR))?,
    };
    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}
