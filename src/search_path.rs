use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Variable the platform loader consults for shared libraries.
#[cfg(target_os = "macos")]
pub const LOADER_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
pub const LOADER_PATH_VAR: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
pub const LOADER_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// Ordered directories searched for provider libraries.
#[derive(Debug, Clone, Default)]
pub struct LibrarySearchPath {
    dirs: Vec<PathBuf>,
}

impl LibrarySearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Explicit directories first, then the entries of the loader variable.
    pub fn from_env(explicit: &[PathBuf]) -> Self {
        Self::with_loader_path(explicit, std::env::var_os(LOADER_PATH_VAR))
    }

    fn with_loader_path(explicit: &[PathBuf], loader_path: Option<OsString>) -> Self {
        let mut dirs = explicit.to_vec();
        if let Some(raw) = loader_path {
            dirs.extend(
                std::env::split_paths(&raw).filter(|dir| !dir.as_os_str().is_empty()),
            );
        }
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First existing file for `provider` in the search path.
    pub fn locate(&self, provider: &str) -> Option<PathBuf> {
        let file_name = library_file_name(provider);
        self.dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

/// Appends the platform library suffix unless `provider` already has an
/// extension.
pub fn library_file_name(provider: &str) -> String {
    if Path::new(provider).extension().is_some() {
        provider.to_string()
    } else {
        format!("{provider}{}", std::env::consts::DLL_SUFFIX)
    }
}
