use std::ffi::{CString, c_char, c_void};
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use libloading::Library;
use thiserror::Error;

use crate::search_path::{LibrarySearchPath, library_file_name};

/// Loader status: library opened by this call.
pub const STATUS_LOADED: i32 = 0;
/// Loader status: library was already opened earlier.
pub const STATUS_ALREADY_LOADED: i32 = 1;
/// Loader status: library could not be found or opened.
pub const STATUS_NOT_FOUND: i32 = -1;

/// Runtime into which capability providers are loaded.
pub trait Environment {
    type Instance;

    /// Whether `capability` can currently be constructed.
    fn has_capability(&self, capability: &str) -> bool;

    /// Loads `provider` and returns its loader status; negative means failure.
    fn load(&mut self, provider: &str) -> i32;

    fn construct(
        &mut self,
        capability: &str,
        manifest_driven: bool,
        manifest: &Path,
        output: &Path,
    ) -> Result<Self::Instance, ConstructError>;
}

#[derive(Debug, Error)]
pub enum ConstructError {
    #[error("runtime does not provide {capability}")]
    Unresolved { capability: String },
    #[error("{capability} constructor returned a null instance")]
    NullInstance { capability: String },
    #[error("path {0} cannot be passed to the native constructor")]
    InvalidPath(PathBuf),
}

/// Native constructor ABI: `X_new(manifest_driven, manifest, output)`.
type Constructor = unsafe extern "C" fn(bool, *const c_char, *const c_char) -> *mut c_void;

/// Symbol exported by a provider for `capability`.
pub fn constructor_symbol(capability: &str) -> String {
    format!("{capability}_new")
}

/// Opaque handle to a natively constructed object.
///
/// Dropping the handle does not destroy the native instance.
#[derive(Debug)]
pub struct NativeInstance {
    ptr: NonNull<c_void>,
}

impl NativeInstance {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }
}

struct LoadedLibrary {
    provider: String,
    /// Never closed: providers stay resident for the rest of the process.
    library: ManuallyDrop<Library>,
}

/// Environment backed by the process dynamic loader.
///
/// Providers are opened into the global symbol scope and are never
/// unloaded, even when the environment is dropped.
pub struct NativeEnvironment {
    search_path: LibrarySearchPath,
    process: Option<Library>,
    loaded: Vec<LoadedLibrary>,
}

impl NativeEnvironment {
    pub fn new(search_path: LibrarySearchPath) -> Self {
        Self {
            search_path,
            process: process_library(),
            loaded: Vec::new(),
        }
    }

    pub fn loaded_providers(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(|lib| lib.provider.as_str())
    }

    /// Most recently loaded library first, then the running process.
    fn libraries(&self) -> impl Iterator<Item = &Library> {
        self.loaded
            .iter()
            .rev()
            .map(|lib| &*lib.library)
            .chain(self.process.iter())
    }

    fn resolve_constructor(&self, capability: &str) -> Option<Constructor> {
        let symbol = constructor_symbol(capability);
        self.libraries().find_map(|library| {
            // SAFETY: providers export `X_new` with the `Constructor` signature.
            unsafe { library.get::<Constructor>(symbol.as_bytes()) }
                .ok()
                .map(|sym| *sym)
        })
    }
}

impl Environment for NativeEnvironment {
    type Instance = NativeInstance;

    fn has_capability(&self, capability: &str) -> bool {
        let symbol = constructor_symbol(capability);
        self.libraries().any(|library| {
            // SAFETY: the symbol is only looked up, never dereferenced.
            unsafe { library.get::<*const c_void>(symbol.as_bytes()) }.is_ok()
        })
    }

    fn load(&mut self, provider: &str) -> i32 {
        if self.loaded.iter().any(|lib| lib.provider == provider) {
            return STATUS_ALREADY_LOADED;
        }

        let target = self
            .search_path
            .locate(provider)
            .unwrap_or_else(|| PathBuf::from(library_file_name(provider)));

        // SAFETY: loading runs the provider's initialisers, which is the
        // whole point of activating it.
        match unsafe { open_global(&target) } {
            Ok(library) => {
                tracing::debug!(provider, path = %target.display(), "loaded provider library");
                self.loaded.push(LoadedLibrary {
                    provider: provider.to_string(),
                    library: ManuallyDrop::new(library),
                });
                STATUS_LOADED
            }
            Err(err) => {
                tracing::debug!(provider, path = %target.display(), error = %err, "failed to load provider library");
                STATUS_NOT_FOUND
            }
        }
    }

    fn construct(
        &mut self,
        capability: &str,
        manifest_driven: bool,
        manifest: &Path,
        output: &Path,
    ) -> Result<NativeInstance, ConstructError> {
        let constructor =
            self.resolve_constructor(capability)
                .ok_or_else(|| ConstructError::Unresolved {
                    capability: capability.to_string(),
                })?;
        let manifest_c = path_to_cstring(manifest)?;
        let output_c = path_to_cstring(output)?;

        // SAFETY: both strings outlive the call and the constructor copies
        // what it keeps.
        let raw = unsafe { constructor(manifest_driven, manifest_c.as_ptr(), output_c.as_ptr()) };
        let ptr = NonNull::new(raw).ok_or_else(|| ConstructError::NullInstance {
            capability: capability.to_string(),
        })?;

        tracing::debug!(capability, instance = ?ptr, "constructed native instance");
        Ok(NativeInstance { ptr })
    }
}

/// Opens `path` so later providers can bind against its symbols.
#[cfg(unix)]
unsafe fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: forwarded to the caller.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Into::into)
}

#[cfg(not(unix))]
unsafe fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: forwarded to the caller.
    unsafe { Library::new(path) }
}

/// Passes the path bytes through unchanged; NUL bytes are rejected.
#[cfg(unix)]
fn path_to_cstring(path: &Path) -> Result<CString, ConstructError> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ConstructError::InvalidPath(path.to_path_buf()))
}

#[cfg(not(unix))]
fn path_to_cstring(path: &Path) -> Result<CString, ConstructError> {
    path.to_str()
        .and_then(|utf8| CString::new(utf8).ok())
        .ok_or_else(|| ConstructError::InvalidPath(path.to_path_buf()))
}

#[cfg(unix)]
fn process_library() -> Option<Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn process_library() -> Option<Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn process_library() -> Option<Library> {
    None
}
