//! Avoid cyclic crate dependencies between the resolver and the build frontend.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Interface to a PEP 517 build frontend.
///
/// Resolving the dependencies of a source distribution means running its (arbitrary)
/// build backend in an isolated environment, which in turn means resolving and
/// installing the backend's own build requirements. Keeping the frontend behind this
/// trait lets the resolver stay a pure function of registry data and the build
/// collaborator, and lets tests substitute a scripted backend.
///
/// Both hooks run on an unpacked source tree. Implementations are expected to capture
/// the backend's stdout/stderr and attach it to returned errors.
pub trait BuildBackend: Send + Sync {
    /// Run `prepare_metadata_for_build_wheel` for the source tree, placing a
    /// `{name}.dist-info` directory inside `out_dir`.
    ///
    /// Returns the path of the created dist-info directory, or `None` when the build
    /// backend does not implement the hook and the caller has to fall back to
    /// [`BuildBackend::build_wheel`].
    fn prepare_metadata<'a>(
        &'a self,
        source_tree: &'a Path,
        out_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<PathBuf>>> + Send + 'a>>;

    /// Run `build_wheel` for the source tree.
    ///
    /// Returns the filename of the wheel written into `wheel_dir`.
    fn build_wheel<'a>(
        &'a self,
        source_tree: &'a Path,
        wheel_dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}
