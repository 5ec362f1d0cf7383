use crate::{PreReleaseMode, ResolutionMode};

/// Options for resolving a manifest.
#[derive(Debug, Copy, Clone)]
pub struct ResolutionOptions {
    pub(crate) resolution_mode: ResolutionMode,
    pub(crate) prerelease_mode: PreReleaseMode,
    /// Upper bound on concurrent registry fetches per round.
    pub(crate) max_concurrent_fetches: usize,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            resolution_mode: ResolutionMode::default(),
            prerelease_mode: PreReleaseMode::default(),
            max_concurrent_fetches: 16,
        }
    }
}

impl ResolutionOptions {
    pub fn new(
        resolution_mode: ResolutionMode,
        prerelease_mode: PreReleaseMode,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            resolution_mode,
            prerelease_mode,
            max_concurrent_fetches,
        }
    }
}
