/// The order in which admissible versions are tried.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Select the highest admissible version of each package (the default).
    #[default]
    Highest,
    /// Select the lowest admissible version of each package, e.g. to verify lower
    /// bounds.
    Lowest,
}
