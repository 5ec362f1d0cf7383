use pep508_rs::Requirement;

/// The user-declared inputs to a resolution.
#[derive(Debug, Default)]
pub struct Manifest {
    /// The requirements that must be satisfied by the solution.
    pub(crate) requirements: Vec<Requirement>,
    /// Additional requirements that narrow version selection, but never pull a package
    /// into the solution on their own.
    pub(crate) constraints: Vec<Requirement>,
}

impl Manifest {
    pub fn new(requirements: Vec<Requirement>, constraints: Vec<Requirement>) -> Self {
        Self {
            requirements,
            constraints,
        }
    }

    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Self {
            requirements,
            constraints: Vec::new(),
        }
    }
}
