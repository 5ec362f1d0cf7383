use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use pep440_rs::{Pep440Error, VersionSpecifiers};
use pep508_rs::{Pep508Error, Requirement};

/// Fixups for common specifier mistakes that made it onto pypi, tried in order: the
/// pattern, its replacement, and a description for the log line.
static FIXUPS: Lazy<[(Regex, &str, &str); 5]> = Lazy::new(|| {
    [
        // Ex) `>=7.2.0<8.0.0`
        (
            Regex::new(r"(\d)([<>=~^!])").unwrap(),
            r"$1,$2",
            "inserting missing comma",
        ),
        // Ex) `!=~5.0`
        (
            Regex::new(r"!=~((?:\d\.)*\d)").unwrap(),
            r"!=${1}.*",
            "replacing invalid tilde operator",
        ),
        // Ex) `>=1.9.*`
        (
            Regex::new(r">=(\d+\.\d+)\.\*").unwrap(),
            r">=${1}",
            "removing star after greater equal operator",
        ),
        // Ex) `!=3.0*`
        (
            Regex::new(r"(\d\.\d)+\*").unwrap(),
            r"${1}.*",
            "inserting missing dot before star",
        ),
        // Ex) `>=3.6,`
        (
            Regex::new(r",\s*$").unwrap(),
            r"",
            "removing trailing comma",
        ),
    ]
});

/// Run the parser over every fixed-up rendition of the input, returning the first that
/// parses.
fn try_fixups<T, E>(input: &str, kind: &str, parse: impl Fn(&str) -> Result<T, E>) -> Option<T> {
    for (pattern, replacement, description) in FIXUPS.iter() {
        let patched = pattern.replace_all(input, *replacement);
        if patched != input {
            if let Ok(parsed) = parse(&patched) {
                warn!("{description} in invalid {kind} (before: `{input}`; after: `{patched}`)");
                return Some(parsed);
            }
        }
    }
    None
}

/// Like [`Requirement`], but attempts to correct some common errors in published
/// requirements, e.g. `elasticsearch-dsl (>=7.2.0<8.0.0)` in django-elasticsearch-dsl
/// 7.2.2 is missing a comma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenientRequirement(Requirement);

impl FromStr for LenientRequirement {
    type Err = Pep508Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Requirement::from_str(s) {
            Ok(requirement) => Ok(Self(requirement)),
            Err(err) => try_fixups(s, "requirement", Requirement::from_str)
                .map(Self)
                .ok_or(err),
        }
    }
}

impl From<LenientRequirement> for Requirement {
    fn from(requirement: LenientRequirement) -> Self {
        requirement.0
    }
}

/// Like [`VersionSpecifiers`], but attempts to correct some common errors in published
/// specifiers, e.g. `pyzmq (>=2.7,!=3.0*)` is missing a dot before the star.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LenientVersionSpecifiers(VersionSpecifiers);

impl FromStr for LenientVersionSpecifiers {
    type Err = Pep440Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match VersionSpecifiers::from_str(s) {
            Ok(specifiers) => Ok(Self(specifiers)),
            Err(err) => try_fixups(s, "specifier", VersionSpecifiers::from_str)
                .map(Self)
                .ok_or(err),
        }
    }
}

impl From<LenientVersionSpecifiers> for VersionSpecifiers {
    fn from(specifiers: LenientVersionSpecifiers) -> Self {
        specifiers.0
    }
}
