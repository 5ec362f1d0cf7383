use serde::Deserialize;

use crate::simple_json::Yanked;

/// The response to `{base}/pypi/{package}/{version}/json`.
///
/// Unlike the simple index, this document carries `requires_dist` directly, which makes it
/// the cheapest metadata source when it is filled in. It is not authoritative: the field
/// reflects whatever wheel the registry happened to read it from, and is missing entirely
/// for some releases.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseJson {
    pub info: ReleaseInfo,
}

/// The `info` block of the release JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub requires_dist: Option<Vec<String>>,
    #[serde(default)]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub yanked: Option<Yanked>,
    #[serde(default)]
    pub yanked_reason: Option<String>,
    #[serde(default)]
    pub keywords: Option<StringOrVec>,
    #[serde(default)]
    pub platform: Option<StringOrVec>,
}

impl ReleaseInfo {
    /// Fold the `yanked`/`yanked_reason` field pair into a single canonical value.
    pub fn yanked(&self) -> Option<Yanked> {
        match (&self.yanked, &self.yanked_reason) {
            (Some(Yanked::Bool(true)) | None, Some(reason)) => {
                Some(Yanked::Reason(reason.clone()))
            }
            (yanked, _) => yanked.clone(),
        }
    }
}

/// Fields that are historically either a scalar or a list, depending on the uploader.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}
