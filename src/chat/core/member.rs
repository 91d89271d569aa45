//! Member context attached to every AI query.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A household member whose record the assistant reasons about.
///
/// Only the naming fields are typed; everything else the backend returns
/// (medications, conditions, ...) is kept as-is and sent back verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Precomputed full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Short name used by older records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Remaining fields, preserved.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Member {
    /// Name shown in the UI and used in export file names.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(full) = non_blank(self.full_name.as_deref()) {
            return full.to_string();
        }
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .filter_map(non_blank)
            .collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
        non_blank(self.name.as_deref()).unwrap_or("Member").to_string()
    }

    /// Serialized member context sent with each query.
    ///
    /// # Errors
    /// Returns an error if an extra field cannot be serialized.
    pub fn context_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
