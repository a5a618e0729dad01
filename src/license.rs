//! Dataset licenses and most-restrictive license selection
//!
//! Every dataset publishes its records under one license. A download mixes
//! records from many datasets, so the archive carries the most restrictive
//! license among them.

use serde::{Deserialize, Serialize};

/// License of a dataset
///
/// The derived order is the restrictiveness order: `Cc0_1_0 < CcBy4_0 < CcByNc4_0`.
/// `Unspecified` and `Unsupported` sort below every concrete license and never
/// take part in selection.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum License {
    /// No license declared
    Unspecified,
    /// A license outside the supported set
    Unsupported,
    /// Public domain dedication
    #[serde(rename = "CC0_1_0")]
    Cc0_1_0,
    /// Attribution
    #[serde(rename = "CC_BY_4_0")]
    CcBy4_0,
    /// Attribution, non-commercial
    #[serde(rename = "CC_BY_NC_4_0")]
    CcByNc4_0,
}

impl License {
    /// Every license variant
    pub const ALL: [License; 5] = [
        License::Unspecified,
        License::Unsupported,
        License::Cc0_1_0,
        License::CcBy4_0,
        License::CcByNc4_0,
    ];

    /// Stable name, as stored in the registry
    pub fn as_str(&self) -> &'static str {
        match self {
            License::Unspecified => "UNSPECIFIED",
            License::Unsupported => "UNSUPPORTED",
            License::Cc0_1_0 => "CC0_1_0",
            License::CcBy4_0 => "CC_BY_4_0",
            License::CcByNc4_0 => "CC_BY_NC_4_0",
        }
    }

    /// Canonical legal code URL of a concrete license
    pub fn legal_code(&self) -> Option<&'static str> {
        match self {
            License::Cc0_1_0 => Some("http://creativecommons.org/publicdomain/zero/1.0/legalcode"),
            License::CcBy4_0 => Some("http://creativecommons.org/licenses/by/4.0/legalcode"),
            License::CcByNc4_0 => Some("http://creativecommons.org/licenses/by-nc/4.0/legalcode"),
            License::Unspecified | License::Unsupported => None,
        }
    }

    /// Whether the license is one selection may pick
    pub fn is_concrete(&self) -> bool {
        matches!(
            self,
            License::Cc0_1_0 | License::CcBy4_0 | License::CcByNc4_0
        )
    }

    /// Parse a license from its name or its legal code URL
    ///
    /// Accepts `CC_BY_4_0`, `cc-by-4.0`, `CC BY 4.0` and the creativecommons.org
    /// URLs with or without scheme or trailing `legalcode`. Returns `None` for
    /// empty input.
    pub fn parse(value: &str) -> Option<License> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.contains("creativecommons.org") {
            return Some(if lower.contains("/publicdomain/zero/1.0") {
                License::Cc0_1_0
            } else if lower.contains("/licenses/by-nc/4.0") {
                License::CcByNc4_0
            } else if lower.contains("/licenses/by/4.0") {
                License::CcBy4_0
            } else {
                License::Unsupported
            });
        }

        let normalized: String = lower
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        Some(match normalized.as_str() {
            "cc0_1_0" | "cc0" | "cc0_1" => License::Cc0_1_0,
            "cc_by_4_0" | "cc_by" => License::CcBy4_0,
            "cc_by_nc_4_0" | "cc_by_nc" => License::CcByNc4_0,
            "unspecified" => License::Unspecified,
            _ => License::Unsupported,
        })
    }
}

impl std::fmt::Display for License {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the most restrictive concrete license seen, falling back to a baseline
#[derive(Clone, Debug)]
pub struct LicenseSelector {
    baseline: License,
    selected: Option<License>,
}

impl LicenseSelector {
    /// License used when no concrete license was collected
    pub const DEFAULT_BASELINE: License = License::CcBy4_0;

    /// Create a selector with the given fallback
    pub fn most_restrictive(baseline: License) -> Self {
        Self {
            baseline,
            selected: None,
        }
    }

    /// Take a license into account; non-concrete licenses are ignored
    pub fn collect(&mut self, license: License) {
        if !license.is_concrete() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(current) if current >= license => current,
            _ => license,
        });
    }

    /// The selected license, or the baseline when nothing concrete was collected
    pub fn selected(&self) -> License {
        self.selected.unwrap_or(self.baseline)
    }
}

impl Default for LicenseSelector {
    fn default() -> Self {
        Self::most_restrictive(Self::DEFAULT_BASELINE)
    }
}
