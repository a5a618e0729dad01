//! Search parameter to backend field name mapping

use crate::predicate::SearchParameter;

/// Backend field names of one search parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldNames {
    /// Name in the structured query document (upper snake case)
    pub document: String,
    /// Name in the legacy query string (lower snake case)
    pub legacy: String,
}

/// Total mapping from [`SearchParameter`] to backend field names
///
/// Built once per compiler. Every parameter has an entry; most map to their
/// own name, a few are indexed under a different field.
#[derive(Clone, Debug)]
pub struct FieldMapping {
    // indexed by the parameter's position in `SearchParameter::ALL`
    names: Vec<FieldNames>,
}

impl FieldMapping {
    /// Build the mapping for every known parameter
    pub fn new() -> Self {
        let names = SearchParameter::ALL
            .iter()
            .map(|parameter| {
                let indexed = match parameter {
                    SearchParameter::Geometry => "COORDINATE",
                    SearchParameter::PublishingOrg => "PUBLISHING_ORGANIZATION_KEY",
                    SearchParameter::HasGeospatialIssue => "SPATIAL_ISSUES",
                    other => other.name(),
                };
                FieldNames {
                    document: indexed.to_ascii_uppercase(),
                    legacy: indexed.to_ascii_lowercase(),
                }
            })
            .collect();
        Self { names }
    }

    /// Field names of a parameter
    pub fn get(&self, parameter: SearchParameter) -> &FieldNames {
        &self.names[parameter as usize]
    }

    /// Field name used in the structured document
    pub fn document_name(&self, parameter: SearchParameter) -> &str {
        &self.get(parameter).document
    }

    /// Field name used in the legacy query string
    pub fn legacy_name(&self, parameter: SearchParameter) -> &str {
        &self.get(parameter).legacy
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::new()
    }
}
