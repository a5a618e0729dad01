//! Predicate model: the user's filter over occurrence search fields
//!
//! A [`Predicate`] is an immutable tree. Leaves test one [`SearchParameter`];
//! compound nodes combine children. The JSON form matches the download request
//! body accepted by the aggregator's web service:
//!
//! ```json
//! {"type": "and", "predicates": [
//!     {"type": "equals", "key": "CATALOG_NUMBER", "value": "K-1123"},
//!     {"type": "greaterThanOrEquals", "key": "YEAR", "value": "1990"}
//! ]}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The fixed set of searchable occurrence parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum SearchParameter {
    Key,
    Latitude,
    Longitude,
    Geometry,
    Country,
    PublishingCountry,
    Continent,
    Year,
    Month,
    EventDate,
    CatalogNumber,
    RecordedBy,
    RecordNumber,
    BasisOfRecord,
    DatasetKey,
    TaxonKey,
    AcceptedTaxonKey,
    KingdomKey,
    PhylumKey,
    ClassKey,
    OrderKey,
    FamilyKey,
    GenusKey,
    SubgenusKey,
    SpeciesKey,
    TaxonomicStatus,
    ScientificName,
    CollectionCode,
    InstitutionCode,
    Elevation,
    Depth,
    HasCoordinate,
    HasGeospatialIssue,
    LastInterpreted,
    TypeStatus,
    MediaType,
    Issue,
    EstablishmentMeans,
    OccurrenceId,
    Repatriated,
    OrganismId,
    StateProvince,
    WaterBody,
    Locality,
    Protocol,
    License,
    CrawlId,
    PublishingOrg,
    InstallationKey,
    NetworkKey,
    EventId,
    ParentEventId,
    SamplingProtocol,
}

impl SearchParameter {
    /// Every parameter, in declaration order
    pub const ALL: [SearchParameter; 53] = [
        SearchParameter::Key,
        SearchParameter::Latitude,
        SearchParameter::Longitude,
        SearchParameter::Geometry,
        SearchParameter::Country,
        SearchParameter::PublishingCountry,
        SearchParameter::Continent,
        SearchParameter::Year,
        SearchParameter::Month,
        SearchParameter::EventDate,
        SearchParameter::CatalogNumber,
        SearchParameter::RecordedBy,
        SearchParameter::RecordNumber,
        SearchParameter::BasisOfRecord,
        SearchParameter::DatasetKey,
        SearchParameter::TaxonKey,
        SearchParameter::AcceptedTaxonKey,
        SearchParameter::KingdomKey,
        SearchParameter::PhylumKey,
        SearchParameter::ClassKey,
        SearchParameter::OrderKey,
        SearchParameter::FamilyKey,
        SearchParameter::GenusKey,
        SearchParameter::SubgenusKey,
        SearchParameter::SpeciesKey,
        SearchParameter::TaxonomicStatus,
        SearchParameter::ScientificName,
        SearchParameter::CollectionCode,
        SearchParameter::InstitutionCode,
        SearchParameter::Elevation,
        SearchParameter::Depth,
        SearchParameter::HasCoordinate,
        SearchParameter::HasGeospatialIssue,
        SearchParameter::LastInterpreted,
        SearchParameter::TypeStatus,
        SearchParameter::MediaType,
        SearchParameter::Issue,
        SearchParameter::EstablishmentMeans,
        SearchParameter::OccurrenceId,
        SearchParameter::Repatriated,
        SearchParameter::OrganismId,
        SearchParameter::StateProvince,
        SearchParameter::WaterBody,
        SearchParameter::Locality,
        SearchParameter::Protocol,
        SearchParameter::License,
        SearchParameter::CrawlId,
        SearchParameter::PublishingOrg,
        SearchParameter::InstallationKey,
        SearchParameter::NetworkKey,
        SearchParameter::EventId,
        SearchParameter::ParentEventId,
        SearchParameter::SamplingProtocol,
    ];

    /// Canonical upper-snake name, as used in download requests
    pub fn name(&self) -> &'static str {
        match self {
            SearchParameter::Key => "KEY",
            SearchParameter::Latitude => "LATITUDE",
            SearchParameter::Longitude => "LONGITUDE",
            SearchParameter::Geometry => "GEOMETRY",
            SearchParameter::Country => "COUNTRY",
            SearchParameter::PublishingCountry => "PUBLISHING_COUNTRY",
            SearchParameter::Continent => "CONTINENT",
            SearchParameter::Year => "YEAR",
            SearchParameter::Month => "MONTH",
            SearchParameter::EventDate => "EVENT_DATE",
            SearchParameter::CatalogNumber => "CATALOG_NUMBER",
            SearchParameter::RecordedBy => "RECORDED_BY",
            SearchParameter::RecordNumber => "RECORD_NUMBER",
            SearchParameter::BasisOfRecord => "BASIS_OF_RECORD",
            SearchParameter::DatasetKey => "DATASET_KEY",
            SearchParameter::TaxonKey => "TAXON_KEY",
            SearchParameter::AcceptedTaxonKey => "ACCEPTED_TAXON_KEY",
            SearchParameter::KingdomKey => "KINGDOM_KEY",
            SearchParameter::PhylumKey => "PHYLUM_KEY",
            SearchParameter::ClassKey => "CLASS_KEY",
            SearchParameter::OrderKey => "ORDER_KEY",
            SearchParameter::FamilyKey => "FAMILY_KEY",
            SearchParameter::GenusKey => "GENUS_KEY",
            SearchParameter::SubgenusKey => "SUBGENUS_KEY",
            SearchParameter::SpeciesKey => "SPECIES_KEY",
            SearchParameter::TaxonomicStatus => "TAXONOMIC_STATUS",
            SearchParameter::ScientificName => "SCIENTIFIC_NAME",
            SearchParameter::CollectionCode => "COLLECTION_CODE",
            SearchParameter::InstitutionCode => "INSTITUTION_CODE",
            SearchParameter::Elevation => "ELEVATION",
            SearchParameter::Depth => "DEPTH",
            SearchParameter::HasCoordinate => "HAS_COORDINATE",
            SearchParameter::HasGeospatialIssue => "HAS_GEOSPATIAL_ISSUE",
            SearchParameter::LastInterpreted => "LAST_INTERPRETED",
            SearchParameter::TypeStatus => "TYPE_STATUS",
            SearchParameter::MediaType => "MEDIA_TYPE",
            SearchParameter::Issue => "ISSUE",
            SearchParameter::EstablishmentMeans => "ESTABLISHMENT_MEANS",
            SearchParameter::OccurrenceId => "OCCURRENCE_ID",
            SearchParameter::Repatriated => "REPATRIATED",
            SearchParameter::OrganismId => "ORGANISM_ID",
            SearchParameter::StateProvince => "STATE_PROVINCE",
            SearchParameter::WaterBody => "WATER_BODY",
            SearchParameter::Locality => "LOCALITY",
            SearchParameter::Protocol => "PROTOCOL",
            SearchParameter::License => "LICENSE",
            SearchParameter::CrawlId => "CRAWL_ID",
            SearchParameter::PublishingOrg => "PUBLISHING_ORG",
            SearchParameter::InstallationKey => "INSTALLATION_KEY",
            SearchParameter::NetworkKey => "NETWORK_KEY",
            SearchParameter::EventId => "EVENT_ID",
            SearchParameter::ParentEventId => "PARENT_EVENT_ID",
            SearchParameter::SamplingProtocol => "SAMPLING_PROTOCOL",
        }
    }
}

/// Lowercase and drop separators so `catalogNumber`, `catalog_number` and
/// `CATALOG-NUMBER` compare equal.
fn fold_parameter_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl std::str::FromStr for SearchParameter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let folded = fold_parameter_name(s);
        SearchParameter::ALL
            .iter()
            .copied()
            .find(|p| fold_parameter_name(p.name()) == folded)
            .ok_or_else(|| Error::UnsupportedPredicate(format!("unknown search parameter '{s}'")))
    }
}

impl std::fmt::Display for SearchParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for SearchParameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for SearchParameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// A boolean filter over occurrence search fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Predicate {
    /// All children must match
    #[serde(rename = "and")]
    Conjunction {
        /// Child predicates
        predicates: Vec<Predicate>,
    },

    /// At least one child must match
    #[serde(rename = "or")]
    Disjunction {
        /// Child predicates
        predicates: Vec<Predicate>,
    },

    /// The child must not match
    #[serde(rename = "not")]
    Negation {
        /// Negated predicate
        predicate: Box<Predicate>,
    },

    /// Exact match
    #[serde(rename = "equals")]
    Equals {
        /// Tested parameter
        key: SearchParameter,
        /// Expected value
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },

    /// Membership in a list of values
    #[serde(rename = "in")]
    In {
        /// Tested parameter
        key: SearchParameter,
        /// Accepted values, passed through verbatim (duplicates included)
        #[serde(deserialize_with = "scalar_strings")]
        values: Vec<String>,
    },

    /// Strictly greater than
    #[serde(rename = "greaterThan")]
    GreaterThan {
        /// Tested parameter
        key: SearchParameter,
        /// Lower bound (exclusive)
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },

    /// Greater than or equal
    #[serde(rename = "greaterThanOrEquals")]
    GreaterThanOrEquals {
        /// Tested parameter
        key: SearchParameter,
        /// Lower bound (inclusive)
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },

    /// Strictly less than
    #[serde(rename = "lessThan")]
    LessThan {
        /// Tested parameter
        key: SearchParameter,
        /// Upper bound (exclusive)
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },

    /// Less than or equal
    #[serde(rename = "lessThanOrEquals")]
    LessThanOrEquals {
        /// Tested parameter
        key: SearchParameter,
        /// Upper bound (inclusive)
        #[serde(deserialize_with = "scalar_string")]
        value: String,
    },

    /// Pattern match (`*` and `?` wildcards)
    #[serde(rename = "like")]
    Like {
        /// Tested parameter
        key: SearchParameter,
        /// Wildcard pattern
        value: String,
    },

    /// The parameter has a value
    #[serde(rename = "isNotNull")]
    IsNotNull {
        /// Tested parameter
        parameter: SearchParameter,
    },

    /// The record's coordinate lies within a geometry
    #[serde(rename = "within")]
    Within {
        /// Well-known text geometry
        geometry: String,
    },
}

/// Type tags the engine knows how to compile.
const KNOWN_TYPES: [&str; 13] = [
    "and",
    "or",
    "not",
    "equals",
    "in",
    "greaterThan",
    "greaterThanOrEquals",
    "lessThan",
    "lessThanOrEquals",
    "like",
    "isNotNull",
    "within",
    // accepted alias for `isNotNull` sent by older clients
    "isNotNullPredicate",
];

impl Predicate {
    /// Conjunction of the given predicates
    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::Conjunction { predicates }
    }

    /// Disjunction of the given predicates
    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Disjunction { predicates }
    }

    /// Negation of a predicate
    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Negation {
            predicate: Box::new(predicate),
        }
    }

    /// `key == value`
    pub fn equals(key: SearchParameter, value: impl Into<String>) -> Self {
        Predicate::Equals {
            key,
            value: value.into(),
        }
    }

    /// `key in values`
    pub fn is_in<I, S>(key: SearchParameter, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::In {
            key,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// `key > value`
    pub fn greater_than(key: SearchParameter, value: impl Into<String>) -> Self {
        Predicate::GreaterThan {
            key,
            value: value.into(),
        }
    }

    /// `key >= value`
    pub fn greater_than_or_equals(key: SearchParameter, value: impl Into<String>) -> Self {
        Predicate::GreaterThanOrEquals {
            key,
            value: value.into(),
        }
    }

    /// `key < value`
    pub fn less_than(key: SearchParameter, value: impl Into<String>) -> Self {
        Predicate::LessThan {
            key,
            value: value.into(),
        }
    }

    /// `key <= value`
    pub fn less_than_or_equals(key: SearchParameter, value: impl Into<String>) -> Self {
        Predicate::LessThanOrEquals {
            key,
            value: value.into(),
        }
    }

    /// `key like pattern`
    pub fn like(key: SearchParameter, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            key,
            value: pattern.into(),
        }
    }

    /// `parameter is not null`
    pub fn is_not_null(parameter: SearchParameter) -> Self {
        Predicate::IsNotNull { parameter }
    }

    /// Coordinate within a WKT geometry
    pub fn within(geometry: impl Into<String>) -> Self {
        Predicate::Within {
            geometry: geometry.into(),
        }
    }

    /// Parse a predicate from its JSON request form
    ///
    /// Type tags this engine does not know (sent by newer clients) fail with
    /// [`Error::UnsupportedPredicate`]; other malformed input fails with
    /// [`Error::Serialization`].
    pub fn from_json(json: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(json)?;
        check_predicate_types(&mut value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to the JSON request form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Walk the raw JSON tree, rejecting unknown type tags and rewriting aliases.
fn check_predicate_types(value: &mut serde_json::Value) -> Result<()> {
    let Some(object) = value.as_object_mut() else {
        return Err(Error::UnsupportedPredicate(format!(
            "expected a predicate object, found {value}"
        )));
    };

    let tag = object
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| Error::UnsupportedPredicate("predicate without a type".to_string()))?
        .to_string();
    if !KNOWN_TYPES.contains(&tag.as_str()) {
        return Err(Error::UnsupportedPredicate(tag));
    }
    if tag == "isNotNullPredicate" {
        object.insert("type".into(), serde_json::Value::from("isNotNull"));
    }

    if let Some(children) = object.get_mut("predicates").and_then(|p| p.as_array_mut()) {
        for child in children {
            check_predicate_types(child)?;
        }
    }
    if let Some(child) = object.get_mut("predicate") {
        check_predicate_types(child)?;
    }
    Ok(())
}

fn scalar_to_string<E: serde::de::Error>(value: serde_json::Value) -> std::result::Result<String, E> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(E::custom(format!("expected a scalar value, found {other}"))),
    }
}

// Predicate values arrive as strings, but numbers and booleans are accepted.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_to_string(serde_json::Value::deserialize(deserializer)?)
}

fn scalar_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<serde_json::Value>::deserialize(deserializer)?
        .into_iter()
        .map(scalar_to_string)
        .collect()
}
