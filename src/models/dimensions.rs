//! Dimension-value index of a table.
//!
//! For every declared dimension we keep the sorted distinct values observed in
//! the physical data. The entity triple `{entity_id, entity_name, entity_code}`
//! is special: its columns belong together, so it is stored as one derived
//! `entity_zip` dimension built from the distinct joint tuples and encoded as
//! `id|name|code` strings.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};

/// Derived dimension replacing the entity triple
pub const ENTITY_ZIP: &str = "entity_zip";

pub const ENTITY_DIMENSIONS: [&str; 3] = ["entity_id", "entity_name", "entity_code"];

const YEAR: &str = "year";

/// One `(id, name, code)` tuple of the entity dimension.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityTriple {
    pub id: String,
    pub name: Option<String>,
    pub code: Option<String>,
}

impl EntityTriple {
    pub fn new(id: impl Into<String>, name: Option<String>, code: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            code,
        }
    }

    /// `id|name|code`, absent parts encoded as empty strings
    pub fn encode(&self) -> String {
        format!(
            "{}|{}|{}",
            self.id,
            self.name.as_deref().unwrap_or(""),
            self.code.as_deref().unwrap_or("")
        )
    }

    /// Inverse of [`EntityTriple::encode`]. The name may itself contain `|`,
    /// so id and code are split off the two ends.
    pub fn decode(encoded: &str) -> Result<Self> {
        let (id, rest) = encoded
            .split_once('|')
            .ok_or_else(|| Error::InternalConsistency(format!("malformed entity `{encoded}`")))?;
        let (name, code) = rest
            .rsplit_once('|')
            .ok_or_else(|| Error::InternalConsistency(format!("malformed entity `{encoded}`")))?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(Self {
            id: id.to_string(),
            name: non_empty(name),
            code: non_empty(code),
        })
    }
}

/// Encode joint entity tuples into the sorted `entity_zip` value list.
///
/// Duplicated tuples are collapsed; the result is sorted lexicographically on
/// the encoded strings.
pub fn collapse_entities<I>(triples: I) -> Vec<String>
where
    I: IntoIterator<Item = EntityTriple>,
{
    let encoded: BTreeSet<String> = triples.into_iter().map(|t| t.encode()).collect();
    encoded.into_iter().collect()
}

/// Whether the declared dimension set contains the whole entity triple.
pub fn has_entity_triple<S: AsRef<str>>(dimensions: &[S]) -> bool {
    ENTITY_DIMENSIONS
        .iter()
        .all(|d| dimensions.iter().any(|x| x.as_ref() == *d))
}

/// Map from dimension name to its sorted distinct values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionValues(pub BTreeMap<String, Vec<JsonValue>>);

impl DimensionValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dimension: impl Into<String>, values: Vec<JsonValue>) {
        self.0.insert(dimension.into(), values);
    }

    pub fn get(&self, dimension: &str) -> Option<&[JsonValue]> {
        self.0.get(dimension).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Dimensions of `declared` that have no entry after the entity collapse.
    pub fn missing_from<S: AsRef<str>>(&self, declared: &[S]) -> Vec<String> {
        let collapsed = has_entity_triple(declared);
        declared
            .iter()
            .map(AsRef::as_ref)
            .filter(|d| !(collapsed && ENTITY_DIMENSIONS.contains(d)))
            .filter(|d| !self.0.contains_key(*d))
            .map(str::to_string)
            .chain(
                (collapsed && !self.0.contains_key(ENTITY_ZIP)).then(|| ENTITY_ZIP.to_string()),
            )
            .collect()
    }

    /// Decoded entity triples, if the table carries the entity dimension.
    pub fn entities(&self) -> Option<Result<Vec<EntityTriple>>> {
        self.0.get(ENTITY_ZIP).map(|values| {
            values
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => EntityTriple::decode(s),
                    other => Err(Error::InternalConsistency(format!(
                        "entity_zip value {other} is not a string"
                    ))),
                })
                .collect()
        })
    }

    /// API representation: `year` becomes `years`, `entity_zip` becomes
    /// `entities`. Other dimensions are not exposed.
    pub fn to_api_dimensions(&self) -> Result<BTreeMap<String, Dimension>> {
        let mut dimensions = BTreeMap::new();

        if let Some(years) = self.0.get(YEAR) {
            let values = years
                .iter()
                .map(|y| {
                    json_as_i64(y).map(DimensionProperties::id_only).ok_or_else(|| {
                        Error::InternalConsistency(format!("year {y} is not an integer"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            dimensions.insert("years".to_string(), Dimension::int(values));
        }

        if let Some(entities) = self.entities() {
            let values = entities?
                .into_iter()
                .map(|e| {
                    let id = e.id.parse::<i64>().map_err(|_| {
                        Error::InternalConsistency(format!("entity id `{}` is not an integer", e.id))
                    })?;
                    Ok(DimensionProperties {
                        id,
                        name: e.name,
                        code: e.code,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            dimensions.insert("entities".to_string(), Dimension::int(values));
        }

        Ok(dimensions)
    }
}

fn json_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(rename = "type")]
    pub kind: String,
    pub values: Vec<DimensionProperties>,
}

impl Dimension {
    fn int(values: Vec<DimensionProperties>) -> Self {
        Self {
            kind: "int".to_string(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionProperties {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DimensionProperties {
    fn id_only(id: i64) -> Self {
        Self {
            id,
            name: None,
            code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn triple(id: &str, name: &str, code: &str) -> EntityTriple {
        EntityTriple::new(id, Some(name.to_string()), Some(code.to_string()))
    }

    #[test]
    fn test_entity_collapse_round_trip() {
        // joint rows, duplicated the way a long table repeats entities per year
        let rows = vec![
            triple("2", "B", "c2"),
            triple("1", "A", "c1"),
            triple("3", "C", "c3"),
            triple("1", "A", "c1"),
            triple("2", "B", "c2"),
        ];
        let zip = collapse_entities(rows);
        assert_eq!(zip, vec!["1|A|c1", "2|B|c2", "3|C|c3"]);

        let decoded: Vec<EntityTriple> = zip
            .iter()
            .map(|s| EntityTriple::decode(s).unwrap())
            .collect();
        assert_eq!(
            decoded,
            vec![triple("1", "A", "c1"), triple("2", "B", "c2"), triple("3", "C", "c3")]
        );
    }

    #[test]
    fn test_collapse_is_joint_not_independent() {
        // entity 1 changed its code; both tuples must survive
        let zip = collapse_entities(vec![triple("1", "A", "c1"), triple("1", "A", "c9")]);
        assert_eq!(zip, vec!["1|A|c1", "1|A|c9"]);
    }

    #[test]
    fn test_lexicographic_order() {
        let zip = collapse_entities(vec![triple("10", "J", "j"), triple("9", "I", "i")]);
        assert_eq!(zip, vec!["10|J|j", "9|I|i"]);
    }

    #[test]
    fn test_missing_parts_decode_as_absent() {
        let t = EntityTriple::new("5", Some("World".into()), None);
        assert_eq!(t.encode(), "5|World|");
        assert_eq!(EntityTriple::decode("5|World|").unwrap(), t);

        let piped = EntityTriple::decode("7|Bosnia | Herzegovina|BIH").unwrap();
        assert_eq!(piped.name.as_deref(), Some("Bosnia | Herzegovina"));
        assert_eq!(piped.code.as_deref(), Some("BIH"));

        assert!(EntityTriple::decode("no-separator").is_err());
    }

    #[test]
    fn test_missing_from_applies_entity_collapse() {
        let declared = ["year", "entity_id", "entity_name", "entity_code"];
        let mut values = DimensionValues::new();
        values.insert("year", vec![json!(2000)]);
        assert_eq!(values.missing_from(&declared), vec!["entity_zip"]);

        values.insert(ENTITY_ZIP, vec![json!("1|A|c1")]);
        assert!(values.missing_from(&declared).is_empty());

        // without the full triple the columns are independent dimensions
        let partial = ["year", "entity_id"];
        assert_eq!(values.missing_from(&partial), vec!["entity_id"]);
    }

    #[test]
    fn test_parse_dimension_values() {
        let mut values = DimensionValues::new();
        values.insert("year", vec![json!(2000), json!(2001), json!(2002)]);
        values.insert(
            ENTITY_ZIP,
            vec![json!("1|A|c1"), json!("2|B|c2"), json!("3|C|c3")],
        );

        let dims = values.to_api_dimensions().unwrap();
        let api = serde_json::to_value(&dims).unwrap();
        assert_eq!(
            api,
            json!({
                "years": {"type": "int", "values": [{"id": 2000}, {"id": 2001}, {"id": 2002}]},
                "entities": {"type": "int", "values": [
                    {"id": 1, "name": "A", "code": "c1"},
                    {"id": 2, "name": "B", "code": "c2"},
                    {"id": 3, "name": "C", "code": "c3"}
                ]}
            })
        );
    }

    #[test]
    fn test_non_integer_entity_id_is_rejected() {
        let mut values = DimensionValues::new();
        values.insert(ENTITY_ZIP, vec![json!("abc|A|c1")]);
        assert!(matches!(
            values.to_api_dimensions(),
            Err(Error::InternalConsistency(_))
        ));
    }
}
