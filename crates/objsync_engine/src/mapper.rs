//! Conversion between local objects and remote records.
//!
//! Remote values are JSON:
//!
//! | Local type | Remote value                      |
//! |------------|-----------------------------------|
//! | Boolean    | `true` / `false`                  |
//! | Integer    | number                            |
//! | Double     | number                            |
//! | String     | string                            |
//! | Date       | ISO-8601 UTC string               |
//! | Binary     | base64 string                     |
//! | to-one     | sync identifier of the target     |
//! | to-many    | array of target sync identifiers  |
//!
//! Null attributes and empty relationships are omitted from outbound
//! records. The sync attribute and the synced flag are never sent.

use crate::config::SyncConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use objsync_model::{
    date_from_iso8601, iso8601_timestamp, AttributeType, AttributeValue, Cardinality,
    EntitySchema, RelationshipDescriptor, RemoteRecord, RemoteValue, SyncId,
};
use objsync_store::{LocalObject, ObjectId};

/// Largest magnitude at which every integral double is exact.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A remote field whose value does not fit the declared local type.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidAttribute {
    /// Property name.
    pub property: String,
    /// Offending remote value.
    pub value: RemoteValue,
    /// Declared local type. Relationship references expect strings.
    pub expected: AttributeType,
}

/// Decoded targets of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipTargets {
    /// Target identifier, if any.
    ToOne(Option<SyncId>),
    /// Target identifiers in remote order.
    ToMany(Vec<SyncId>),
}

impl RelationshipTargets {
    /// Returns true if there are no targets.
    pub fn is_empty(&self) -> bool {
        match self {
            RelationshipTargets::ToOne(target) => target.is_none(),
            RelationshipTargets::ToMany(targets) => targets.is_empty(),
        }
    }
}

/// A decoded relationship field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRelationship {
    /// Relationship name.
    pub name: String,
    /// Entity name of the targets.
    pub destination: String,
    /// Target identifiers.
    pub targets: RelationshipTargets,
}

/// Field values decoded from a remote record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    /// Values for every declared attribute. Fields missing remotely decode
    /// to null.
    pub attributes: Vec<(String, AttributeValue)>,
    /// Targets for every declared relationship.
    pub relationships: Vec<DecodedRelationship>,
    /// Fields that were skipped because of a type mismatch.
    pub invalid: Vec<InvalidAttribute>,
}

/// Maps the properties of one entity to and from remote fields.
#[derive(Debug, Clone, Copy)]
pub struct AttributeMapper<'a> {
    schema: &'a EntitySchema,
    config: &'a SyncConfig,
}

impl<'a> AttributeMapper<'a> {
    /// Creates a mapper for an entity.
    pub fn new(schema: &'a EntitySchema, config: &'a SyncConfig) -> Self {
        Self { schema, config }
    }

    fn is_bookkeeping(&self, name: &str) -> bool {
        name == self.config.sync_attribute || name == self.config.synced_flag_attribute
    }

    /// Builds the remote record of an object.
    ///
    /// `resolve` maps a relationship target to its sync identifier; targets
    /// it cannot resolve are left out of the record.
    pub fn to_remote_fields<F>(&self, object: &LocalObject, id: SyncId, mut resolve: F) -> RemoteRecord
    where
        F: FnMut(&RelationshipDescriptor, ObjectId) -> Option<SyncId>,
    {
        let mut record = RemoteRecord::new(id);

        for (name, _) in self.schema.attributes() {
            if self.is_bookkeeping(name) {
                continue;
            }
            if let Some(value) = encode_attribute(object.attribute(name)) {
                record.set_field(name, value);
            }
        }

        for (name, descriptor) in self.schema.relationships() {
            let targets = object
                .relationship(name)
                .map(|value| value.targets())
                .unwrap_or_default();
            let ids: Vec<RemoteValue> = targets
                .into_iter()
                .filter_map(|target| resolve(descriptor, target))
                .map(|id| RemoteValue::String(id.into()))
                .collect();

            match descriptor.cardinality {
                Cardinality::ToOne => {
                    if let Some(id) = ids.into_iter().next() {
                        record.set_field(name, id);
                    }
                }
                Cardinality::ToMany => {
                    if !ids.is_empty() {
                        record.set_field(name, RemoteValue::Array(ids));
                    }
                }
            }
        }

        record
    }

    /// Decodes the fields of a remote record against the schema.
    ///
    /// Unknown fields are ignored. A field of the wrong type is reported in
    /// [`DecodedRecord::invalid`] and left out of the decoded values.
    pub fn from_remote_fields(&self, record: &RemoteRecord) -> DecodedRecord {
        let mut decoded = DecodedRecord::default();

        for (name, ty) in self.schema.attributes() {
            if self.is_bookkeeping(name) {
                continue;
            }
            let Some(value) = record.field(name) else {
                decoded.attributes.push((name.to_string(), AttributeValue::Null));
                continue;
            };
            match decode_attribute(value, ty) {
                Some(value) => decoded.attributes.push((name.to_string(), value)),
                None => decoded.invalid.push(InvalidAttribute {
                    property: name.to_string(),
                    value: value.clone(),
                    expected: ty,
                }),
            }
        }

        for (name, descriptor) in self.schema.relationships() {
            let value = record.field(name).unwrap_or(&RemoteValue::Null);
            match decode_relationship(value, descriptor.cardinality) {
                Some(targets) => decoded.relationships.push(DecodedRelationship {
                    name: name.to_string(),
                    destination: descriptor.destination.clone(),
                    targets,
                }),
                None => decoded.invalid.push(InvalidAttribute {
                    property: name.to_string(),
                    value: value.clone(),
                    expected: AttributeType::String,
                }),
            }
        }

        for name in record.fields().keys() {
            if !self.schema.has_property(name) {
                tracing::trace!(entity = self.schema.name(), field = %name, "ignoring unknown remote field");
            }
        }

        decoded
    }
}

/// Encodes an attribute value. Returns `None` for values that are omitted:
/// null, and doubles that JSON cannot represent.
pub fn encode_attribute(value: &AttributeValue) -> Option<RemoteValue> {
    match value {
        AttributeValue::Null => None,
        AttributeValue::Bool(b) => Some(RemoteValue::Bool(*b)),
        AttributeValue::Integer(i) => Some(RemoteValue::from(*i)),
        AttributeValue::Double(d) => serde_json::Number::from_f64(*d).map(RemoteValue::Number),
        AttributeValue::Text(s) => Some(RemoteValue::String(s.clone())),
        AttributeValue::Date(date) => Some(RemoteValue::String(iso8601_timestamp(date))),
        AttributeValue::Binary(bytes) => Some(RemoteValue::String(STANDARD.encode(bytes))),
    }
}

/// Decodes a remote value as `expected`. Returns `None` on a type mismatch.
///
/// JSON null decodes to [`AttributeValue::Null`] for every type. Integral
/// numbers written in floating-point form are accepted as integers.
pub fn decode_attribute(value: &RemoteValue, expected: AttributeType) -> Option<AttributeValue> {
    if value.is_null() {
        return Some(AttributeValue::Null);
    }
    match expected {
        AttributeType::Boolean => value.as_bool().map(AttributeValue::Bool),
        AttributeType::Integer => value
            .as_i64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER)
                    .map(|f| f as i64)
            })
            .map(AttributeValue::Integer),
        AttributeType::Double => value.as_f64().map(AttributeValue::Double),
        AttributeType::String => value.as_str().map(|s| AttributeValue::Text(s.to_string())),
        AttributeType::Date => value
            .as_str()
            .and_then(|s| date_from_iso8601(s).ok())
            .map(AttributeValue::Date),
        AttributeType::Binary => value
            .as_str()
            .and_then(|s| STANDARD.decode(s).ok())
            .map(AttributeValue::Binary),
    }
}

/// Decodes a relationship field. Returns `None` if the value is not a valid
/// reference for the cardinality.
///
/// To-many relationships accept an array of identifiers or an object keyed
/// by identifier.
fn decode_relationship(value: &RemoteValue, cardinality: Cardinality) -> Option<RelationshipTargets> {
    match (cardinality, value) {
        (Cardinality::ToOne, RemoteValue::Null) => Some(RelationshipTargets::ToOne(None)),
        (Cardinality::ToOne, RemoteValue::String(s)) => {
            SyncId::parse(s.as_str()).ok().map(|id| RelationshipTargets::ToOne(Some(id)))
        }
        (Cardinality::ToMany, RemoteValue::Null) => Some(RelationshipTargets::ToMany(Vec::new())),
        (Cardinality::ToMany, RemoteValue::Array(items)) => items
            .iter()
            .map(|item| item.as_str().and_then(|s| SyncId::parse(s).ok()))
            .collect::<Option<Vec<_>>>()
            .map(RelationshipTargets::ToMany),
        (Cardinality::ToMany, RemoteValue::Object(keys)) => keys
            .keys()
            .map(|key| SyncId::parse(key.as_str()).ok())
            .collect::<Option<Vec<_>>>()
            .map(RelationshipTargets::ToMany),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use objsync_store::RelationshipValue;
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::new("Task")
            .with_attribute("syncID", AttributeType::String)
            .with_attribute("isSynced", AttributeType::Boolean)
            .with_attribute("title", AttributeType::String)
            .with_attribute("done", AttributeType::Boolean)
            .with_attribute("priority", AttributeType::Integer)
            .with_attribute("estimate", AttributeType::Double)
            .with_attribute("dueDate", AttributeType::Date)
            .with_attribute("attachment", AttributeType::Binary)
            .with_to_one("project", "Project")
            .with_to_many("tags", "Tag")
    }

    fn id(s: &str) -> SyncId {
        SyncId::parse(s).unwrap()
    }

    #[test]
    fn outbound_record_omits_bookkeeping_and_nulls() {
        let schema = schema();
        let config = SyncConfig::default();
        let mapper = AttributeMapper::new(&schema, &config);
        let due = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let object = LocalObject::new(ObjectId::from_raw(1), "Task")
            .with_attribute("syncID", "t1")
            .with_attribute("isSynced", false)
            .with_attribute("title", "Write report")
            .with_attribute("priority", 3i64)
            .with_attribute("dueDate", due)
            .with_attribute("attachment", vec![1u8, 2, 3]);

        let record = mapper.to_remote_fields(&object, id("t1"), |_, _| None);

        assert_eq!(record.field("title"), Some(&json!("Write report")));
        assert_eq!(record.field("priority"), Some(&json!(3)));
        assert_eq!(record.field("dueDate"), Some(&json!("2024-03-01T12:00:00Z")));
        assert_eq!(record.field("attachment"), Some(&json!("AQID")));
        assert!(record.field("syncID").is_none());
        assert!(record.field("isSynced").is_none());
        assert!(record.field("done").is_none());
        assert!(record.field("project").is_none());
    }

    #[test]
    fn outbound_relationships_use_target_identifiers() {
        let schema = schema();
        let config = SyncConfig::default();
        let mapper = AttributeMapper::new(&schema, &config);

        let object = LocalObject::new(ObjectId::from_raw(1), "Task")
            .with_relationship("project", RelationshipValue::ToOne(Some(ObjectId::from_raw(7))))
            .with_relationship(
                "tags",
                RelationshipValue::ToMany(vec![ObjectId::from_raw(8), ObjectId::from_raw(9)]),
            );

        let record = mapper.to_remote_fields(&object, id("t1"), |descriptor, target| {
            match (descriptor.destination.as_str(), target.as_u64()) {
                ("Project", 7) => Some(id("p7")),
                ("Tag", 8) => Some(id("g8")),
                _ => None,
            }
        });

        assert_eq!(record.field("project"), Some(&json!("p7")));
        assert_eq!(record.field("tags"), Some(&json!(["g8"])));
    }

    #[test]
    fn inbound_decoding() {
        let schema = schema();
        let config = SyncConfig::default();
        let mapper = AttributeMapper::new(&schema, &config);

        let record = RemoteRecord::new(id("t1"))
            .with_field("title", "Buy milk")
            .with_field("done", true)
            .with_field("priority", json!(2.0))
            .with_field("estimate", 1.5)
            .with_field("dueDate", "2024-03-01T12:00:00.250Z")
            .with_field("project", "p1")
            .with_field("tags", json!({"g1": true, "g2": true}))
            .with_field("color", "blue");

        let decoded = mapper.from_remote_fields(&record);
        assert!(decoded.invalid.is_empty());

        let value = |name: &str| {
            decoded
                .attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(value("title"), Some(AttributeValue::from("Buy milk")));
        assert_eq!(value("priority"), Some(AttributeValue::Integer(2)));
        assert_eq!(value("estimate"), Some(AttributeValue::Double(1.5)));
        assert_eq!(value("attachment"), Some(AttributeValue::Null));
        assert!(matches!(value("dueDate"), Some(AttributeValue::Date(_))));
        assert_eq!(value("syncID"), None);

        assert_eq!(decoded.relationships.len(), 2);
        assert_eq!(
            decoded.relationships[0].targets,
            RelationshipTargets::ToOne(Some(id("p1")))
        );
        assert_eq!(
            decoded.relationships[1].targets,
            RelationshipTargets::ToMany(vec![id("g1"), id("g2")])
        );
    }

    #[test]
    fn type_mismatches_are_reported() {
        let schema = schema();
        let config = SyncConfig::default();
        let mapper = AttributeMapper::new(&schema, &config);

        let record = RemoteRecord::new(id("t1"))
            .with_field("title", "ok")
            .with_field("dueDate", "next tuesday")
            .with_field("priority", "high")
            .with_field("project", 42);

        let decoded = mapper.from_remote_fields(&record);
        let invalid: Vec<&str> = decoded.invalid.iter().map(|i| i.property.as_str()).collect();
        assert_eq!(invalid, vec!["dueDate", "priority", "project"]);
        assert_eq!(decoded.invalid[0].expected, AttributeType::Date);
        assert!(decoded.attributes.iter().all(|(n, _)| n != "dueDate"));
        assert!(decoded.relationships.iter().all(|r| r.name != "project"));
    }

    #[test]
    fn decode_attribute_rules() {
        assert_eq!(
            decode_attribute(&json!(null), AttributeType::Integer),
            Some(AttributeValue::Null)
        );
        assert_eq!(decode_attribute(&json!(1.5), AttributeType::Integer), None);
        assert_eq!(
            decode_attribute(&json!(7), AttributeType::Double),
            Some(AttributeValue::Double(7.0))
        );
        assert_eq!(decode_attribute(&json!("true"), AttributeType::Boolean), None);
        assert_eq!(decode_attribute(&json!("%%"), AttributeType::Binary), None);
        assert_eq!(encode_attribute(&AttributeValue::Double(f64::NAN)), None);
    }
}
