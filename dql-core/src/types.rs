use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// DynamoDB-style typed value.
///
/// Numbers are kept as their source text to preserve arbitrary precision;
/// binary payloads are base64-encoded when serialized. The serialized form is
/// the wire representation: a single-key map such as `{"S": "hello"}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String
    S(String),
    /// Number (stored as string for precision)
    N(String),
    /// Binary
    B(Bytes),
    /// Boolean
    Bool(bool),
    /// Null
    Null,
    /// List
    L(Vec<Value>),
    /// Map
    M(HashMap<String, Value>),
    /// String set
    Ss(Vec<String>),
    /// Number set
    Ns(Vec<String>),
    /// Binary set
    Bs(Vec<Bytes>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::S(s.into())
    }

    pub fn number(n: impl ToString) -> Self {
        Value::N(n.to_string())
    }

    pub fn binary(b: impl Into<Bytes>) -> Self {
        Value::B(b.into())
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&str> {
        match self {
            Value::N(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::M(m) => Some(m),
            _ => None,
        }
    }

    /// Wire type tag (S, N, B, BOOL, NULL, L, M, SS, NS, BS).
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::S(_) => "S",
            Value::N(_) => "N",
            Value::B(_) => "B",
            Value::Bool(_) => "BOOL",
            Value::Null => "NULL",
            Value::L(_) => "L",
            Value::M(_) => "M",
            Value::Ss(_) => "SS",
            Value::Ns(_) => "NS",
            Value::Bs(_) => "BS",
        }
    }

    /// The key-eligible scalar type of this value, if it has one.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::S(_) => Some(ScalarType::S),
            Value::N(_) => Some(ScalarType::N),
            Value::B(_) => Some(ScalarType::B),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::S(s) => write!(f, "'{}'", s),
            Value::N(n) => write!(f, "{}", n),
            Value::B(b) => write!(f, "b\"{}\"", BASE64.encode(b)),
            Value::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Null => write!(f, "NULL"),
            Value::L(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::M(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", key, map[*key])?;
                }
                write!(f, "}}")
            }
            Value::Ss(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}'", item)?;
                }
                write!(f, ")")
            }
            Value::Ns(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Bs(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "b\"{}\"", BASE64.encode(item))?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Value::S(s) => map.serialize_entry("S", s)?,
            Value::N(n) => map.serialize_entry("N", n)?,
            Value::B(b) => map.serialize_entry("B", &BASE64.encode(b))?,
            Value::Bool(b) => map.serialize_entry("BOOL", b)?,
            Value::Null => map.serialize_entry("NULL", &true)?,
            Value::L(items) => map.serialize_entry("L", items)?,
            Value::M(m) => {
                // Sorted for deterministic output
                let ordered: BTreeMap<&String, &Value> = m.iter().collect();
                map.serialize_entry("M", &ordered)?;
            }
            Value::Ss(items) => map.serialize_entry("SS", items)?,
            Value::Ns(items) => map.serialize_entry("NS", items)?,
            Value::Bs(items) => {
                struct B64Seq<'a>(&'a [Bytes]);
                impl Serialize for B64Seq<'_> {
                    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                        let mut seq = s.serialize_seq(Some(self.0.len()))?;
                        for b in self.0 {
                            seq.serialize_element(&BASE64.encode(b))?;
                        }
                        seq.end()
                    }
                }
                map.serialize_entry("BS", &B64Seq(items))?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-key attribute value map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
                let tag: String = access
                    .next_key()?
                    .ok_or_else(|| de::Error::custom("empty attribute value"))?;
                let value = match tag.as_str() {
                    "S" => Value::S(access.next_value()?),
                    "N" => Value::N(access.next_value()?),
                    "B" => {
                        let encoded: String = access.next_value()?;
                        let bytes = BASE64
                            .decode(encoded.as_bytes())
                            .map_err(|e| de::Error::custom(format!("invalid base64: {}", e)))?;
                        Value::B(Bytes::from(bytes))
                    }
                    "BOOL" => Value::Bool(access.next_value()?),
                    "NULL" => {
                        let _: bool = access.next_value()?;
                        Value::Null
                    }
                    "L" => Value::L(access.next_value()?),
                    "M" => Value::M(access.next_value()?),
                    "SS" => Value::Ss(access.next_value()?),
                    "NS" => Value::Ns(access.next_value()?),
                    "BS" => {
                        let encoded: Vec<String> = access.next_value()?;
                        let mut items = Vec::with_capacity(encoded.len());
                        for e in encoded {
                            let bytes = BASE64
                                .decode(e.as_bytes())
                                .map_err(|e| de::Error::custom(format!("invalid base64: {}", e)))?;
                            items.push(Bytes::from(bytes));
                        }
                        Value::Bs(items)
                    }
                    other => {
                        return Err(de::Error::custom(format!(
                            "unknown attribute value tag: {}",
                            other
                        )))
                    }
                };
                if access.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom("attribute value must have one key"));
                }
                Ok(value)
            }
        }

        deserializer.deserialize_map(ValueVisitor)
    }
}

/// Item - a map of attribute names to values.
pub type Item = HashMap<String, Value>;

/// Compare two number strings numerically.
///
/// Parses as f64; DynamoDB numbers outside f64 range are compared by their
/// decimal text length as a fallback.
pub fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y),
        _ => None,
    }
}

/// Compare two values of the same scalar type.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::N(x), Value::N(y)) => compare_numbers(x, y),
        (Value::S(x), Value::S(y)) => Some(x.cmp(y)),
        (Value::B(x), Value::B(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Key-eligible scalar attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    S,
    N,
    B,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::S => "S",
            ScalarType::N => "N",
            ScalarType::B => "B",
        }
    }

    /// DQL spelling, as used in CREATE TABLE.
    pub fn dql_name(&self) -> &'static str {
        match self {
            ScalarType::S => "STRING",
            ScalarType::N => "NUMBER",
            ScalarType::B => "BINARY",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute types accepted by CREATE TABLE declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Scalar(ScalarType),
    StringSet,
    NumberSet,
    BinarySet,
    Bool,
    Null,
    List,
    Map,
}

impl AttrType {
    pub fn dql_name(&self) -> &'static str {
        match self {
            AttrType::Scalar(s) => s.dql_name(),
            AttrType::StringSet => "STRING SET",
            AttrType::NumberSet => "NUMBER SET",
            AttrType::BinarySet => "BINARY SET",
            AttrType::Bool => "BOOL",
            AttrType::Null => "NULL",
            AttrType::List => "LIST",
            AttrType::Map => "MAP",
        }
    }

    /// The scalar type, if this type may key a table or index.
    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            AttrType::Scalar(s) => Some(*s),
            _ => None,
        }
    }
}

/// A key attribute: name plus declared scalar type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttribute {
    pub name: String,
    pub ty: ScalarType,
}

impl KeyAttribute {
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Table or index key schema: hash key plus optional range key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub hash: KeyAttribute,
    pub range: Option<KeyAttribute>,
}

impl KeySchema {
    pub fn hash_only(hash: KeyAttribute) -> Self {
        Self { hash, range: None }
    }

    pub fn with_range(hash: KeyAttribute, range: KeyAttribute) -> Self {
        Self {
            hash,
            range: Some(range),
        }
    }

    /// Key attribute names in (hash, range) order.
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.hash.name.as_str()];
        if let Some(range) = &self.range {
            names.push(range.name.as_str());
        }
        names
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.hash.name == attr || self.range.as_ref().is_some_and(|r| r.name == attr)
    }
}

/// Provisioned read/write capacity, or on-demand billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Throughput {
    Provisioned { read: u64, write: u64 },
    PayPerRequest,
}

impl Throughput {
    pub fn provisioned(read: u64, write: u64) -> Self {
        Throughput::Provisioned { read, write }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throughput::Provisioned { read, write } => {
                write!(f, "THROUGHPUT ({}, {})", read, write)
            }
            Throughput::PayPerRequest => write!(f, "THROUGHPUT PAY_PER_REQUEST"),
        }
    }
}

/// Secondary index attribute projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexProjection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// Local or global secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Local,
    Global,
}

/// A secondary index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub kind: IndexKind,
    pub keys: KeySchema,
    pub projection: IndexProjection,
    pub throughput: Option<Throughput>,
}

impl IndexSchema {
    /// True if a strongly consistent read may target this index.
    pub fn supports_consistent_read(&self) -> bool {
        self.kind == IndexKind::Local
    }
}

/// Schema of a DynamoDB table, as surfaced by DescribeTable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub keys: KeySchema,
    /// Declared attribute types (key and index key attributes).
    pub attributes: BTreeMap<String, ScalarType>,
    pub local_indexes: Vec<IndexSchema>,
    pub global_indexes: Vec<IndexSchema>,
    pub throughput: Throughput,
    pub item_count: Option<u64>,
    pub stream: Option<String>,
}

impl TableSchema {
    /// Look up a secondary index by name.
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.local_indexes
            .iter()
            .chain(self.global_indexes.iter())
            .find(|idx| idx.name == name)
    }

    /// Secondary indexes in planner preference order: LSIs first, then GSIs,
    /// each group sorted by name.
    pub fn indexes_in_preference_order(&self) -> Vec<&IndexSchema> {
        let mut local: Vec<&IndexSchema> = self.local_indexes.iter().collect();
        local.sort_by(|a, b| a.name.cmp(&b.name));
        let mut global: Vec<&IndexSchema> = self.global_indexes.iter().collect();
        global.sort_by(|a, b| a.name.cmp(&b.name));
        local.into_iter().chain(global).collect()
    }

    /// Declared type for an attribute, when known.
    pub fn attribute_type(&self, name: &str) -> Option<ScalarType> {
        self.attributes.get(name).copied()
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.keys.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_constructors() {
        let s = Value::string("hello");
        assert_eq!(s.as_string(), Some("hello"));
        assert_eq!(s.type_tag(), "S");

        let n = Value::number(42);
        assert_eq!(n.as_number(), Some("42"));
        assert_eq!(n.scalar_type(), Some(ScalarType::N));

        let b = Value::binary(vec![1u8, 2, 3]);
        assert_eq!(b.type_tag(), "B");
    }

    #[test]
    fn test_value_wire_serialization() {
        let json = serde_json::to_string(&Value::string("hi")).unwrap();
        assert_eq!(json, r#"{"S":"hi"}"#);

        let json = serde_json::to_string(&Value::number("1.5")).unwrap();
        assert_eq!(json, r#"{"N":"1.5"}"#);

        let json = serde_json::to_string(&Value::Null).unwrap();
        assert_eq!(json, r#"{"NULL":true}"#);

        let json = serde_json::to_string(&Value::Ns(vec!["1".into(), "2".into()])).unwrap();
        assert_eq!(json, r#"{"NS":["1","2"]}"#);
    }

    #[test]
    fn test_value_wire_round_trip() {
        let values = vec![
            Value::string("a"),
            Value::number("3.14159265358979323846"),
            Value::binary(vec![0u8, 255]),
            Value::Bool(true),
            Value::Null,
            Value::L(vec![Value::number(1), Value::Null]),
            Value::M(HashMap::from([("k".to_string(), Value::string("v"))])),
            Value::Ss(vec!["a".into(), "b".into()]),
            Value::Bs(vec![Bytes::from_static(b"abc")]),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_number_precision_preserved() {
        let n = Value::N("3.9999999999999999999999999".to_string());
        let json = serde_json::to_string(&n).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_number(), Some("3.9999999999999999999999999"));
    }

    #[test]
    fn test_compare_numbers() {
        assert_eq!(compare_numbers("2", "10"), Some(Ordering::Less));
        assert_eq!(compare_numbers("2.5", "2.5"), Some(Ordering::Equal));
        assert_eq!(compare_numbers("-1", "-2"), Some(Ordering::Greater));
        assert_eq!(compare_numbers("abc", "1"), None);
    }

    #[test]
    fn test_compare_values_mixed_types() {
        assert_eq!(
            compare_values(&Value::string("a"), &Value::string("b")),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Value::string("a"), &Value::number(1)), None);
    }

    #[test]
    fn test_key_schema() {
        let keys = KeySchema::with_range(
            KeyAttribute::new("id", ScalarType::S),
            KeyAttribute::new("ts", ScalarType::N),
        );
        assert_eq!(keys.names(), vec!["id", "ts"]);
        assert!(keys.contains("id"));
        assert!(keys.contains("ts"));
        assert!(!keys.contains("user"));
    }

    #[test]
    fn test_index_preference_order() {
        let schema = TableSchema {
            name: "t".to_string(),
            keys: KeySchema::hash_only(KeyAttribute::new("id", ScalarType::S)),
            attributes: BTreeMap::new(),
            local_indexes: vec![IndexSchema {
                name: "z_local".to_string(),
                kind: IndexKind::Local,
                keys: KeySchema::with_range(
                    KeyAttribute::new("id", ScalarType::S),
                    KeyAttribute::new("score", ScalarType::N),
                ),
                projection: IndexProjection::All,
                throughput: None,
            }],
            global_indexes: vec![
                IndexSchema {
                    name: "b_global".to_string(),
                    kind: IndexKind::Global,
                    keys: KeySchema::hash_only(KeyAttribute::new("user", ScalarType::S)),
                    projection: IndexProjection::All,
                    throughput: None,
                },
                IndexSchema {
                    name: "a_global".to_string(),
                    kind: IndexKind::Global,
                    keys: KeySchema::hash_only(KeyAttribute::new("email", ScalarType::S)),
                    projection: IndexProjection::KeysOnly,
                    throughput: None,
                },
            ],
            throughput: Throughput::PayPerRequest,
            item_count: None,
            stream: None,
        };

        let names: Vec<&str> = schema
            .indexes_in_preference_order()
            .iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(names, vec!["z_local", "a_global", "b_global"]);
        assert!(schema.index("a_global").is_some());
        assert!(schema.index("missing").is_none());
    }
}
