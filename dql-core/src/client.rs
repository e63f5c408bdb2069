//! Abstract DynamoDB client capability.
//!
//! The core depends only on this trait; transport concerns (signing, HTTP,
//! connection management) live with the implementation. Input and output
//! structs mirror the DynamoDB wire shapes. Expression placeholder maps are
//! ordered so that identical plans produce identical requests.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Item, ScalarType, Value};

/// A wire-format primary key: attribute name to key value.
pub type Key = BTreeMap<String, Value>;

/// Expression attribute name substitutions (`#n0` -> real name).
pub type NameMap = BTreeMap<String, String>;

/// Expression attribute value substitutions (`:v0` -> typed value).
pub type ValueMap = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classification of DynamoDB request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamoErrorKind {
    /// ProvisionedThroughputExceeded or request-rate throttling.
    Throttled,
    /// 5xx from the service.
    ServerError,
    /// 4xx request validation failure.
    ValidationError,
    /// ConditionalCheckFailedException on a write.
    ConditionalCheckFailed,
    /// Table or index does not exist.
    ResourceNotFound,
    Other,
}

/// Error surfaced by a `DynamoClient` implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamoError {
    pub kind: DynamoErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl DynamoError {
    pub fn new(kind: DynamoErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            DynamoErrorKind::Throttled | DynamoErrorKind::ServerError
        );
        Self {
            kind,
            retryable,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(DynamoErrorKind::Throttled, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(DynamoErrorKind::ServerError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(DynamoErrorKind::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DynamoErrorKind::ResourceNotFound, message)
    }

    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::new(DynamoErrorKind::ConditionalCheckFailed, message)
    }

    pub fn is_throttle(&self) -> bool {
        self.kind == DynamoErrorKind::Throttled
    }
}

impl fmt::Display for DynamoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for DynamoError {}

// ---------------------------------------------------------------------------
// Shared wire enums
// ---------------------------------------------------------------------------

/// HASH or RANGE role of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Hash,
    Range,
}

/// A single element of a key schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

/// Declared type of a key or index key attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: ScalarType,
}

/// Provisioned capacity settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedThroughput {
    pub read_capacity_units: u64,
    pub write_capacity_units: u64,
}

/// Billing mode of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingMode {
    Provisioned,
    PayPerRequest,
}

/// Attribute projection of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    All,
    KeysOnly,
    Include(Vec<String>),
}

/// Secondary index definition in a CreateTable or UpdateTable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryIndex {
    pub index_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub projection: Projection,
    pub provisioned_throughput: Option<ProvisionedThroughput>,
}

/// Which attributes a Query or Scan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Select {
    AllAttributes,
    AllProjectedAttributes,
    SpecificAttributes,
    Count,
}

/// Attributes to return after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReturnValue {
    #[default]
    None,
    AllOld,
    AllNew,
    UpdatedOld,
    UpdatedNew,
}

/// A put or delete request inside a BatchWriteItem call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteRequest {
    Put { item: Item },
    Delete { key: Key },
}

/// Per-table request block of a BatchGetItem call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeysAndAttributes {
    pub keys: Vec<Key>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub consistent_read: Option<bool>,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Key,
    pub consistent_read: Option<bool>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchGetItemInput {
    pub request_items: BTreeMap<String, KeysAndAttributes>,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryInput {
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub expression_attribute_values: ValueMap,
    pub scan_index_forward: Option<bool>,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Key>,
    pub select: Option<Select>,
    pub consistent_read: Option<bool>,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanInput {
    pub table_name: String,
    pub index_name: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub expression_attribute_values: ValueMap,
    pub limit: Option<u32>,
    pub exclusive_start_key: Option<Key>,
    pub segment: Option<u32>,
    pub total_segments: Option<u32>,
    pub select: Option<Select>,
    pub consistent_read: Option<bool>,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PutItemInput {
    pub table_name: String,
    pub item: Item,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub expression_attribute_values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateItemInput {
    pub table_name: String,
    pub key: Key,
    pub update_expression: Option<String>,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub expression_attribute_values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteItemInput {
    pub table_name: String,
    pub key: Key,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: NameMap,
    pub expression_attribute_values: ValueMap,
    pub return_values: ReturnValue,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchWriteItemInput {
    pub request_items: BTreeMap<String, Vec<WriteRequest>>,
    pub return_consumed_capacity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableInput {
    pub table_name: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub billing_mode: BillingMode,
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    pub global_secondary_indexes: Vec<SecondaryIndex>,
    pub local_secondary_indexes: Vec<SecondaryIndex>,
}

/// A single global secondary index change in an UpdateTable request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GlobalSecondaryIndexUpdate {
    Create(SecondaryIndex),
    SetThroughput {
        index_name: String,
        provisioned_throughput: ProvisionedThroughput,
    },
    Delete {
        index_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateTableInput {
    pub table_name: String,
    pub billing_mode: Option<BillingMode>,
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub global_secondary_index_updates: Vec<GlobalSecondaryIndexUpdate>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteTableInput {
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescribeTableInput {
    pub table_name: String,
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetItemOutput {
    pub item: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetItemOutput {
    pub responses: BTreeMap<String, Vec<Item>>,
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub count: u64,
    pub scanned_count: u64,
    pub last_evaluated_key: Option<Key>,
    pub consumed_capacity: Option<f64>,
}

pub type ScanOutput = QueryOutput;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteOutput {
    pub attributes: Option<Item>,
    pub consumed_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchWriteItemOutput {
    pub unprocessed_items: BTreeMap<String, Vec<WriteRequest>>,
    pub consumed_capacity: Option<f64>,
}

/// Table metadata returned by the table management operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub table_status: String,
    pub key_schema: Vec<KeySchemaElement>,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub billing_mode: BillingMode,
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    pub global_secondary_indexes: Vec<SecondaryIndex>,
    pub local_secondary_indexes: Vec<SecondaryIndex>,
    pub item_count: Option<u64>,
    pub stream_view_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Typed wrapper over the DynamoDB item and table APIs.
///
/// Implementations handle transport and signing; each call may block. The
/// executor owns retries, so implementations should surface throttling and
/// server errors as-is rather than retrying internally.
pub trait DynamoClient: Send + Sync {
    fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, DynamoError>;
    fn batch_get_item(&self, input: BatchGetItemInput) -> Result<BatchGetItemOutput, DynamoError>;
    fn query(&self, input: QueryInput) -> Result<QueryOutput, DynamoError>;
    fn scan(&self, input: ScanInput) -> Result<ScanOutput, DynamoError>;
    fn put_item(&self, input: PutItemInput) -> Result<WriteOutput, DynamoError>;
    fn update_item(&self, input: UpdateItemInput) -> Result<WriteOutput, DynamoError>;
    fn delete_item(&self, input: DeleteItemInput) -> Result<WriteOutput, DynamoError>;
    fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, DynamoError>;
    fn create_table(&self, input: CreateTableInput) -> Result<TableDescription, DynamoError>;
    fn update_table(&self, input: UpdateTableInput) -> Result<TableDescription, DynamoError>;
    fn delete_table(&self, input: DeleteTableInput) -> Result<TableDescription, DynamoError>;
    fn describe_table(&self, input: DescribeTableInput) -> Result<TableDescription, DynamoError>;
    fn list_tables(&self) -> Result<Vec<String>, DynamoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryability() {
        assert!(DynamoError::throttled("slow down").retryable);
        assert!(DynamoError::server_error("oops").retryable);
        assert!(!DynamoError::validation("bad expr").retryable);
        assert!(!DynamoError::conditional_check_failed("exists").retryable);
        assert!(!DynamoError::not_found("no table").retryable);
    }

    #[test]
    fn test_key_ordering_is_deterministic() {
        let mut key = Key::new();
        key.insert("ts".to_string(), Value::number(1));
        key.insert("id".to_string(), Value::string("a"));
        let json = serde_json::to_string(&key).unwrap();
        // BTreeMap serializes in sorted key order
        assert_eq!(json, r#"{"id":{"S":"a"},"ts":{"N":"1"}}"#);
    }

    #[test]
    fn test_query_input_round_trip() {
        let input = QueryInput {
            table_name: "t".to_string(),
            key_condition_expression: Some("#n0 = :v0".to_string()),
            expression_attribute_names: NameMap::from([("#n0".to_string(), "id".to_string())]),
            expression_attribute_values: ValueMap::from([(
                ":v0".to_string(),
                Value::string("a"),
            )]),
            limit: Some(25),
            ..Default::default()
        };
        let json = serde_json::to_string(&input).unwrap();
        let back: QueryInput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, input);
    }
}
