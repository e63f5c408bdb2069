//! Table schema resolution.
//!
//! The semantic analyzer and planner consume table schemas through the
//! `SchemaProvider` trait. The default implementation caches DescribeTable
//! results with a TTL and coalesces concurrent lookups for the same table
//! into a single upstream call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::client::{
    DescribeTableInput, DynamoClient, DynamoError, DynamoErrorKind, KeyType, Projection,
    SecondaryIndex, TableDescription,
};
use crate::error::Result;
use crate::types::{
    IndexKind, IndexProjection, IndexSchema, KeyAttribute, KeySchema, ScalarType, TableSchema,
    Throughput,
};

/// Source of table schemas.
///
/// `describe` returns `None` for a missing table. `invalidate` must take
/// effect immediately; the engine calls it after every DDL statement it
/// emits.
pub trait SchemaProvider: Send + Sync {
    fn describe(&self, table: &str) -> Result<Option<TableSchema>>;
    fn invalidate(&self, table: &str);
    fn list(&self) -> Result<Vec<String>>;
}

enum CacheSlot {
    /// A fetch is in progress on another caller.
    InFlight,
    /// A cached result (including a cached miss) with its fetch time.
    Ready {
        schema: Option<TableSchema>,
        fetched_at: Instant,
    },
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, CacheSlot>,
    /// Bumped by `invalidate`; a fetch only installs its result if the
    /// generation is unchanged, so a pre-DDL response cannot repopulate the
    /// cache after the DDL invalidated it.
    generations: HashMap<String, u64>,
}

/// TTL cache over DescribeTable with per-table single-flight.
pub struct CachingSchemaProvider {
    client: Arc<dyn DynamoClient>,
    ttl: Duration,
    state: Mutex<CacheState>,
    ready: Condvar,
}

impl CachingSchemaProvider {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new(client: Arc<dyn DynamoClient>) -> Self {
        Self::with_ttl(client, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(client: Arc<dyn DynamoClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            state: Mutex::new(CacheState::default()),
            ready: Condvar::new(),
        }
    }

    fn fetch(&self, table: &str) -> std::result::Result<Option<TableSchema>, DynamoError> {
        match self.client.describe_table(DescribeTableInput {
            table_name: table.to_string(),
        }) {
            Ok(description) => Ok(Some(table_schema_from_description(&description)?)),
            Err(e) if e.kind == DynamoErrorKind::ResourceNotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl SchemaProvider for CachingSchemaProvider {
    fn describe(&self, table: &str) -> Result<Option<TableSchema>> {
        let mut state = self.state.lock();
        loop {
            match state.slots.get(table) {
                Some(CacheSlot::Ready { schema, fetched_at })
                    if fetched_at.elapsed() < self.ttl =>
                {
                    return Ok(schema.clone());
                }
                Some(CacheSlot::InFlight) => {
                    // Another caller is fetching this table; wait for it.
                    self.ready.wait(&mut state);
                }
                _ => {
                    state.slots.insert(table.to_string(), CacheSlot::InFlight);
                    break;
                }
            }
        }
        let generation = state.generations.get(table).copied().unwrap_or(0);
        drop(state);

        let fetched = self.fetch(table);

        let mut state = self.state.lock();
        let unchanged = state.generations.get(table).copied().unwrap_or(0) == generation;
        let result = match fetched {
            Ok(schema) => {
                if unchanged {
                    state.slots.insert(
                        table.to_string(),
                        CacheSlot::Ready {
                            schema: schema.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                } else {
                    state.slots.remove(table);
                }
                Ok(schema)
            }
            Err(e) => {
                state.slots.remove(table);
                Err(e.into())
            }
        };
        self.ready.notify_all();
        result
    }

    fn invalidate(&self, table: &str) {
        let mut state = self.state.lock();
        *state.generations.entry(table.to_string()).or_insert(0) += 1;
        if matches!(state.slots.get(table), Some(CacheSlot::Ready { .. })) {
            state.slots.remove(table);
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.client.list_tables()?)
    }
}

/// Build the planner-facing schema from a DescribeTable response.
pub fn table_schema_from_description(
    description: &TableDescription,
) -> std::result::Result<TableSchema, DynamoError> {
    let attributes: std::collections::BTreeMap<String, ScalarType> = description
        .attribute_definitions
        .iter()
        .map(|def| (def.attribute_name.clone(), def.attribute_type))
        .collect();

    let keys = key_schema_from_elements(&description.key_schema, &attributes, "table")?;

    let mut local_indexes = Vec::new();
    for index in &description.local_secondary_indexes {
        local_indexes.push(index_schema(index, IndexKind::Local, &attributes)?);
    }
    let mut global_indexes = Vec::new();
    for index in &description.global_secondary_indexes {
        global_indexes.push(index_schema(index, IndexKind::Global, &attributes)?);
    }

    let throughput = match (description.billing_mode, description.provisioned_throughput) {
        (crate::client::BillingMode::PayPerRequest, _) => Throughput::PayPerRequest,
        (crate::client::BillingMode::Provisioned, Some(tp)) => Throughput::Provisioned {
            read: tp.read_capacity_units,
            write: tp.write_capacity_units,
        },
        (crate::client::BillingMode::Provisioned, None) => {
            return Err(DynamoError::new(
                DynamoErrorKind::Other,
                "provisioned table is missing throughput in DescribeTable response",
            ));
        }
    };

    Ok(TableSchema {
        name: description.table_name.clone(),
        keys,
        attributes,
        local_indexes,
        global_indexes,
        throughput,
        item_count: description.item_count,
        stream: description.stream_view_type.clone(),
    })
}

fn index_schema(
    index: &SecondaryIndex,
    kind: IndexKind,
    attributes: &std::collections::BTreeMap<String, ScalarType>,
) -> std::result::Result<IndexSchema, DynamoError> {
    let keys = key_schema_from_elements(&index.key_schema, attributes, &index.index_name)?;
    let projection = match &index.projection {
        Projection::All => IndexProjection::All,
        Projection::KeysOnly => IndexProjection::KeysOnly,
        Projection::Include(attrs) => IndexProjection::Include(attrs.clone()),
    };
    let throughput = index.provisioned_throughput.map(|tp| Throughput::Provisioned {
        read: tp.read_capacity_units,
        write: tp.write_capacity_units,
    });
    Ok(IndexSchema {
        name: index.index_name.clone(),
        kind,
        keys,
        projection,
        throughput,
    })
}

fn key_schema_from_elements(
    elements: &[crate::client::KeySchemaElement],
    attributes: &std::collections::BTreeMap<String, ScalarType>,
    what: &str,
) -> std::result::Result<KeySchema, DynamoError> {
    let mut hash = None;
    let mut range = None;
    for element in elements {
        let ty = attributes
            .get(&element.attribute_name)
            .copied()
            .ok_or_else(|| {
                DynamoError::new(
                    DynamoErrorKind::Other,
                    format!(
                        "key attribute {} of {} has no attribute definition",
                        element.attribute_name, what
                    ),
                )
            })?;
        let attr = KeyAttribute::new(element.attribute_name.clone(), ty);
        match element.key_type {
            KeyType::Hash => hash = Some(attr),
            KeyType::Range => range = Some(attr),
        }
    }
    let hash = hash.ok_or_else(|| {
        DynamoError::new(
            DynamoErrorKind::Other,
            format!("{} has no HASH key in its key schema", what),
        )
    })?;
    Ok(KeySchema { hash, range })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client stub that only answers DescribeTable, counting calls.
    struct CountingClient {
        calls: AtomicUsize,
        delay: Duration,
        missing: bool,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                missing: false,
            }
        }

        fn description(name: &str) -> TableDescription {
            TableDescription {
                table_name: name.to_string(),
                table_status: "ACTIVE".to_string(),
                key_schema: vec![KeySchemaElement {
                    attribute_name: "id".to_string(),
                    key_type: KeyType::Hash,
                }],
                attribute_definitions: vec![AttributeDefinition {
                    attribute_name: "id".to_string(),
                    attribute_type: ScalarType::S,
                }],
                billing_mode: BillingMode::PayPerRequest,
                provisioned_throughput: None,
                global_secondary_indexes: vec![],
                local_secondary_indexes: vec![],
                item_count: Some(0),
                stream_view_type: None,
            }
        }
    }

    impl DynamoClient for CountingClient {
        fn describe_table(
            &self,
            input: DescribeTableInput,
        ) -> std::result::Result<TableDescription, DynamoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.missing {
                return Err(DynamoError::not_found("no such table"));
            }
            Ok(Self::description(&input.table_name))
        }

        fn list_tables(&self) -> std::result::Result<Vec<String>, DynamoError> {
            Ok(vec!["t".to_string()])
        }

        fn get_item(&self, _: GetItemInput) -> std::result::Result<GetItemOutput, DynamoError> {
            unimplemented!()
        }
        fn batch_get_item(
            &self,
            _: BatchGetItemInput,
        ) -> std::result::Result<BatchGetItemOutput, DynamoError> {
            unimplemented!()
        }
        fn query(&self, _: QueryInput) -> std::result::Result<QueryOutput, DynamoError> {
            unimplemented!()
        }
        fn scan(&self, _: ScanInput) -> std::result::Result<ScanOutput, DynamoError> {
            unimplemented!()
        }
        fn put_item(&self, _: PutItemInput) -> std::result::Result<WriteOutput, DynamoError> {
            unimplemented!()
        }
        fn update_item(&self, _: UpdateItemInput) -> std::result::Result<WriteOutput, DynamoError> {
            unimplemented!()
        }
        fn delete_item(&self, _: DeleteItemInput) -> std::result::Result<WriteOutput, DynamoError> {
            unimplemented!()
        }
        fn batch_write_item(
            &self,
            _: BatchWriteItemInput,
        ) -> std::result::Result<BatchWriteItemOutput, DynamoError> {
            unimplemented!()
        }
        fn create_table(&self, _: CreateTableInput) -> std::result::Result<TableDescription, DynamoError> {
            unimplemented!()
        }
        fn update_table(&self, _: UpdateTableInput) -> std::result::Result<TableDescription, DynamoError> {
            unimplemented!()
        }
        fn delete_table(&self, _: DeleteTableInput) -> std::result::Result<TableDescription, DynamoError> {
            unimplemented!()
        }
    }

    #[test]
    fn test_describe_caches() {
        let client = Arc::new(CountingClient::new());
        let provider = CachingSchemaProvider::new(client.clone());

        let first = provider.describe("t").unwrap().unwrap();
        assert_eq!(first.name, "t");
        assert_eq!(first.keys.hash.name, "id");

        let _ = provider.describe("t").unwrap().unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_forces_refetch() {
        let client = Arc::new(CountingClient::new());
        let provider = CachingSchemaProvider::new(client.clone());

        provider.describe("t").unwrap();
        provider.invalidate("t");
        provider.describe("t").unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let client = Arc::new(CountingClient::new());
        let provider = CachingSchemaProvider::with_ttl(client.clone(), Duration::ZERO);

        provider.describe("t").unwrap();
        provider.describe("t").unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_table_is_cached_none() {
        let mut stub = CountingClient::new();
        stub.missing = true;
        let client = Arc::new(stub);
        let provider = CachingSchemaProvider::new(client.clone());

        assert!(provider.describe("nope").unwrap().is_none());
        assert!(provider.describe("nope").unwrap().is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_describes_coalesce() {
        let mut stub = CountingClient::new();
        stub.delay = Duration::from_millis(50);
        let client = Arc::new(stub);
        let provider = Arc::new(CachingSchemaProvider::new(client.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let provider = provider.clone();
            handles.push(std::thread::spawn(move || {
                provider.describe("t").unwrap().unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap().name, "t");
        }
        // At most one upstream call in flight per key
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_conversion_with_indexes() {
        let description = TableDescription {
            table_name: "t".to_string(),
            table_status: "ACTIVE".to_string(),
            key_schema: vec![
                KeySchemaElement {
                    attribute_name: "id".to_string(),
                    key_type: KeyType::Hash,
                },
                KeySchemaElement {
                    attribute_name: "ts".to_string(),
                    key_type: KeyType::Range,
                },
            ],
            attribute_definitions: vec![
                AttributeDefinition {
                    attribute_name: "id".to_string(),
                    attribute_type: ScalarType::S,
                },
                AttributeDefinition {
                    attribute_name: "ts".to_string(),
                    attribute_type: ScalarType::N,
                },
                AttributeDefinition {
                    attribute_name: "user".to_string(),
                    attribute_type: ScalarType::S,
                },
            ],
            billing_mode: BillingMode::Provisioned,
            provisioned_throughput: Some(ProvisionedThroughput {
                read_capacity_units: 5,
                write_capacity_units: 5,
            }),
            global_secondary_indexes: vec![SecondaryIndex {
                index_name: "by_user".to_string(),
                key_schema: vec![KeySchemaElement {
                    attribute_name: "user".to_string(),
                    key_type: KeyType::Hash,
                }],
                projection: Projection::All,
                provisioned_throughput: None,
            }],
            local_secondary_indexes: vec![],
            item_count: Some(42),
            stream_view_type: None,
        };

        let schema = table_schema_from_description(&description).unwrap();
        assert_eq!(schema.keys.hash.ty, ScalarType::S);
        assert_eq!(schema.keys.range.as_ref().unwrap().name, "ts");
        assert_eq!(schema.global_indexes.len(), 1);
        assert_eq!(schema.global_indexes[0].keys.hash.name, "user");
        assert_eq!(
            schema.throughput,
            Throughput::Provisioned { read: 5, write: 5 }
        );
    }
}
