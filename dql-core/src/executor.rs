//! Plan execution.
//!
//! Drives an `ExecutionPlan` against a `DynamoClient`, sequentially in plan
//! order. Query and Scan pages are pulled lazily and stop as soon as the
//! post-filter limit is met. Throttling and server errors are retried with
//! capped exponential backoff and never reach the caller unless retries are
//! exhausted. Batch operations chunk to the service limits (100 gets, 25
//! writes) and requeue unprocessed entries under the throttle schedule. The
//! cancel token is checked between pages and between batch sub-operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::client::*;
use crate::error::{Error, ExecutionError, Result};
use crate::plan::*;
use crate::retry::RetryPolicy;
use crate::types::Item;

/// Receives items as they stream out of paginated reads.
pub trait ResultSink {
    fn on_item(&mut self, _item: &Item) {}
}

/// Sink that discards streamed items (they are still collected in the
/// output).
pub struct NullSink;

impl ResultSink for NullSink {}

/// Accumulated result of running one plan.
#[derive(Debug, Default)]
pub struct PlanOutput {
    pub items: Vec<Item>,
    /// Server-side count aggregate for count(*) plans.
    pub count: u64,
    pub scanned_count: u64,
    /// Number of write operations applied.
    pub processed: usize,
    /// Attribute maps returned by writes with a RETURNS selector.
    pub returned: Vec<Item>,
    /// Summed consumed capacity, when the plan requested it.
    pub consumed_capacity: Option<f64>,
    pub table_descriptions: Vec<TableDescription>,
}

impl PlanOutput {
    fn add_capacity(&mut self, capacity: Option<f64>) {
        if let Some(units) = capacity {
            *self.consumed_capacity.get_or_insert(0.0) += units;
        }
    }
}

const BATCH_GET_LIMIT: usize = 100;
const BATCH_WRITE_LIMIT: usize = 25;

pub struct Executor<'a> {
    client: &'a dyn DynamoClient,
    cancel: CancelToken,
    throttle_policy: RetryPolicy,
    server_policy: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(client: &'a dyn DynamoClient) -> Self {
        Self {
            client,
            cancel: CancelToken::new(),
            throttle_policy: RetryPolicy::throttle(),
            server_policy: RetryPolicy::server_error(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_policies(mut self, throttle: RetryPolicy, server: RetryPolicy) -> Self {
        self.throttle_policy = throttle;
        self.server_policy = server;
        self
    }

    /// Run the plan to completion, streaming read items into `sink`.
    ///
    /// Operations run sequentially in plan order; the first non-retryable
    /// failure abandons the rest of the plan. A keys-only read immediately
    /// followed by a key-less mutation feeds its keys to that mutation
    /// instead of the output.
    pub fn execute(&self, plan: &ExecutionPlan, sink: &mut dyn ResultSink) -> Result<PlanOutput> {
        let mut output = PlanOutput::default();
        let mut pending_keys: Vec<Key> = Vec::new();

        for (i, op) in plan.ops.iter().enumerate() {
            self.cancel.check()?;
            let feeds_next = matches!(
                plan.ops.get(i + 1),
                Some(Operation::UpdateItem(UpdateItemOp { key: None, .. }))
                    | Some(Operation::DeleteItem(DeleteItemOp { key: None, .. }))
                    | Some(Operation::BatchWriteItem(BatchWriteItemOp {
                        keys_from_read: true,
                        ..
                    }))
            );

            match op {
                Operation::GetItem(op) => self.run_get(op, &mut output, sink)?,
                Operation::BatchGetItem(op) => self.run_batch_get(op, &mut output, sink)?,
                Operation::Query(op) => {
                    if feeds_next {
                        pending_keys = self.run_query_collecting_keys(op, &mut output)?;
                    } else {
                        self.run_query(op, &mut output, sink)?;
                    }
                }
                Operation::Scan(op) => {
                    if feeds_next {
                        pending_keys = self.run_scan_collecting_keys(op, &mut output)?;
                    } else {
                        self.run_scan(op, &mut output, sink)?;
                    }
                }
                Operation::PutItem(op) => self.run_put(op, &mut output)?,
                Operation::UpdateItem(op) => {
                    let keys = std::mem::take(&mut pending_keys);
                    self.run_update(op, keys, &mut output)?;
                }
                Operation::DeleteItem(op) => {
                    let keys = std::mem::take(&mut pending_keys);
                    self.run_delete(op, keys, &mut output)?;
                }
                Operation::BatchWriteItem(op) => {
                    let keys = std::mem::take(&mut pending_keys);
                    self.run_batch_write(op, keys, &mut output)?;
                }
                Operation::CreateTable(op) => {
                    let description =
                        self.call_with_retry(|| self.client.create_table(op.input.clone()))?;
                    output.table_descriptions.push(description);
                }
                Operation::UpdateTable(op) => {
                    let description =
                        self.call_with_retry(|| self.client.update_table(op.input.clone()))?;
                    output.table_descriptions.push(description);
                }
                Operation::DeleteTable(op) => {
                    let description = self.call_with_retry(|| {
                        self.client.delete_table(DeleteTableInput {
                            table_name: op.table.clone(),
                        })
                    })?;
                    output.table_descriptions.push(description);
                }
                Operation::DescribeTable(op) => {
                    let description = self.call_with_retry(|| {
                        self.client.describe_table(DescribeTableInput {
                            table_name: op.table.clone(),
                        })
                    })?;
                    output.table_descriptions.push(description);
                }
            }
        }

        Ok(output)
    }

    // -- retry loop --------------------------------------------------------

    fn call_with_retry<T>(
        &self,
        mut call: impl FnMut() -> std::result::Result<T, DynamoError>,
    ) -> Result<T> {
        let mut throttle_attempts = 0u32;
        let mut server_attempts = 0u32;
        loop {
            self.cancel.check()?;
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind == DynamoErrorKind::Throttled => {
                    if throttle_attempts >= self.throttle_policy.max_attempts {
                        return Err(Error::Execution(ExecutionError::new(e)));
                    }
                    let backoff = self.throttle_policy.backoff_duration(throttle_attempts);
                    warn!(attempt = throttle_attempts + 1, ?backoff, "throttled, backing off");
                    std::thread::sleep(backoff);
                    throttle_attempts += 1;
                }
                Err(e) if e.kind == DynamoErrorKind::ServerError => {
                    if server_attempts >= self.server_policy.max_attempts {
                        return Err(Error::Execution(ExecutionError::new(e)));
                    }
                    let backoff = self.server_policy.backoff_duration(server_attempts);
                    warn!(attempt = server_attempts + 1, ?backoff, "server error, backing off");
                    std::thread::sleep(backoff);
                    server_attempts += 1;
                }
                Err(e) => return Err(Error::Execution(ExecutionError::new(e))),
            }
        }
    }

    // -- reads -------------------------------------------------------------

    fn run_get(
        &self,
        op: &GetItemOp,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let response = self.call_with_retry(|| {
            self.client.get_item(GetItemInput {
                table_name: op.table.clone(),
                key: op.key.clone(),
                consistent_read: Some(op.consistent).filter(|&c| c),
                projection_expression: op.projection_expression.clone(),
                expression_attribute_names: op.names.clone(),
                return_consumed_capacity: op.return_consumed_capacity,
            })
        })?;
        output.add_capacity(response.consumed_capacity);
        if let Some(item) = response.item {
            sink.on_item(&item);
            output.items.push(item);
            output.scanned_count += 1;
        }
        output.count = output.items.len() as u64;
        Ok(())
    }

    fn run_batch_get(
        &self,
        op: &BatchGetItemOp,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let mut queue: Vec<Key> = op.keys.clone();
        let mut requeue_attempts = 0u32;

        while !queue.is_empty() {
            self.cancel.check()?;
            let chunk: Vec<Key> = queue
                .drain(..queue.len().min(BATCH_GET_LIMIT))
                .collect();
            let request = KeysAndAttributes {
                keys: chunk,
                projection_expression: op.projection_expression.clone(),
                expression_attribute_names: op.names.clone(),
                consistent_read: Some(op.consistent).filter(|&c| c),
            };
            let mut request_items = BTreeMap::new();
            request_items.insert(op.table.clone(), request);

            let response = self.call_with_retry(|| {
                self.client.batch_get_item(BatchGetItemInput {
                    request_items: request_items.clone(),
                    return_consumed_capacity: op.return_consumed_capacity,
                })
            })?;
            output.add_capacity(response.consumed_capacity);

            for item in response.responses.into_values().flatten() {
                sink.on_item(&item);
                output.items.push(item);
                output.scanned_count += 1;
            }

            let unprocessed: Vec<Key> = response
                .unprocessed_keys
                .into_values()
                .flat_map(|ka| ka.keys)
                .collect();
            if !unprocessed.is_empty() {
                if requeue_attempts >= self.throttle_policy.max_attempts {
                    return Err(Error::Execution(ExecutionError::new(DynamoError::throttled(
                        "batch get returned unprocessed keys after all retries",
                    ))));
                }
                let backoff = self.throttle_policy.backoff_duration(requeue_attempts);
                warn!(count = unprocessed.len(), ?backoff, "requeueing unprocessed keys");
                std::thread::sleep(backoff);
                requeue_attempts += 1;
                queue.splice(0..0, unprocessed);
            }
        }

        output.count = output.items.len() as u64;
        Ok(())
    }

    fn query_input(&self, op: &QueryOp, start_key: Option<Key>, remaining: Option<u64>) -> QueryInput {
        // A page-size limit is only safe when no filter runs server-side
        let wire_limit = if op.filter_expression.is_none() && !op.select_count {
            remaining.map(|n| n.min(u32::MAX as u64) as u32)
        } else {
            None
        };
        QueryInput {
            table_name: op.table.clone(),
            index_name: op.index_name.clone(),
            key_condition_expression: Some(op.key_condition_expression.clone()),
            filter_expression: op.filter_expression.clone(),
            projection_expression: op.projection_expression.clone(),
            expression_attribute_names: op.names.clone(),
            expression_attribute_values: op.values.clone(),
            scan_index_forward: Some(op.scan_index_forward),
            limit: wire_limit,
            exclusive_start_key: start_key,
            select: if op.select_count {
                Some(Select::Count)
            } else if op.projection_expression.is_some() {
                Some(Select::SpecificAttributes)
            } else {
                None
            },
            consistent_read: Some(op.consistent).filter(|&c| c),
            return_consumed_capacity: op.return_consumed_capacity,
        }
    }

    fn run_query(
        &self,
        op: &QueryOp,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        if op.limit == Some(0) {
            return Ok(());
        }
        let mut remaining = op.limit;
        let mut start_key: Option<Key> = None;

        loop {
            self.cancel.check()?;
            let input = self.query_input(op, start_key.take(), remaining);
            let response = self.call_with_retry(|| self.client.query(input.clone()))?;
            output.add_capacity(response.consumed_capacity);
            output.scanned_count += response.scanned_count;

            if op.select_count {
                output.count += response.count;
            } else {
                for item in response.items {
                    if remaining == Some(0) {
                        break;
                    }
                    sink.on_item(&item);
                    output.items.push(item);
                    if let Some(n) = remaining.as_mut() {
                        *n -= 1;
                    }
                }
            }

            // Stop without another call once the limit is met, even if more
            // pages remain
            if remaining == Some(0) {
                break;
            }
            match response.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        if !op.select_count {
            output.count = output.items.len() as u64;
        }
        Ok(())
    }

    fn run_query_collecting_keys(&self, op: &QueryOp, output: &mut PlanOutput) -> Result<Vec<Key>> {
        let mut collector = KeyCollector::default();
        let saved_items = std::mem::take(&mut output.items);
        self.run_query(op, output, &mut collector)?;
        output.items = saved_items;
        Ok(collector.keys)
    }

    fn run_scan_collecting_keys(&self, op: &ScanOp, output: &mut PlanOutput) -> Result<Vec<Key>> {
        let mut collector = KeyCollector::default();
        let saved_items = std::mem::take(&mut output.items);
        self.run_scan(op, output, &mut collector)?;
        output.items = saved_items;
        Ok(collector.keys)
    }

    fn scan_input(
        &self,
        op: &ScanOp,
        start_key: Option<Key>,
        remaining: Option<u64>,
        segment: Option<(u32, u32)>,
    ) -> ScanInput {
        let wire_limit = if op.filter_expression.is_none() && !op.select_count {
            remaining.map(|n| n.min(u32::MAX as u64) as u32)
        } else {
            None
        };
        ScanInput {
            table_name: op.table.clone(),
            index_name: op.index_name.clone(),
            filter_expression: op.filter_expression.clone(),
            projection_expression: op.projection_expression.clone(),
            expression_attribute_names: op.names.clone(),
            expression_attribute_values: op.values.clone(),
            limit: wire_limit,
            exclusive_start_key: start_key,
            segment: segment.map(|(i, _)| i),
            total_segments: segment.map(|(_, n)| n),
            select: if op.select_count {
                Some(Select::Count)
            } else if op.projection_expression.is_some() {
                Some(Select::SpecificAttributes)
            } else {
                None
            },
            consistent_read: Some(op.consistent).filter(|&c| c),
            return_consumed_capacity: op.return_consumed_capacity,
        }
    }

    fn run_scan(
        &self,
        op: &ScanOp,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        if op.limit == Some(0) {
            return Ok(());
        }
        match op.segments {
            Some(segments) if segments > 1 => self.run_parallel_scan(op, segments, output, sink),
            _ => self.run_scan_segment(op, None, output, sink),
        }
    }

    fn run_scan_segment(
        &self,
        op: &ScanOp,
        segment: Option<(u32, u32)>,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        let mut remaining = op.limit;
        let mut start_key: Option<Key> = None;

        loop {
            self.cancel.check()?;
            let input = self.scan_input(op, start_key.take(), remaining, segment);
            let response = self.call_with_retry(|| self.client.scan(input.clone()))?;
            output.add_capacity(response.consumed_capacity);
            output.scanned_count += response.scanned_count;

            if op.select_count {
                output.count += response.count;
            } else {
                for item in response.items {
                    if remaining == Some(0) {
                        break;
                    }
                    sink.on_item(&item);
                    output.items.push(item);
                    if let Some(n) = remaining.as_mut() {
                        *n -= 1;
                    }
                }
            }

            if remaining == Some(0) {
                break;
            }
            match response.last_evaluated_key {
                Some(key) => start_key = Some(key),
                None => break,
            }
        }

        if !op.select_count {
            output.count = output.items.len() as u64;
        }
        Ok(())
    }

    /// Issue `segments` parallel scan segments on worker threads and merge
    /// pages in arrival order. No cross-segment ordering is guaranteed.
    fn run_parallel_scan(
        &self,
        op: &ScanOp,
        segments: u32,
        output: &mut PlanOutput,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        struct Page {
            items: Vec<Item>,
            count: u64,
            scanned: u64,
            consumed: Option<f64>,
        }

        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<Result<Page>>();
        let mut first_error: Option<Error> = None;
        let mut remaining = op.limit;

        std::thread::scope(|scope| {
            for segment in 0..segments {
                let tx = tx.clone();
                let stop = &stop;
                scope.spawn(move || {
                    let mut start_key: Option<Key> = None;
                    loop {
                        if stop.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                            break;
                        }
                        let input =
                            self.scan_input(op, start_key.take(), None, Some((segment, segments)));
                        match self.call_with_retry(|| self.client.scan(input.clone())) {
                            Ok(response) => {
                                let done = response.last_evaluated_key.is_none();
                                let page = Page {
                                    items: response.items,
                                    count: response.count,
                                    scanned: response.scanned_count,
                                    consumed: response.consumed_capacity,
                                };
                                if tx.send(Ok(page)).is_err() {
                                    break;
                                }
                                if done {
                                    break;
                                }
                                start_key = response.last_evaluated_key;
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e));
                                break;
                            }
                        }
                    }
                });
            }
            drop(tx);

            // Merge pages as they arrive
            for message in rx {
                match message {
                    Ok(page) => {
                        output.add_capacity(page.consumed);
                        output.scanned_count += page.scanned;
                        if op.select_count {
                            output.count += page.count;
                        } else {
                            for item in page.items {
                                if remaining == Some(0) {
                                    break;
                                }
                                sink.on_item(&item);
                                output.items.push(item);
                                if let Some(n) = remaining.as_mut() {
                                    *n -= 1;
                                }
                            }
                        }
                        if remaining == Some(0) {
                            stop.store(true, Ordering::SeqCst);
                        }
                    }
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        stop.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        if let Some(e) = first_error {
            return Err(e);
        }
        self.cancel.check()?;
        if !op.select_count {
            output.count = output.items.len() as u64;
        }
        Ok(())
    }

    // -- writes ------------------------------------------------------------

    fn run_put(&self, op: &PutItemOp, output: &mut PlanOutput) -> Result<()> {
        let item: Item = op.item.clone().into_iter().collect();
        let response = self.call_with_retry(|| {
            self.client.put_item(PutItemInput {
                table_name: op.table.clone(),
                item: item.clone(),
                condition_expression: op.condition_expression.clone(),
                expression_attribute_names: op.names.clone(),
                expression_attribute_values: op.values.clone(),
                return_values: op.return_values,
                return_consumed_capacity: op.return_consumed_capacity,
            })
        })?;
        output.add_capacity(response.consumed_capacity);
        if let Some(attributes) = response.attributes {
            output.returned.push(attributes);
        }
        output.processed += 1;
        Ok(())
    }

    fn run_update(
        &self,
        op: &UpdateItemOp,
        pending_keys: Vec<Key>,
        output: &mut PlanOutput,
    ) -> Result<()> {
        let keys = match &op.key {
            Some(key) => vec![key.clone()],
            None => pending_keys,
        };
        let total = keys.len();
        for (applied, key) in keys.into_iter().enumerate() {
            self.cancel.check()?;
            let response = self
                .call_with_retry(|| {
                    self.client.update_item(UpdateItemInput {
                        table_name: op.table.clone(),
                        key: key.clone(),
                        update_expression: Some(op.update_expression.clone()),
                        condition_expression: op.condition_expression.clone(),
                        expression_attribute_names: op.names.clone(),
                        expression_attribute_values: op.values.clone(),
                        return_values: op.return_values,
                        return_consumed_capacity: op.return_consumed_capacity,
                    })
                })
                .map_err(|e| partial(e, applied, total - applied))?;
            output.add_capacity(response.consumed_capacity);
            if let Some(attributes) = response.attributes {
                output.returned.push(attributes);
            }
            output.processed += 1;
        }
        Ok(())
    }

    fn run_delete(
        &self,
        op: &DeleteItemOp,
        pending_keys: Vec<Key>,
        output: &mut PlanOutput,
    ) -> Result<()> {
        let keys = match &op.key {
            Some(key) => vec![key.clone()],
            None => pending_keys,
        };
        let total = keys.len();
        for (applied, key) in keys.into_iter().enumerate() {
            self.cancel.check()?;
            let response = self
                .call_with_retry(|| {
                    self.client.delete_item(DeleteItemInput {
                        table_name: op.table.clone(),
                        key: key.clone(),
                        condition_expression: op.condition_expression.clone(),
                        expression_attribute_names: op.names.clone(),
                        expression_attribute_values: op.values.clone(),
                        return_values: op.return_values,
                        return_consumed_capacity: op.return_consumed_capacity,
                    })
                })
                .map_err(|e| partial(e, applied, total - applied))?;
            output.add_capacity(response.consumed_capacity);
            if let Some(attributes) = response.attributes {
                output.returned.push(attributes);
            }
            output.processed += 1;
        }
        Ok(())
    }

    fn run_batch_write(
        &self,
        op: &BatchWriteItemOp,
        pending_keys: Vec<Key>,
        output: &mut PlanOutput,
    ) -> Result<()> {
        let mut queue: Vec<WriteRequest> = Vec::new();
        for item in &op.puts {
            queue.push(WriteRequest::Put {
                item: item.clone().into_iter().collect(),
            });
        }
        for key in &op.delete_keys {
            queue.push(WriteRequest::Delete { key: key.clone() });
        }
        if op.keys_from_read {
            for key in pending_keys {
                queue.push(WriteRequest::Delete { key });
            }
        }

        let total = queue.len();
        let mut requeue_attempts = 0u32;

        while !queue.is_empty() {
            self.cancel.check()?;
            let chunk: Vec<WriteRequest> = queue
                .drain(..queue.len().min(BATCH_WRITE_LIMIT))
                .collect();
            let chunk_len = chunk.len();
            let mut request_items = BTreeMap::new();
            request_items.insert(op.table.clone(), chunk);

            let response = self
                .call_with_retry(|| {
                    self.client.batch_write_item(BatchWriteItemInput {
                        request_items: request_items.clone(),
                        return_consumed_capacity: op.return_consumed_capacity,
                    })
                })
                .map_err(|e| match e {
                    Error::Execution(exec) => Error::Execution(ExecutionError::partial(
                        exec.source,
                        output.processed,
                        total - output.processed,
                    )),
                    other => other,
                })?;
            output.add_capacity(response.consumed_capacity);

            let unprocessed: Vec<WriteRequest> = response
                .unprocessed_items
                .into_values()
                .flatten()
                .collect();
            output.processed += chunk_len - unprocessed.len();

            if !unprocessed.is_empty() {
                if requeue_attempts >= self.throttle_policy.max_attempts {
                    return Err(Error::Execution(ExecutionError::partial(
                        DynamoError::throttled(
                            "batch write returned unprocessed items after all retries",
                        ),
                        output.processed,
                        total - output.processed,
                    )));
                }
                let backoff = self.throttle_policy.backoff_duration(requeue_attempts);
                warn!(count = unprocessed.len(), ?backoff, "requeueing unprocessed writes");
                std::thread::sleep(backoff);
                requeue_attempts += 1;
                queue.splice(0..0, unprocessed);
            }
        }

        debug!(table = %op.table, written = output.processed, "batch write complete");
        Ok(())
    }
}

/// Sink that turns keys-only read items into wire keys for phase two of an
/// expanded mutation.
#[derive(Default)]
struct KeyCollector {
    keys: Vec<Key>,
}

impl ResultSink for KeyCollector {
    fn on_item(&mut self, item: &Item) {
        self.keys
            .push(item.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }
}

fn partial(e: Error, applied: usize, remaining: usize) -> Error {
    match e {
        Error::Execution(exec) => {
            Error::Execution(ExecutionError::partial(exec.source, applied, remaining))
        }
        other => other,
    }
}
