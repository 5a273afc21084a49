//! Amazon DynamoDB backend. Requires the `dynamodb` feature.
//!
//! Credentials and region are loaded from the standard AWS chain via
//! `aws-config` (environment variables, shared config, IMDS, etc.), with the
//! region and endpoint optionally overridden from [`SessionConfig`].
//!
//! # Item layout
//!
//! | attribute | type | notes |
//! |---|---|---|
//! | `<table_key>` | S | partition key |
//! | `data` | S | serialized session |
//! | `locked` | BOOL | written only by the pessimistic strategy |
//! | `lock_acquired_at` | N | epoch milliseconds |
//! | `created_at` | N | epoch milliseconds |
//! | `updated_at` | N | epoch milliseconds |

use crate::{Condition, ItemStore, RecordUpdate, ScanFilter, ScanPage, StoreResult};
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, ReturnValue, WriteRequest};
use chrono::{DateTime, TimeZone, Utc};
use dynasession_core::{
    LockState, MAX_BATCH_SIZE, SessionConfig, SessionError, SessionRecord, StoreError,
};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

const ATTR_DATA: &str = "data";
const ATTR_LOCKED: &str = "locked";
const ATTR_LOCK_ACQUIRED_AT: &str = "lock_acquired_at";
const ATTR_CREATED_AT: &str = "created_at";
const ATTR_UPDATED_AT: &str = "updated_at";

/// Rounds of resubmitting unprocessed batch deletes before giving up.
const MAX_UNPROCESSED_ROUNDS: usize = 8;

type Item = HashMap<String, AttributeValue>;

/// [`ItemStore`] backed by a DynamoDB table.
pub struct DynamoDbItemStore {
    client: Client,
    table_name: String,
    table_key: String,
}

impl DynamoDbItemStore {
    /// Build a client from the AWS credential chain and the store settings.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::MissingCredential` if the loaded AWS
    /// configuration carries no credentials provider.
    pub async fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;
        Self::from_sdk_config(&sdk_config, config)
    }

    /// Build a client from an already loaded AWS configuration.
    pub fn from_sdk_config(
        sdk_config: &aws_config::SdkConfig,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        if sdk_config.credentials_provider().is_none() {
            return Err(SessionError::MissingCredential(
                "no AWS credentials provider configured".into(),
            ));
        }
        let client = Client::new(sdk_config);
        info!(table = %config.table_name, "dynamodb session store created");
        Ok(Self::with_client(client, config))
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, config: &SessionConfig) -> Self {
        Self {
            client,
            table_name: config.table_name.clone(),
            table_key: config.table_key.clone(),
        }
    }

    fn key(&self, id: &str) -> Item {
        HashMap::from([(self.table_key.clone(), AttributeValue::S(id.to_string()))])
    }

    fn record_to_item(&self, record: &SessionRecord) -> Item {
        let mut item = self.key(&record.id);
        if let Some(data) = &record.data {
            item.insert(ATTR_DATA.into(), AttributeValue::S(data.clone()));
        }
        if record.lock != LockState::default() {
            item.insert(ATTR_LOCKED.into(), AttributeValue::Bool(record.lock.locked));
            if let Some(at) = record.lock.acquired_at {
                item.insert(ATTR_LOCK_ACQUIRED_AT.into(), millis(at));
            }
        }
        if let Some(at) = record.created_at {
            item.insert(ATTR_CREATED_AT.into(), millis(at));
        }
        if let Some(at) = record.updated_at {
            item.insert(ATTR_UPDATED_AT.into(), millis(at));
        }
        item
    }

    fn item_to_record(&self, item: &Item) -> StoreResult<SessionRecord> {
        let id = match item.get(&self.table_key) {
            Some(AttributeValue::S(id)) => id.clone(),
            _ => {
                return Err(StoreError::Unavailable(format!(
                    "item in {} is missing string key {}",
                    self.table_name, self.table_key
                )));
            }
        };
        let data = match item.get(ATTR_DATA) {
            Some(AttributeValue::S(data)) => Some(data.clone()),
            _ => None,
        };
        let locked = matches!(item.get(ATTR_LOCKED), Some(AttributeValue::Bool(true)));
        Ok(SessionRecord {
            id,
            data,
            lock: LockState { locked, acquired_at: timestamp(item.get(ATTR_LOCK_ACQUIRED_AT)) },
            created_at: timestamp(item.get(ATTR_CREATED_AT)),
            updated_at: timestamp(item.get(ATTR_UPDATED_AT)),
        })
    }
}

/// Accumulates expression placeholders for one request.
#[derive(Default)]
struct Expr {
    names: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl Expr {
    fn name(&mut self, attr: &str) -> String {
        let placeholder = format!("#{attr}");
        self.names.insert(placeholder.clone(), attr.to_string());
        placeholder
    }

    fn value(&mut self, label: &str, value: AttributeValue) -> String {
        let placeholder = format!(":{label}");
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn condition(&mut self, table_key: &str, condition: Condition) -> String {
        match condition {
            Condition::NotExists => {
                let key = self.name_key(table_key);
                format!("attribute_not_exists({key})")
            }
            Condition::LockMatches(expected) => {
                let key = self.name_key(table_key);
                let locked = self.name(ATTR_LOCKED);
                let at = self.name(ATTR_LOCK_ACQUIRED_AT);
                let expected_locked = self.value("c_locked", AttributeValue::Bool(expected.locked));
                // Records written without locking carry no lock attributes at all.
                let locked_clause = if expected.locked {
                    format!("{locked} = {expected_locked}")
                } else {
                    format!("(attribute_not_exists({locked}) OR {locked} = {expected_locked})")
                };
                let at_clause = match expected.acquired_at {
                    Some(ts) => {
                        let v = self.value("c_lock_at", millis(ts));
                        format!("{at} = {v}")
                    }
                    None => format!("attribute_not_exists({at})"),
                };
                format!("attribute_exists({key}) AND {locked_clause} AND {at_clause}")
            }
            Condition::HeldSince(ts) => {
                let locked = self.name(ATTR_LOCKED);
                let at = self.name(ATTR_LOCK_ACQUIRED_AT);
                let t = self.value("c_locked", AttributeValue::Bool(true));
                let v = self.value("c_lock_at", millis(ts));
                format!("{locked} = {t} AND {at} = {v}")
            }
            Condition::Unlocked => {
                // A missing item has no attributes, so this also admits creation.
                let locked = self.name(ATTR_LOCKED);
                let f = self.value("c_locked", AttributeValue::Bool(false));
                format!("attribute_not_exists({locked}) OR {locked} = {f}")
            }
        }
    }

    fn name_key(&mut self, table_key: &str) -> String {
        self.names.insert("#pk".to_string(), table_key.to_string());
        "#pk".to_string()
    }

    fn update(&mut self, update: &RecordUpdate) -> Option<String> {
        let mut sets = Vec::new();
        let mut removes = Vec::new();

        if let Some(data) = &update.data {
            let n = self.name(ATTR_DATA);
            let v = self.value("data", AttributeValue::S(data.clone()));
            sets.push(format!("{n} = {v}"));
        }
        if let Some(lock) = update.lock {
            let n = self.name(ATTR_LOCKED);
            let v = self.value("locked", AttributeValue::Bool(lock.locked));
            sets.push(format!("{n} = {v}"));
            let n = self.name(ATTR_LOCK_ACQUIRED_AT);
            match lock.acquired_at {
                Some(at) => {
                    let v = self.value("lock_at", millis(at));
                    sets.push(format!("{n} = {v}"));
                }
                None => removes.push(n),
            }
        }
        if let Some(at) = update.updated_at {
            let n = self.name(ATTR_UPDATED_AT);
            let v = self.value("updated_at", millis(at));
            sets.push(format!("{n} = {v}"));
        }
        if let Some(at) = update.created_at_if_absent {
            let n = self.name(ATTR_CREATED_AT);
            let v = self.value("created_at", millis(at));
            sets.push(format!("{n} = if_not_exists({n}, {v})"));
        }

        let mut clauses = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !removes.is_empty() {
            clauses.push(format!("REMOVE {}", removes.join(", ")));
        }
        (!clauses.is_empty()).then(|| clauses.join(" "))
    }

    fn scan_filter(&mut self, filter: &ScanFilter) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(cutoff) = filter.updated_before {
            let n = self.name(ATTR_UPDATED_AT);
            let v = self.value("updated_before", millis(cutoff));
            clauses.push(format!("{n} < {v}"));
        }
        if let Some(cutoff) = filter.created_before {
            let n = self.name(ATTR_CREATED_AT);
            let v = self.value("created_before", millis(cutoff));
            clauses.push(format!("{n} < {v}"));
        }
        (!clauses.is_empty()).then(|| clauses.join(" OR "))
    }

    fn names(&self) -> Option<HashMap<String, String>> {
        (!self.names.is_empty()).then(|| self.names.clone())
    }

    fn values(&self) -> Option<HashMap<String, AttributeValue>> {
        (!self.values.is_empty()).then(|| self.values.clone())
    }
}

#[async_trait]
impl ItemStore for DynamoDbItemStore {
    #[instrument(skip_all, fields(table = %self.table_name, session_id = id))]
    async fn get(&self, id: &str, consistent_read: bool) -> StoreResult<Option<SessionRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(id)))
            .consistent_read(consistent_read)
            .send()
            .await
            .map_err(map_sdk_error)?;

        output.item.as_ref().map(|item| self.item_to_record(item)).transpose()
    }

    #[instrument(skip_all, fields(table = %self.table_name, session_id = %record.id))]
    async fn put(&self, record: SessionRecord, condition: Option<Condition>) -> StoreResult<()> {
        let mut expr = Expr::default();
        let condition = condition.map(|c| expr.condition(&self.table_key, c));

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(self.record_to_item(&record)))
            .set_condition_expression(condition)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %self.table_name, session_id = id))]
    async fn update(
        &self,
        id: &str,
        update: RecordUpdate,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        let mut expr = Expr::default();
        let update_expression = expr.update(&update);
        let condition = condition.map(|c| expr.condition(&self.table_key, c));

        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(id)))
            .set_update_expression(update_expression)
            .set_condition_expression(condition)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(table = %self.table_name, session_id = id))]
    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(self.key(id)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(output.attributes.is_some())
    }

    #[instrument(skip_all, fields(table = %self.table_name, count = ids.len()))]
    async fn delete_batch(&self, ids: &[String]) -> StoreResult<()> {
        for chunk in ids.chunks(MAX_BATCH_SIZE) {
            let mut requests = chunk
                .iter()
                .map(|id| {
                    DeleteRequest::builder()
                        .set_key(Some(self.key(id)))
                        .build()
                        .map(|delete| WriteRequest::builder().delete_request(delete).build())
                        .map_err(|e| StoreError::Unavailable(format!("invalid delete request: {e}")))
                })
                .collect::<StoreResult<Vec<_>>>()?;

            let mut rounds = 0;
            while !requests.is_empty() {
                if rounds == MAX_UNPROCESSED_ROUNDS {
                    return Err(StoreError::Throttled(format!(
                        "{} deletes still unprocessed after {rounds} rounds",
                        requests.len()
                    )));
                }
                rounds += 1;

                let output = self
                    .client
                    .batch_write_item()
                    .request_items(self.table_name.clone(), requests)
                    .send()
                    .await
                    .map_err(map_sdk_error)?;

                requests = output
                    .unprocessed_items
                    .and_then(|mut items| items.remove(&self.table_name))
                    .unwrap_or_default();
                if !requests.is_empty() {
                    debug!(unprocessed = requests.len(), round = rounds, "resubmitting batch delete");
                }
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(table = %self.table_name))]
    async fn scan(
        &self,
        filter: &ScanFilter,
        start_after: Option<String>,
        limit: usize,
    ) -> StoreResult<ScanPage> {
        let mut expr = Expr::default();
        let filter_expression = expr.scan_filter(filter);
        let key = expr.name_key(&self.table_key);
        let limit = i32::try_from(limit.max(1)).unwrap_or(i32::MAX);

        let output = self
            .client
            .scan()
            .table_name(&self.table_name)
            .set_filter_expression(filter_expression)
            .projection_expression(key)
            .set_expression_attribute_names(expr.names())
            .set_expression_attribute_values(expr.values())
            .set_exclusive_start_key(start_after.map(|id| self.key(&id)))
            .limit(limit)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let ids = output
            .items
            .unwrap_or_default()
            .iter()
            .filter_map(|item| match item.get(&self.table_key) {
                Some(AttributeValue::S(id)) => Some(id.clone()),
                _ => {
                    warn!(table = %self.table_name, "skipping scanned item without string key");
                    None
                }
            })
            .collect();

        let next = output.last_evaluated_key.and_then(|mut key| match key.remove(&self.table_key) {
            Some(AttributeValue::S(id)) => Some(id),
            _ => None,
        });

        Ok(ScanPage { ids, next })
    }
}

fn millis(at: DateTime<Utc>) -> AttributeValue {
    AttributeValue::N(at.timestamp_millis().to_string())
}

fn timestamp(value: Option<&AttributeValue>) -> Option<DateTime<Utc>> {
    match value {
        Some(AttributeValue::N(n)) => {
            n.parse::<i64>().ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        }
        _ => None,
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = match &err {
        SdkError::ServiceError(service) => service.err().code().map(str::to_string),
        _ => None,
    };
    match code.as_deref() {
        Some("ConditionalCheckFailedException") => StoreError::ConditionFailed,
        Some(
            "ProvisionedThroughputExceededException"
            | "RequestLimitExceeded"
            | "ThrottlingException",
        ) => StoreError::Throttled(DisplayErrorContext(&err).to_string()),
        _ => StoreError::Unavailable(DisplayErrorContext(&err).to_string()),
    }
}
