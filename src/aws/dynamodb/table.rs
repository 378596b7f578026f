//! Model based operations on a single PK/SK table.

use crate::aws::dynamodb::{
    Item, ItemAlreadyExists, ItemNotFound, Model, PARTITION_KEY, deserialize_entity, key_of,
    projection, to_item, update_expression,
};
use crate::web::health::HealthChecker;
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::batch_get_item::builders::BatchGetItemFluentBuilder;
use aws_sdk_dynamodb::operation::delete_item::builders::DeleteItemFluentBuilder;
use aws_sdk_dynamodb::operation::get_item::builders::GetItemFluentBuilder;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::put_item::builders::PutItemFluentBuilder;
use aws_sdk_dynamodb::operation::query::builders::QueryFluentBuilder;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::operation::update_item::builders::UpdateItemFluentBuilder;
use aws_sdk_dynamodb::types::{AttributeValue, KeysAndAttributes};
use chrono::Utc;
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

/// BatchGetItem accepts at most this many keys per request.
const BATCH_GET_LIMIT: usize = 100;

const ITEM_ABSENT: &str = "attribute_not_exists(PK) AND attribute_not_exists(SK)";
const ITEM_PRESENT: &str = "attribute_exists(PK) AND attribute_exists(SK)";

/// A DynamoDB table with its effective (prefixed) name.
#[derive(Clone, Debug)]
pub struct Table {
    client: Client,
    name: String,
}

impl Table {
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        Table {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a PutItem operation for this table.
    pub fn put_item(&self) -> PutItemFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: put item");
        self.client.put_item().table_name(&self.name)
    }

    /// Starts a GetItem operation for this table.
    pub fn get_item(&self) -> GetItemFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: get item");
        self.client.get_item().table_name(&self.name)
    }

    /// Starts an UpdateItem operation for this table.
    pub fn update_item(&self) -> UpdateItemFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: update item");
        self.client.update_item().table_name(&self.name)
    }

    /// Starts a DeleteItem operation for this table.
    pub fn delete_item(&self) -> DeleteItemFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: delete item");
        self.client.delete_item().table_name(&self.name)
    }

    /// Starts a Query operation for this table.
    pub fn query(&self) -> QueryFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: query");
        self.client.query().table_name(&self.name)
    }

    fn batch_get_item(&self) -> BatchGetItemFluentBuilder {
        tracing::debug!(table = %self.name, "dynamodb: batch get item");
        self.client.batch_get_item()
    }

    /// Stores the model, replacing any existing item with the same keys.
    pub async fn put<M: Model>(&self, model: &M) -> anyhow::Result<()> {
        let _ = self
            .put_item()
            .set_item(Some(to_item(model)?))
            .send()
            .await
            .with_context(|| format!("Failed to put item into '{}'", self.name))?;

        Ok(())
    }

    /// Stores the model unless an item with the same keys exists.
    ///
    /// Fails with [`ItemAlreadyExists`] in the latter case.
    pub async fn create<M: Model>(&self, model: &M) -> anyhow::Result<()> {
        let result = self
            .put_item()
            .set_item(Some(to_item(model)?))
            .condition_expression(ITEM_ABSENT)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(PutItemError::is_conditional_check_failed_exception) =>
            {
                Err(ItemAlreadyExists {
                    pk: model.pk(),
                    sk: model.sk(),
                }
                .into())
            }
            Err(err) => Err(err).with_context(|| format!("Failed to create item in '{}'", self.name)),
        }
    }

    /// Overwrites every attribute of an existing item and stamps `UpdatedAt`.
    ///
    /// Fails with [`ItemNotFound`] if there is no item with the model's keys.
    pub async fn update<M: Model>(&self, model: &M) -> anyhow::Result<()> {
        let update = update_expression(model, Utc::now())?;

        let result = self
            .update_item()
            .set_key(Some(key_of(model)))
            .update_expression(update.expression)
            .set_expression_attribute_names(Some(update.names))
            .set_expression_attribute_values(Some(update.values))
            .condition_expression(ITEM_PRESENT)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(UpdateItemError::is_conditional_check_failed_exception) =>
            {
                Err(ItemNotFound {
                    pk: model.pk(),
                    sk: model.sk(),
                }
                .into())
            }
            Err(err) => Err(err).with_context(|| format!("Failed to update item in '{}'", self.name)),
        }
    }

    /// Loads the item with the keys of the given model.
    ///
    /// Only the [columns](Model::columns) of the model are fetched.
    pub async fn get<M: Model>(&self, model: &M) -> anyhow::Result<Option<M>> {
        let columns = model.columns()?;
        let mut request = self.get_item().set_key(Some(key_of(model)));
        if !columns.is_empty() {
            let projection = projection(&columns);
            request = request
                .projection_expression(projection.expression)
                .set_expression_attribute_names(Some(projection.names));
        }

        let output = request
            .send()
            .await
            .with_context(|| format!("Failed to get item from '{}'", self.name))?;

        deserialize_entity(output.item)
    }

    /// Deletes the item with the keys of the given model. Deleting a missing
    /// item is no error.
    pub async fn delete<M: Model>(&self, model: &M) -> anyhow::Result<()> {
        let _ = self
            .delete_item()
            .set_key(Some(key_of(model)))
            .send()
            .await
            .with_context(|| format!("Failed to delete item from '{}'", self.name))?;

        Ok(())
    }

    /// Loads all items matching the keys of the given models.
    ///
    /// Items are returned in no particular order; missing items are skipped.
    pub async fn batch_get<M: Model>(&self, models: &[M]) -> anyhow::Result<Vec<M>> {
        let mut entities = Vec::with_capacity(models.len());

        for chunk in models.chunks(BATCH_GET_LIMIT) {
            let keys = KeysAndAttributes::builder()
                .set_keys(Some(chunk.iter().map(key_of).collect()))
                .build()
                .context("Failed to build batch get request")?;
            let mut pending = Some(HashMap::from([(self.name.clone(), keys)]));
            let mut attempt = 0;

            while let Some(request_items) = pending.take() {
                if attempt > 0 {
                    tokio::time::sleep(Duration::from_millis(50 * attempt)).await;
                }
                attempt += 1;

                let output = self
                    .batch_get_item()
                    .set_request_items(Some(request_items))
                    .send()
                    .await
                    .with_context(|| format!("Failed to batch get items from '{}'", self.name))?;

                let items = output
                    .responses
                    .and_then(|mut responses| responses.remove(&self.name))
                    .unwrap_or_default();
                for item in items {
                    entities.push(
                        serde_dynamo::aws_sdk_dynamodb_1::from_item(item)
                            .context("Failed to deserialize DynamoDB item")?,
                    );
                }

                pending = output
                    .unprocessed_keys
                    .filter(|unprocessed| unprocessed.values().any(|keys| !keys.keys().is_empty()));
            }
        }

        Ok(entities)
    }

    /// Loads every item within the given partition, following all pages.
    pub async fn find_all<M: Model + 'static>(&self, pk: impl Into<String>) -> anyhow::Result<Vec<M>> {
        let query = self
            .query()
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", PARTITION_KEY)
            .expression_attribute_values(":pk", AttributeValue::S(pk.into()));

        stream_all(query).try_collect().await
    }
}

/// Returns a stream of entities from a paginated query.
pub fn stream_all<E>(query: QueryFluentBuilder) -> Pin<Box<dyn Stream<Item = anyhow::Result<E>> + Send>>
where
    E: DeserializeOwned + Send + 'static,
{
    enum PaginationState {
        Start,
        LastKey(Item),
        End,
    }

    futures_util::stream::try_unfold(
        (query, PaginationState::Start),
        |(query, state)| async move {
            let mut request = query.clone();
            match state {
                PaginationState::Start => {}
                PaginationState::LastKey(last_key) => {
                    request = request.set_exclusive_start_key(Some(last_key));
                }
                PaginationState::End => return Ok::<_, anyhow::Error>(None),
            }

            let result = request
                .send()
                .await
                .context("Error executing paginated query")?;

            let entities = result
                .items
                .unwrap_or_default()
                .into_iter()
                .map(serde_dynamo::aws_sdk_dynamodb_1::from_item)
                .collect::<Result<Vec<E>, _>>()
                .context("Failed to deserialize items")?;

            let next_state = match result.last_evaluated_key {
                Some(next_key) if !next_key.is_empty() => PaginationState::LastKey(next_key),
                _ => PaginationState::End,
            };

            Ok(Some((entities, (query, next_state))))
        },
    )
    .map_ok(|items| futures_util::stream::iter(items.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

#[async_trait]
impl HealthChecker for Table {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let _ = self
            .client
            .describe_table()
            .table_name(&self.name)
            .send()
            .await
            .with_context(|| format!("Cannot access DynamoDB table '{}'", self.name))?;

        Ok(())
    }
}
