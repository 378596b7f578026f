//! DynamoDB single-table adapter.
//!
//! Every item lives in a table keyed by a string partition key `PK` and a
//! string sort key `SK`. Entities implement [`Model`] to provide both keys and
//! are otherwise (de)serialized via `serde_dynamo`.
//!
//! - [`client::DynamoClient`] - table-prefixed client, table bootstrapping
//! - [`table::Table`] - CRUD operations for models
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `DYNAMO_TABLE_PREFIX` | Prefix for all table names (required) |

use anyhow::Context;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

pub mod client;
pub mod table;

pub use client::DynamoClient;
pub use table::Table;

pub const PARTITION_KEY: &str = "PK";
pub const SORT_KEY: &str = "SK";
pub const UPDATED_AT: &str = "UpdatedAt";

pub type Item = HashMap<String, AttributeValue>;

/// An entity stored in a PK/SK table.
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    fn pk(&self) -> String;
    fn sk(&self) -> String;

    /// The attributes fetched by [`Table::get`]. Defaults to every serialized
    /// field of the model.
    fn columns(&self) -> anyhow::Result<Vec<String>> {
        columns_of(self)
    }
}

/// Signals that [`Table::create`] found an item with the same keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemAlreadyExists {
    pub pk: String,
    pub sk: String,
}

impl Display for ItemAlreadyExists {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "An item with PK '{}' and SK '{}' already exists", self.pk, self.sk)
    }
}

impl std::error::Error for ItemAlreadyExists {}

/// Signals that [`Table::update`] found no item to update.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemNotFound {
    pub pk: String,
    pub sk: String,
}

impl Display for ItemNotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "No item with PK '{}' and SK '{}' exists", self.pk, self.sk)
    }
}

impl std::error::Error for ItemNotFound {}

/// Lists the attribute names a model serializes to, sorted by name.
///
/// Fields marked with `#[serde(skip)]` don't show up, renamed fields appear
/// under their new name.
pub fn columns_of<M: Serialize + ?Sized>(model: &M) -> anyhow::Result<Vec<String>> {
    let item: Item = serde_dynamo::aws_sdk_dynamodb_1::to_item(model)
        .context("Error serializing entity into DynamoDB item")?;

    let mut columns: Vec<String> = item.into_keys().collect();
    columns.sort();

    Ok(columns)
}

/// A projection expression along with its attribute name placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub expression: String,
    pub names: HashMap<String, String>,
}

/// Builds a projection expression for the given columns.
///
/// Every column is referenced via a placeholder so that reserved words like
/// `Name` or `Status` can be used as attribute names.
pub fn projection(columns: &[String]) -> Projection {
    let mut names = HashMap::new();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let placeholder = format!("#p{}", index);
            let _ = names.insert(placeholder.clone(), column.clone());
            placeholder
        })
        .collect();

    Projection {
        expression: placeholders.join(", "),
        names,
    }
}

/// Returns the primary key of the given model.
pub fn key_of<M: Model + ?Sized>(model: &M) -> Item {
    HashMap::from([
        (PARTITION_KEY.to_string(), AttributeValue::S(model.pk())),
        (SORT_KEY.to_string(), AttributeValue::S(model.sk())),
    ])
}

/// Serializes the model and adds its `PK` and `SK` attributes.
pub fn to_item<M: Model + ?Sized>(model: &M) -> anyhow::Result<Item> {
    let mut item: Item = serde_dynamo::aws_sdk_dynamodb_1::to_item(model)
        .context("Error serializing entity into DynamoDB item")?;
    item.extend(key_of(model));

    Ok(item)
}

/// Deserializes an item, if present, into an entity.
pub fn deserialize_entity<T: DeserializeOwned>(values: Option<Item>) -> anyhow::Result<Option<T>> {
    if let Some(item) = values {
        Ok(Some(
            serde_dynamo::aws_sdk_dynamodb_1::from_item(item)
                .context("Failed to deserialize DynamoDB item")?,
        ))
    } else {
        Ok(None)
    }
}

/// An update expression along with its placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: Item,
}

/// Builds `SET` expression which stores `UpdatedAt` and every serialized
/// attribute of the model except its keys.
pub fn update_expression<M: Model + ?Sized>(
    model: &M,
    now: DateTime<Utc>,
) -> anyhow::Result<UpdateExpression> {
    let item: Item = serde_dynamo::aws_sdk_dynamodb_1::to_item(model)
        .context("Error serializing entity into DynamoDB item")?;

    let mut attributes: BTreeMap<String, AttributeValue> = item
        .into_iter()
        .filter(|(name, _)| name != PARTITION_KEY && name != SORT_KEY)
        .collect();
    let _ = attributes.insert(
        UPDATED_AT.to_string(),
        AttributeValue::S(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );

    let mut update = UpdateExpression::default();
    let mut assignments = Vec::with_capacity(attributes.len());
    for (index, (name, value)) in attributes.into_iter().enumerate() {
        let name_placeholder = format!("#u{}", index);
        let value_placeholder = format!(":u{}", index);
        assignments.push(format!("{} = {}", name_placeholder, value_placeholder));
        let _ = update.names.insert(name_placeholder, name);
        let _ = update.values.insert(value_placeholder, value);
    }
    update.expression = format!("SET {}", assignments.join(", "));

    Ok(update)
}
