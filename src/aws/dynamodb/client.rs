//! DynamoDB client wrapper with table prefix support.
//!
//! All table names are prefixed with `DYNAMO_TABLE_PREFIX` so that the same
//! code can run against e.g. `prod-orders` and `dev-orders`.

use crate::aws::dynamodb::table::Table;
use crate::aws::dynamodb::{PARTITION_KEY, SORT_KEY};
use anyhow::Context;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType, TableStatus,
};
use std::env;
use std::time::Duration;
use tokio::time::sleep;

const ACTIVATION_ATTEMPTS: usize = 15;
const ACTIVATION_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct DynamoClient {
    /// The underlying AWS SDK DynamoDB client.
    pub client: Client,
    table_prefix: String,
}

impl DynamoClient {
    /// Creates a new client from the default AWS configuration and
    /// `DYNAMO_TABLE_PREFIX`.
    pub async fn from_env() -> anyhow::Result<DynamoClient> {
        tracing::info!("Setting up DynamoDB....");
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);

        let table_prefix = env::var("DYNAMO_TABLE_PREFIX")
            .context("No DYNAMO_TABLE_PREFIX provided in environment")?;

        Ok(DynamoClient::new(client, table_prefix))
    }

    pub fn new(client: Client, table_prefix: impl Into<String>) -> Self {
        DynamoClient {
            client,
            table_prefix: table_prefix.into(),
        }
    }

    /// Given logical name `orders` and prefix `shop-prod`, returns `shop-prod-orders`.
    pub fn effective_name(&self, table: &str) -> String {
        format!("{}-{}", self.table_prefix, table)
    }

    /// Returns a handle for the given logical table.
    pub fn table(&self, name: &str) -> Table {
        Table::new(self.client.clone(), self.effective_name(name))
    }

    /// Checks if a table exists, no matter in which state.
    pub async fn does_table_exist(&self, name: &str) -> anyhow::Result<bool> {
        let effective_name = self.effective_name(name);

        match self
            .client
            .describe_table()
            .table_name(&effective_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .map(|e| e.is_resource_not_found_exception())
                    .unwrap_or(false) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context(format!("Cannot access DynamoDB table '{}'", effective_name)),
        }
    }

    /// Creates a PK/SK table billed per request unless it already exists.
    ///
    /// Waits for the table to become `ACTIVE` before returning.
    pub async fn ensure_table(&self, name: &str) -> anyhow::Result<Table> {
        let effective_name = self.effective_name(name);

        if self.does_table_exist(name).await? {
            tracing::info!("Table '{}' already exists.", effective_name);
            return Ok(self.table(name));
        }

        tracing::info!("Table '{}' does not exist. Creating...", effective_name);
        let _ = self
            .client
            .create_table()
            .table_name(&effective_name)
            .attribute_definitions(string_attribute(PARTITION_KEY)?)
            .attribute_definitions(string_attribute(SORT_KEY)?)
            .key_schema(key_element(PARTITION_KEY, KeyType::Hash)?)
            .key_schema(key_element(SORT_KEY, KeyType::Range)?)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .with_context(|| format!("Failed to create DynamoDB table '{}'", &effective_name))?;

        tracing::info!("Create Table '{}' was submitted to DynamoDB", effective_name);
        self.wait_until_table_becomes_active(&effective_name).await?;
        tracing::info!("Table '{}' was successfully created", effective_name);

        Ok(self.table(name))
    }

    async fn wait_until_table_becomes_active(&self, effective_name: &str) -> anyhow::Result<()> {
        for _ in 0..ACTIVATION_ATTEMPTS {
            let resp = self
                .client
                .describe_table()
                .table_name(effective_name)
                .send()
                .await
                .with_context(|| format!("Failed to check table status of '{}'", effective_name))?;

            let status = resp
                .table()
                .and_then(|t| t.table_status())
                .unwrap_or(&TableStatus::Creating);

            if status == &TableStatus::Active {
                return Ok(());
            }

            sleep(ACTIVATION_INTERVAL).await;
        }

        anyhow::bail!("Table '{}' did not become ACTIVE in time", effective_name);
    }
}

fn string_attribute(name: &str) -> anyhow::Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .with_context(|| format!("Invalid attribute definition for '{}'", name))
}

fn key_element(name: &str, key_type: KeyType) -> anyhow::Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .with_context(|| format!("Invalid key schema element for '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::test::test_run_id;

    fn offline_client() -> DynamoClient {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(aws_sdk_dynamodb::config::BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new("eu-central-1"))
            .build();

        DynamoClient::new(Client::from_conf(config), "kit-test")
    }

    #[test]
    fn prefixes_table_names() {
        let client = offline_client();

        assert_eq!(client.effective_name("orders"), "kit-test-orders");
        assert_eq!(client.table("orders").name(), "kit-test-orders");
    }

    #[test]
    fn key_schema_is_pk_and_sk() {
        assert_eq!(string_attribute("PK").unwrap().attribute_type(), &ScalarAttributeType::S);
        assert_eq!(key_element("SK", KeyType::Range).unwrap().key_type(), &KeyType::Range);
    }

    #[tokio::test]
    #[ignore]
    async fn does_table_exists_detects_nonexistent_table() {
        unsafe {
            env::set_var("DYNAMO_TABLE_PREFIX", "kit-test");
        }

        let client = DynamoClient::from_env().await.unwrap();

        assert!(!client.does_table_exist("non-existent-table").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn ensure_table_creates_a_table_once() {
        unsafe {
            env::set_var("DYNAMO_TABLE_PREFIX", "kit-test");
        }

        let client = DynamoClient::from_env().await.unwrap();
        let table_name = format!("test-table-{}", test_run_id());

        assert!(!client.does_table_exist(&table_name).await.unwrap());
        client.ensure_table(&table_name).await.unwrap();
        assert!(client.does_table_exist(&table_name).await.unwrap());

        // A second call finds the existing table...
        client.ensure_table(&table_name).await.unwrap();

        client
            .client
            .delete_table()
            .table_name(client.effective_name(&table_name))
            .send()
            .await
            .unwrap();
    }
}
