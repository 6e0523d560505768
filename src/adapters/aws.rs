use crate::config::ServiceConfig;
use crate::domain::model::{ApplicationRecord, BusEvent, FinalDecision, PricingResult, RiskResult};
use crate::domain::ports::{ArtifactStore, EventBus, ParameterStore, ResultStore};
use crate::utils::error::{MortgageError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use aws_sdk_eventbridge::Client as EventBridgeClient;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Every AWS-backed port, sharing one SDK configuration.
pub struct AwsAdapters {
    pub bus: Arc<EventBridgeBus>,
    pub results: Arc<DynamoDbResultStore>,
    pub parameters: Arc<DynamoDbParameterStore>,
    pub artifacts: Arc<S3ArtifactStore>,
}

impl AwsAdapters {
    pub async fn from_config(config: &ServiceConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.storage.region.clone()))
            .load()
            .await;
        let dynamo = DynamoClient::new(&sdk_config);

        Self {
            bus: Arc::new(EventBridgeBus::new(EventBridgeClient::new(&sdk_config))),
            results: Arc::new(DynamoDbResultStore::new(
                dynamo.clone(),
                config.storage.results_table.clone(),
            )),
            parameters: Arc::new(DynamoDbParameterStore::new(
                dynamo,
                config.storage.parameters_table.clone(),
            )),
            artifacts: Arc::new(S3ArtifactStore::new(
                S3Client::new(&sdk_config),
                config.storage.model_bucket.clone(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBridgeBus {
    client: EventBridgeClient,
}

impl EventBridgeBus {
    pub fn new(client: EventBridgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventBus for EventBridgeBus {
    async fn publish(&self, event: BusEvent) -> Result<()> {
        let entry = PutEventsRequestEntry::builder()
            .source(&event.source)
            .detail_type(&event.detail_type)
            .detail(serde_json::to_string(&event.detail)?)
            .set_event_bus_name(event.event_bus_name.clone())
            .build();

        let output = self
            .client
            .put_events()
            .entries(entry)
            .send()
            .await
            .map_err(|e| MortgageError::EventBusError {
                message: format!("PutEvents failed: {}", e),
            })?;

        if output.failed_entry_count() > 0 {
            let reason = output
                .entries()
                .iter()
                .find_map(|entry| entry.error_message())
                .unwrap_or("unknown error");
            return Err(MortgageError::EventBusError {
                message: format!("{} rejected: {}", event.detail_type, reason),
            });
        }
        Ok(())
    }
}

/// Results table keyed by `application_id`. Nested results are JSON strings.
#[derive(Debug, Clone)]
pub struct DynamoDbResultStore {
    client: DynamoClient,
    table: String,
}

impl DynamoDbResultStore {
    pub fn new(client: DynamoClient, table: String) -> Self {
        Self { client, table }
    }

    /// `SET`s the fields and returns their previous values.
    async fn set_fields(
        &self,
        application_id: &str,
        fields: Vec<(&str, AttributeValue)>,
    ) -> Result<HashMap<String, AttributeValue>> {
        let assignments: Vec<String> = fields
            .iter()
            .map(|(name, _)| format!("{} = :{}", name, name))
            .collect();

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("application_id", AttributeValue::S(application_id.to_string()))
            .update_expression(format!("SET {}", assignments.join(", ")))
            .return_values(ReturnValue::UpdatedOld);
        for (name, value) in fields {
            request = request.expression_attribute_values(format!(":{}", name), value);
        }

        let output = request
            .send()
            .await
            .map_err(|e| MortgageError::storage(format!("UpdateItem on {} failed: {}", self.table, e)))?;
        Ok(output.attributes().cloned().unwrap_or_default())
    }
}

fn was_complete(previous: &HashMap<String, AttributeValue>) -> bool {
    previous
        .get("processing_complete")
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false)
}

fn json_attr<T: Serialize>(value: &T) -> Result<AttributeValue> {
    Ok(AttributeValue::S(serde_json::to_string(value)?))
}

fn time_attr(time: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(time.to_rfc3339())
}

fn string_field<'a>(item: &'a HashMap<String, AttributeValue>, name: &str) -> Option<&'a str> {
    item.get(name).and_then(|v| v.as_s().ok()).map(String::as_str)
}

fn json_field<T: DeserializeOwned>(item: &HashMap<String, AttributeValue>, name: &str) -> Result<Option<T>> {
    string_field(item, name)
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(Into::into)
}

fn time_field(item: &HashMap<String, AttributeValue>, name: &str) -> Option<DateTime<Utc>> {
    string_field(item, name)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Result<ApplicationRecord> {
    let application_id = string_field(item, "application_id")
        .ok_or_else(|| MortgageError::storage("result item has no application_id"))?;

    Ok(ApplicationRecord {
        application_id: application_id.to_string(),
        application_data: json_field(item, "application_data")?,
        created_at: time_field(item, "created_at").unwrap_or_else(Utc::now),
        updated_at: time_field(item, "updated_at"),
        pricing_result: json_field(item, "pricing_result")?,
        risk_result: json_field(item, "risk_result")?,
        final_decision: json_field(item, "final_decision")?,
        processing_complete: item
            .get("processing_complete")
            .and_then(|v| v.as_bool().ok())
            .copied()
            .unwrap_or(false),
    })
}

#[async_trait]
impl ResultStore for DynamoDbResultStore {
    async fn create(&self, record: ApplicationRecord) -> Result<()> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("application_id", AttributeValue::S(record.application_id.clone()))
            .item("created_at", time_attr(&record.created_at))
            .item("processing_complete", AttributeValue::Bool(record.processing_complete));
        if let Some(application) = &record.application_data {
            request = request.item("application_data", json_attr(application)?);
        }

        request
            .send()
            .await
            .map_err(|e| MortgageError::storage(format!("PutItem on {} failed: {}", self.table, e)))?;
        Ok(())
    }

    async fn get(&self, application_id: &str) -> Result<Option<ApplicationRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("application_id", AttributeValue::S(application_id.to_string()))
            .send()
            .await
            .map_err(|e| MortgageError::storage(format!("GetItem on {} failed: {}", self.table, e)))?;

        output.item().map(record_from_item).transpose()
    }

    async fn record_pricing(
        &self,
        application_id: &str,
        pricing: &PricingResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.set_fields(
            application_id,
            vec![
                ("pricing_result", json_attr(pricing)?),
                ("updated_at", time_attr(&updated_at)),
            ],
        )
        .await?;
        Ok(())
    }

    async fn record_risk(
        &self,
        application_id: &str,
        risk: &RiskResult,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.set_fields(
            application_id,
            vec![
                ("risk_result", json_attr(risk)?),
                ("updated_at", time_attr(&updated_at)),
            ],
        )
        .await?;
        Ok(())
    }

    async fn record_decision(&self, application_id: &str, decision: &FinalDecision) -> Result<bool> {
        let previous = self
            .set_fields(
                application_id,
                vec![
                    ("final_decision", json_attr(decision)?),
                    ("processing_complete", AttributeValue::Bool(true)),
                ],
            )
            .await?;
        Ok(!was_complete(&previous))
    }
}

/// Pricing parameters keyed by `parameter_type`, with a numeric `value`.
#[derive(Debug, Clone)]
pub struct DynamoDbParameterStore {
    client: DynamoClient,
    table: String,
}

impl DynamoDbParameterStore {
    pub fn new(client: DynamoClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl ParameterStore for DynamoDbParameterStore {
    async fn get_parameter(&self, parameter_type: &str) -> Result<Option<f64>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("parameter_type", AttributeValue::S(parameter_type.to_string()))
            .send()
            .await
            .map_err(|e| MortgageError::storage(format!("GetItem on {} failed: {}", self.table, e)))?;

        let Some(value) = output.item().and_then(|item| item.get("value")) else {
            return Ok(None);
        };
        let raw = value
            .as_n()
            .map_err(|_| MortgageError::storage(format!("{} value is not a number", parameter_type)))?;
        raw.parse::<f64>()
            .map(Some)
            .map_err(|e| MortgageError::storage(format!("{} value {:?}: {}", parameter_type, raw, e)))
    }
}

#[derive(Debug, Clone)]
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    MortgageError::not_found("artifact", &self.location(key))
                } else {
                    MortgageError::storage(format!("Failed to read from S3: {}", e))
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| MortgageError::storage(format!("Failed to collect S3 data: {}", e)))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_object(&self, key: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| MortgageError::storage(format!("Failed to write to S3: {}", e)))?;
        Ok(())
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}
