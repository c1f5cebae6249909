use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{RecordFields, RecordStore, StoredRecord};
use crate::config::AirtableConfig;
use crate::error::AgentError;

// Column name used by `RecordFields` for the screenshot reference.
const SCREENSHOT_KEY: &str = "Screenshot";

pub struct AirtableStore {
    api_key: String,
    client: Client,
    table_url: String,
    screenshot_field: Option<String>,
}

#[derive(Serialize)]
struct CreateRequest {
    fields: Map<String, Value>,
    typecast: bool,
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Deserialize)]
struct ListedRecord {
    id: String,
    #[serde(rename = "createdTime", default)]
    created_time: Option<String>,
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct ListResponse {
    records: Vec<ListedRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Quotes a value as an Airtable formula string literal.
fn formula_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

impl AirtableStore {
    pub fn new(config: &AirtableConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        let table_url = format!(
            "{}/{}/{}",
            config.api_url.trim_end_matches('/'),
            config.base_id,
            config.table_name
        );
        Self {
            api_key: config.api_key.clone(),
            client,
            table_url,
            screenshot_field: config.screenshot_field.clone(),
        }
    }

    /// Table columns for `fields`. The screenshot goes to the configured
    /// column, or is left out when the table has none.
    fn to_columns(&self, fields: &RecordFields) -> Result<Map<String, Value>, AgentError> {
        let mut columns = match serde_json::to_value(fields)? {
            Value::Object(columns) => columns,
            _ => Map::new(),
        };
        let screenshot = columns.remove(SCREENSHOT_KEY);
        if let (Some(column), Some(screenshot)) = (&self.screenshot_field, screenshot) {
            columns.insert(column.clone(), screenshot);
        }
        Ok(columns)
    }

    fn from_columns(&self, listed: ListedRecord) -> Result<StoredRecord, AgentError> {
        let mut columns = listed.fields;
        columns.remove(SCREENSHOT_KEY);
        if let Some(screenshot) = self.screenshot_field.as_ref().and_then(|c| columns.remove(c)) {
            columns.insert(SCREENSHOT_KEY.to_string(), screenshot);
        }
        Ok(StoredRecord {
            id: listed.id,
            created_time: listed.created_time,
            fields: serde_json::from_value(Value::Object(columns))?,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(AgentError::Store(format!(
            "Airtable returned status {}: {message}",
            status.as_u16()
        )))
    }

    async fn list(&self, formula: String) -> Result<Vec<StoredRecord>, AgentError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![("filterByFormula", formula.clone())];
            if let Some(offset) = offset.take() {
                query.push(("offset", offset));
            }

            let response = self
                .client
                .get(&self.table_url)
                .bearer_auth(&self.api_key)
                .query(&query)
                .send()
                .await?;
            let page = Self::check(response).await?.json::<ListResponse>().await?;
            for listed in page.records {
                records.push(self.from_columns(listed)?);
            }

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        tracing::debug!(%formula, count = records.len(), "Airtable query complete");
        Ok(records)
    }
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn create_record(&self, fields: &RecordFields) -> Result<String, AgentError> {
        let response = self
            .client
            .post(&self.table_url)
            .bearer_auth(&self.api_key)
            .json(&CreateRequest {
                fields: self.to_columns(fields)?,
                typecast: true,
            })
            .send()
            .await?;
        let created = Self::check(response).await?.json::<CreateResponse>().await?;

        tracing::info!(record_id = %created.id, module = %fields.module, "Airtable record created");
        Ok(created.id)
    }

    async fn query_by_date(&self, date: &str) -> Result<Vec<StoredRecord>, AgentError> {
        self.list(format!("{{Date}} = {}", formula_literal(date))).await
    }

    async fn query_by_module(&self, module: &str) -> Result<Vec<StoredRecord>, AgentError> {
        self.list(format!("{{Module Name}} = {}", formula_literal(module)))
            .await
    }
}
