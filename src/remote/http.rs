// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP implementation of [`RecordStore`].
//!
//! Speaks the record-store REST dialect: `GET/POST /api/<entity>`,
//! `PUT/DELETE /api/<entity>/<id>`, bulk `DELETE /api/<entity>` with an id
//! list. Response envelopes are not uniform across entities (`records`,
//! `data`, or a singular key like `lead`), so every response goes through a
//! normalization step before it reaches a controller.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL};
use serde_json::{json, Map, Value};
use tracing::debug;
use url::Url;

use crate::config::CacheMode;
use crate::filter::FilterSet;
use crate::record::{EntityKind, Record, RecordId};

use super::traits::{BulkDeleteOutcome, ListPage, RecordStore, RemoteError};

/// Record store client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: Url,
    cache_mode: CacheMode,
}

impl HttpRecordStore {
    pub fn new(base_url: Url, cache_mode: CacheMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            cache_mode,
        }
    }

    /// Use a preconfigured client (proxies, TLS, default timeouts).
    pub fn with_client(client: reqwest::Client, base_url: Url, cache_mode: CacheMode) -> Self {
        Self {
            client,
            base_url,
            cache_mode,
        }
    }

    fn collection_url(&self, entity: EntityKind) -> Result<Url, RemoteError> {
        self.base_url
            .join(&format!("api/{}", entity.path()))
            .map_err(|e| RemoteError::InvalidResponse(format!("bad endpoint url: {}", e)))
    }

    fn record_url(&self, entity: EntityKind, id: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(&format!("api/{}/{}", entity.path(), id))
            .map_err(|e| RemoteError::InvalidResponse(format!("bad endpoint url: {}", e)))
    }

    fn no_store_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            // Error bodies carry `{ error }`; fall back to the status text.
            let message = match response.json::<Value>().await {
                Ok(body) => body
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

fn map_request_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network(err.to_string())
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Parse one `{ id, createdTime, ...fields }` object into a [`Record`].
pub(crate) fn record_from_value(value: &Value) -> Result<Record, RemoteError> {
    let object = value
        .as_object()
        .ok_or_else(|| RemoteError::InvalidResponse("record is not an object".into()))?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::InvalidResponse("record missing string id".into()))?
        .to_string();

    let created_time = object
        .get("createdTime")
        .and_then(Value::as_str)
        .map(str::to_string);

    let fields = object
        .iter()
        .filter(|(key, _)| key.as_str() != "id" && key.as_str() != "createdTime")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(Record {
        id: RecordId::Committed(id),
        created_time,
        fields,
    })
}

/// Normalize a bulk-load envelope. Entities disagree on the array key:
/// `records`, `data`, or the plural entity name.
pub(crate) fn list_page_from_value(
    entity: EntityKind,
    body: &Value,
) -> Result<ListPage, RemoteError> {
    let array = body
        .get("records")
        .or_else(|| body.get("data"))
        .or_else(|| body.get(entity.path()))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            RemoteError::InvalidResponse(format!("no record array in {} response", entity))
        })?;

    let records = array
        .iter()
        .map(record_from_value)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ListPage {
        records,
        from_cache: body.get("fromCache").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Normalize a mutation envelope (`{ success, <singular>: {...} }`, with
/// `record`/`data` fallbacks) down to the canonical record.
pub(crate) fn mutation_record_from_value(
    entity: EntityKind,
    body: &Value,
) -> Result<Record, RemoteError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("operation reported failure")
            .to_string();
        return Err(RemoteError::InvalidResponse(message));
    }

    let payload = body
        .get(entity.singular())
        .or_else(|| body.get("record"))
        .or_else(|| body.get("data"))
        .ok_or_else(|| {
            RemoteError::InvalidResponse(format!("no {} payload in response", entity.singular()))
        })?;

    record_from_value(payload)
}

pub(crate) fn bulk_delete_from_value(body: &Value) -> Result<BulkDeleteOutcome, RemoteError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("bulk delete reported failure")
            .to_string();
        return Err(RemoteError::InvalidResponse(message));
    }

    let deleted_ids = body
        .get("deletedIds")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Ok(BulkDeleteOutcome {
        requested: body.get("requested").and_then(Value::as_u64).unwrap_or(0) as usize,
        deleted: body
            .get("deleted")
            .and_then(Value::as_u64)
            .unwrap_or(deleted_ids.len() as u64) as usize,
        deleted_ids,
        errors: body
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn list(&self, entity: EntityKind, filters: &FilterSet) -> Result<ListPage, RemoteError> {
        let mut url = self.collection_url(entity)?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in filters.to_query() {
                query.append_pair(&key, &value);
            }
            query.append_pair("loadAll", "true");
            if self.cache_mode == CacheMode::AlwaysFresh {
                // Fresh buster per call, never computed once and reused.
                query.append_pair("_t", &epoch_millis().to_string());
                query.append_pair("skipCache", "true");
            }
        }

        debug!(entity = %entity, url = %url, "bulk load");
        let mut request = self.client.get(url);
        if self.cache_mode == CacheMode::AlwaysFresh {
            request = request.headers(Self::no_store_headers());
        }
        let response = request.send().await.map_err(map_request_error)?;
        let body = Self::read_json(response).await?;
        list_page_from_value(entity, &body)
    }

    async fn create(
        &self,
        entity: EntityKind,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let url = self.collection_url(entity)?;
        debug!(entity = %entity, "create record");
        let response = self
            .client
            .post(url)
            .json(fields)
            .send()
            .await
            .map_err(map_request_error)?;
        let body = Self::read_json(response).await?;
        mutation_record_from_value(entity, &body)
    }

    async fn update(
        &self,
        entity: EntityKind,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Record, RemoteError> {
        let url = self.record_url(entity, id)?;
        debug!(entity = %entity, id = %id, "update record");
        let response = self
            .client
            .put(url)
            .json(fields)
            .send()
            .await
            .map_err(map_request_error)?;
        let body = Self::read_json(response).await?;
        mutation_record_from_value(entity, &body)
    }

    async fn delete(&self, entity: EntityKind, id: &str) -> Result<(), RemoteError> {
        let url = self.record_url(entity, id)?;
        debug!(entity = %entity, id = %id, "delete record");
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(map_request_error)?;
        let body = Self::read_json(response).await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("delete reported failure")
                .to_string();
            return Err(RemoteError::InvalidResponse(message));
        }
        Ok(())
    }

    async fn delete_many(
        &self,
        entity: EntityKind,
        ids: &[String],
    ) -> Result<BulkDeleteOutcome, RemoteError> {
        let url = self.collection_url(entity)?;
        debug!(entity = %entity, count = ids.len(), "bulk delete");
        let response = self
            .client
            .delete(url)
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(map_request_error)?;
        let body = Self::read_json(response).await?;
        bulk_delete_from_value(&body)
    }
}
