use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::types::Sequence;
use crate::events::NewGameEvent;
use crate::service::{ErrorCategory, EventQuery};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub category: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ErrorBody {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            category: category.as_str(),
            field: None,
            index: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestBatchRequest {
    pub events: Vec<NewGameEvent>,
}

/// Query-string form of [`EventQuery`]; `types` is comma separated.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQueryParams {
    pub table_id: Option<String>,
    pub hand_id: Option<String>,
    pub user_id: Option<String>,
    pub types: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}

impl From<EventQueryParams> for EventQuery {
    fn from(params: EventQueryParams) -> Self {
        let types = params
            .types
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|ty| !ty.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        EventQuery {
            table_id: params.table_id,
            hand_id: params.hand_id,
            user_id: params.user_id,
            types,
            start_time: params.start_time,
            end_time: params.end_time,
            limit: params.limit,
            offset: params.offset,
            cursor: params.cursor,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub start_sequence: Option<Sequence>,
}

#[derive(Debug, Deserialize)]
pub struct CursorUpdateRequest {
    pub position: i64,
}
