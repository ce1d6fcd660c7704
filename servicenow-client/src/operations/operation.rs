//! Single-record CRUD operations.
//!
//! An [`Operation`] is convenience sugar: at the protocol level a batch
//! carries generic [`SubRequest`](super::batch::SubRequest)s, and
//! [`Operation::into_sub_request`] is where the sugar dissolves into that
//! generic form.

use reqwest::Method;
use serde_json::Value;

use super::batch::SubRequest;
use crate::constants::TABLE_API_PREFIX;
use crate::error::ApiError;

/// A single CRUD operation against a table record.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert a new record.
    Create { table: String, data: Value },
    /// Patch fields on an existing record.
    Update {
        table: String,
        sys_id: String,
        data: Value,
    },
    /// Remove a record.
    Delete { table: String, sys_id: String },
    /// Fetch a record.
    Get { table: String, sys_id: String },
}

impl Operation {
    pub fn create(table: impl Into<String>, data: Value) -> Self {
        Self::Create {
            table: table.into(),
            data,
        }
    }

    pub fn update(table: impl Into<String>, sys_id: impl Into<String>, data: Value) -> Self {
        Self::Update {
            table: table.into(),
            sys_id: sys_id.into(),
            data,
        }
    }

    pub fn delete(table: impl Into<String>, sys_id: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            sys_id: sys_id.into(),
        }
    }

    pub fn get(table: impl Into<String>, sys_id: impl Into<String>) -> Self {
        Self::Get {
            table: table.into(),
            sys_id: sys_id.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Create { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Get { table, .. } => table,
        }
    }

    pub fn http_method(&self) -> Method {
        match self {
            Self::Create { .. } => Method::POST,
            Self::Update { .. } => Method::PATCH,
            Self::Delete { .. } => Method::DELETE,
            Self::Get { .. } => Method::GET,
        }
    }

    /// Table API path for this operation.
    pub fn path(&self) -> String {
        match self {
            Self::Create { table, .. } => format!("{TABLE_API_PREFIX}/{table}"),
            Self::Update { table, sys_id, .. }
            | Self::Delete { table, sys_id }
            | Self::Get { table, sys_id } => {
                format!("{TABLE_API_PREFIX}/{table}/{sys_id}")
            }
        }
    }

    /// Lower this operation into the generic sub-request it stands for.
    pub fn into_sub_request(self, id: impl Into<String>) -> Result<SubRequest, ApiError> {
        let method = self.http_method();
        let path = self.path();
        let sub_request = SubRequest::new(id, method, path).with_header("Accept", "application/json");
        match self {
            Self::Create { data, .. } | Self::Update { data, .. } => {
                sub_request.with_json_body(&data)
            }
            Self::Delete { .. } | Self::Get { .. } => Ok(sub_request),
        }
    }
}
