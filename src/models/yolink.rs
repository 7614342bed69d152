use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Result code of a successful API call
pub const SUCCESS_CODE: &str = "000000";

pub const METHOD_GET_DEVICE_LIST: &str = "Home.getDeviceList";
pub const METHOD_GET_GENERAL_INFO: &str = "Home.getGeneralInfo";

// ==================================================================================================
// Request Models
// ==================================================================================================

/// Request body sent to the API gate (BSDP)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
        }
    }

    /// Add a top-level field next to `method`
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

// ==================================================================================================
// Response Models
// ==================================================================================================

/// Response envelope returned by the API gate (BRDP)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msgid: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Fail with the embedded code when the call did not succeed
    pub fn check_response(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        Err(Error::ApiApplication {
            code: self.code.clone(),
            message: self
                .desc
                .clone()
                .unwrap_or_else(|| "no description".to_string()),
        })
    }

    /// Devices listed in `data.devices`, if any
    pub fn devices(&self) -> &[Value] {
        self.data
            .as_ref()
            .and_then(|d| d.get("devices"))
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
