//! Host UI flows and the surface protocol
//!
//! A flow is a privileged, host-only UI action (account chooser, consent
//! screen, document creation). Flows run on a *surface*: a process able to
//! show UI. Surfaces talk JSON over their own socket using
//! [`SurfaceEvent`] and [`SurfaceReply`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies which flow a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestCode {
    ChooseAccount,
    AuthCode,
    DownloadFile,
}

/// A flow the host asks a surface to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowRequest {
    /// Pick an account of one of the given types.
    ChooseAccount { account_types: Vec<String> },
    /// Provider-driven consent/interactive step for an account.
    Consent {
        provider_id: String,
        account_name: String,
        prompt: Value,
    },
    /// Let the user pick where to save a new document.
    CreateDocument {
        filename: String,
        content_type: String,
    },
}

impl FlowRequest {
    pub fn request_code(&self) -> RequestCode {
        match self {
            Self::ChooseAccount { .. } => RequestCode::ChooseAccount,
            Self::Consent { .. } => RequestCode::AuthCode,
            Self::CreateDocument { .. } => RequestCode::DownloadFile,
        }
    }
}

/// A flow as delivered to a surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowLaunch {
    pub request_code: RequestCode,
    #[serde(flatten)]
    pub flow: FlowRequest,
}

impl From<FlowRequest> for FlowLaunch {
    fn from(flow: FlowRequest) -> Self {
        Self {
            request_code: flow.request_code(),
            flow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultCode {
    Ok,
    Canceled,
}

/// What a surface reports when a flow finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub request_code: RequestCode,
    pub result_code: FlowResultCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl FlowResult {
    pub fn ok(request_code: RequestCode, data: Value) -> Self {
        Self {
            request_code,
            result_code: FlowResultCode::Ok,
            data: Some(data),
        }
    }

    pub fn canceled(request_code: RequestCode) -> Self {
        Self {
            request_code,
            result_code: FlowResultCode::Canceled,
            data: None,
        }
    }

    /// A string field of `data`, if the flow returned one.
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }

    fn chosen(&self, field: &str) -> Option<&str> {
        if self.result_code != FlowResultCode::Ok {
            return None;
        }
        self.data_str(field).filter(|value| !value.is_empty())
    }

    /// Account chosen by a `ChooseAccount` flow. None unless the flow
    /// completed.
    pub fn account_name(&self) -> Option<&str> {
        self.chosen("account_name")
    }

    /// Location chosen by a `CreateDocument` flow.
    pub fn document_path(&self) -> Option<&str> {
        self.chosen("path")
    }
}

/// Host → surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    FlowLaunch {
        #[serde(flatten)]
        launch: FlowLaunch,
    },
    OpenApp,
}

/// Surface → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceReply {
    FlowResult {
        #[serde(flatten)]
        result: FlowResult,
    },
}
