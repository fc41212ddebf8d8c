//! Typed payloads embedded in [`crate::RoutingFrame`].

use std::collections::HashMap;

use prost::Message;
use serde::{Deserialize, Serialize};

/// `Connect` payload: identifies the instance and the modules it exposes.
#[derive(Clone, PartialEq, Message)]
pub struct ServiceInfo {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub profile: String,
    #[prost(string, tag = "3")]
    pub instance_id: String,
    #[prost(string, tag = "4")]
    pub ip: String,
    #[prost(int32, tag = "5")]
    pub port: i32,
    #[prost(string, tag = "6")]
    pub access_key: String,
    #[prost(string, repeated, tag = "7")]
    pub modules: Vec<String>,
    /// Initial extra metadata.
    #[prost(map = "string, string", tag = "8")]
    pub msg: HashMap<String, String>,
}

/// `HealthIdle` payload. `msg` becomes the stored extra metadata.
#[derive(Clone, PartialEq, Message)]
pub struct HealthIdleInfo {
    #[prost(map = "string, string", tag = "1")]
    pub msg: HashMap<String, String>,
}

/// `Active` payload.
#[derive(Clone, PartialEq, Message)]
pub struct UpServiceInfo {
    #[prost(map = "string, string", tag = "1")]
    pub msg: HashMap<String, String>,
}

/// `Disable` payload.
#[derive(Clone, PartialEq, Message)]
pub struct DownServiceInfo {
    #[prost(map = "string, string", tag = "1")]
    pub msg: HashMap<String, String>,
}

/// Whether a `ChangeService` frame replaces a module's membership or removes the module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, prost::Enumeration)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum OpsType {
    Modify = 0,
    Delete = 1,
}

/// One instance as announced to consumers.
#[derive(Clone, PartialEq, Eq, Message, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[prost(string, tag = "1")]
    pub profile: String,
    #[prost(string, tag = "2")]
    pub instance_id: String,
    #[prost(string, tag = "3")]
    pub ip: String,
    #[prost(int32, tag = "4")]
    pub port: i32,
    #[prost(bool, tag = "5")]
    pub active: bool,
}

/// `ChangeService` payload: the full current membership of one module.
#[derive(Clone, PartialEq, Message)]
pub struct ModuleInfo {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub module_name: String,
    #[prost(enumeration = "OpsType", tag = "3")]
    pub ops_type: i32,
    #[prost(message, repeated, tag = "4")]
    pub instances: Vec<InstanceInfo>,
}

impl ModuleInfo {
    /// Parsed operation type. Unknown wire values read as [`OpsType::Modify`].
    #[must_use]
    pub fn ops(&self) -> OpsType {
        OpsType::try_from(self.ops_type).unwrap_or(OpsType::Modify)
    }
}

/// Numeric codes carried by `Error` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, prost::Enumeration)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = 0,
    AccessKeyInvalid = 1,
    DuplicateRegistration = 2,
    Internal = 3,
}

/// `Error` payload.
#[derive(Clone, PartialEq, Message)]
pub struct ErrorInfo {
    #[prost(enumeration = "ErrorCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code: code as i32, message: message.into() }
    }

    /// Parsed error code. Unknown wire values read as [`ErrorCode::Unknown`].
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::try_from(self.code).unwrap_or(ErrorCode::Unknown)
    }
}
