//! Construction options for a sibling and the creation request built from them.

use crate::error::{Result, WorkerError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Options as supplied by the caller, not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    pub name: Option<String>,
    pub r#type: Option<String>,
    pub credentials: Option<String>,
}

impl WorkerOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, script_type: impl Into<String>) -> Self {
        self.r#type = Some(script_type.into());
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Validate enumerated fields. Nothing is sent for an invalid value.
    pub fn validate(&self) -> Result<CreateOptions> {
        Ok(CreateOptions {
            name: self.name.clone(),
            script_type: self.r#type.as_deref().map(str::parse).transpose()?,
            credentials: self.credentials.as_deref().map(str::parse).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Module,
    Classic,
}

impl FromStr for ScriptType {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "module" => Ok(ScriptType::Module),
            "classic" => Ok(ScriptType::Classic),
            other => Err(WorkerError::InvalidOption {
                field: "type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    SameOrigin,
    Include,
}

impl FromStr for Credentials {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "omit" => Ok(Credentials::Omit),
            "same-origin" => Ok(Credentials::SameOrigin),
            "include" => Ok(Credentials::Include),
            other => Err(WorkerError::InvalidOption {
                field: "credentials",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub script_type: Option<ScriptType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Body of the creation request on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub id: String,
    #[serde(rename = "scriptRef")]
    pub script_ref: String,
    pub options: CreateOptions,
}

/// Body of a successful (201) creation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub channel: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
