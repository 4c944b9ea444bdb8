//! Records returned by the service. The client never mutates these locally,
//! so every field is lenient: missing values decode to their defaults and
//! unknown fields are ignored.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub email: String,
    pub timezone: String,
    pub credits_left: Option<i64>,
    pub created: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Check {
    pub ident: String,
    pub name: String,
    pub protocol: String,
    pub resource: String,
    pub method: String,
    pub interval: u32,
    pub target: f64,
    pub regions: Vec<String>,
    pub up_codes: String,
    pub up_confirmations_threshold: u32,
    pub down_confirmations_threshold: u32,
    pub last_status: Option<i64>,
    pub last_status_code: String,
    pub last_status_duration: String,
    pub created: String,
    pub updated: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub ident: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub alias: String,
    pub handle: String,
    pub verified: bool,
    pub used: String,
    pub created: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Incident {
    pub ident: String,
    pub check_ident: String,
    pub state: String,
    pub note: String,
    pub opened: String,
    pub resolved: String,
}

/// Body for `POST /checks` and `PUT /checks/{id}`. Unset fields are omitted
/// so an update only touches what was given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_codes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_confirmations_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_confirmations_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}
