//! Rule data model and bulk operation types.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Rejections raised while validating tenant identifiers, rules and operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing customer id")]
    EmptyCustomerId,
    #[error("Missing or invalid rule name")]
    EmptyRuleName,
    #[error("Field 'ip' must be a valid IP address")]
    InvalidIp(String),
    #[error("{0} operation requires a rule name")]
    MissingRuleName(OperationKind),
    #[error("{0} operation requires rule data")]
    MissingRuleData(OperationKind),
}

/// Identifier of the tenant that owns rules and rate limit counters.
///
/// Always non-empty; there is no way to build one from a blank string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyCustomerId);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CustomerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

impl FromStr for CustomerId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expiry of a rule as carried on the wire.
///
/// An absent field, an explicit `null` and a timestamp are three different
/// requests: on update, `Unset` keeps the stored expiry, `Clear` removes it and
/// `At` replaces it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expiry {
    /// Field absent.
    #[default]
    Unset,
    /// Field present and `null`.
    Clear,
    /// Field present with a timestamp.
    At(DateTime<Utc>),
}

impl Expiry {
    pub fn is_unset(&self) -> bool {
        matches!(self, Expiry::Unset)
    }

    /// The timestamp, if one was given.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::At(ts) => Some(*ts),
            Expiry::Unset | Expiry::Clear => None,
        }
    }
}

impl From<Option<DateTime<Utc>>> for Expiry {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Expiry::Clear, Expiry::At)
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expiry::At(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Expiry::Unset | Expiry::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Only reached when the field is present; absence is handled by `#[serde(default)]`.
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(Expiry::Clear),
            Some(raw) => parse_timestamp(&raw)
                .map(Expiry::At)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}

/// Accepts RFC 3339 timestamps and naive ISO-8601 timestamps, the latter read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A single rule as submitted by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleData {
    pub name: String,
    pub description: String,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Expiry::is_unset")]
    pub expired_date: Expiry,
}

impl RuleData {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ip: ip.into(),
            expired_date: Expiry::Unset,
        }
    }

    pub fn with_expiry(mut self, expired_date: Expiry) -> Self {
        self.expired_date = expired_date;
        self
    }

    /// Check that the name is non-blank and the IP parses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_rule_name(&self.name)?;
        self.ip
            .parse::<IpAddr>()
            .map_err(|_| ValidationError::InvalidIp(self.ip.clone()))?;
        Ok(())
    }
}

pub(crate) fn validate_rule_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyRuleName);
    }
    Ok(())
}

/// Kind of a bulk sub-operation.
///
/// Read as `create`/`update`/`delete`, reported as `CREATE`/`UPDATE`/`DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[serde(alias = "CREATE")]
    Create,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for OperationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// One logical operation inside a bulk request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleOperation {
    pub operation: OperationKind,
    #[serde(deserialize_with = "string_or_number")]
    pub customer_id: String,
    #[serde(default)]
    pub rule_name: Option<String>,
    #[serde(default)]
    pub rule_data: Option<RuleData>,
}

impl RuleOperation {
    pub fn create(customer_id: impl Into<String>, rule_data: RuleData) -> Self {
        Self {
            operation: OperationKind::Create,
            customer_id: customer_id.into(),
            rule_name: None,
            rule_data: Some(rule_data),
        }
    }

    pub fn update(customer_id: impl Into<String>, rule_data: RuleData) -> Self {
        Self {
            operation: OperationKind::Update,
            customer_id: customer_id.into(),
            rule_name: None,
            rule_data: Some(rule_data),
        }
    }

    pub fn delete(customer_id: impl Into<String>, rule_name: impl Into<String>) -> Self {
        Self {
            operation: OperationKind::Delete,
            customer_id: customer_id.into(),
            rule_name: Some(rule_name.into()),
            rule_data: None,
        }
    }

    /// Delete needs a rule name; create and update need rule data.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.operation {
            OperationKind::Delete => match &self.rule_name {
                Some(name) => validate_rule_name(name),
                None => Err(ValidationError::MissingRuleName(self.operation)),
            },
            OperationKind::Create | OperationKind::Update => match &self.rule_data {
                Some(_) => Ok(()),
                None => Err(ValidationError::MissingRuleData(self.operation)),
            },
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Ordered batch of operations. Response order follows this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkRequest {
    pub operations: Vec<RuleOperation>,
}

impl BulkRequest {
    pub fn new(operations: Vec<RuleOperation>) -> Self {
        Self { operations }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSuccess {
    pub operation: OperationKind,
    pub customer_id: String,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationFailure {
    pub operation: OperationKind,
    pub customer_id: String,
    pub error: String,
}

/// Result of one bulk sub-operation, tagged with its originating operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Success(OperationSuccess),
    Failure(OperationFailure),
}

impl OperationOutcome {
    pub fn success(operation: &RuleOperation, result: serde_json::Value) -> Self {
        OperationOutcome::Success(OperationSuccess {
            operation: operation.operation,
            customer_id: operation.customer_id.clone(),
            result,
        })
    }

    pub fn failure(operation: &RuleOperation, error: impl Into<String>) -> Self {
        OperationOutcome::Failure(OperationFailure {
            operation: operation.operation,
            customer_id: operation.customer_id.clone(),
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success(_))
    }
}

/// Outcomes of a bulk request split by success, each side in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkResponse {
    pub successful: Vec<OperationSuccess>,
    pub errors: Vec<OperationFailure>,
}

impl BulkResponse {
    pub fn len(&self) -> usize {
        self.successful.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<OperationOutcome> for BulkResponse {
    fn from_iter<I: IntoIterator<Item = OperationOutcome>>(iter: I) -> Self {
        let mut response = BulkResponse::default();
        for outcome in iter {
            match outcome {
                OperationOutcome::Success(success) => response.successful.push(success),
                OperationOutcome::Failure(failure) => response.errors.push(failure),
            }
        }
        response
    }
}
