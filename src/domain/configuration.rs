use crate::error::StrategosError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::params::ParamTree;

/// Store-assigned identifier of a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigId(pub i64);

impl fmt::Display for ConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConfigId {
    type Err = StrategosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(ConfigId)
            .map_err(|_| StrategosError::Validation(format!("invalid configuration id: {s}")))
    }
}

/// Candle bucket a strategy trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = StrategosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == needle)
            .ok_or_else(|| StrategosError::Validation(format!("unrecognized timeframe: {s}")))
    }
}

/// Strategy family the switching engine reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    Scalping,
    Momentum,
    MeanReversion,
    Breakout,
}

impl StrategyCategory {
    /// All categories ordered from lowest to highest risk
    pub const BY_RISK: [StrategyCategory; 4] = [
        StrategyCategory::MeanReversion,
        StrategyCategory::Momentum,
        StrategyCategory::Breakout,
        StrategyCategory::Scalping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyCategory::Scalping => "scalping",
            StrategyCategory::Momentum => "momentum",
            StrategyCategory::MeanReversion => "mean_reversion",
            StrategyCategory::Breakout => "breakout",
        }
    }

    /// Position in the risk ladder, 0 = lowest risk
    pub fn risk_rank(&self) -> u8 {
        match self {
            StrategyCategory::MeanReversion => 0,
            StrategyCategory::Momentum => 1,
            StrategyCategory::Breakout => 2,
            StrategyCategory::Scalping => 3,
        }
    }

    /// Categories strictly less risky than `self`, lowest risk first
    pub fn lower_risk(&self) -> impl Iterator<Item = StrategyCategory> + '_ {
        Self::BY_RISK
            .into_iter()
            .filter(move |c| c.risk_rank() < self.risk_rank())
    }

    /// Guess the category from a display name
    pub fn infer_from_name(name: &str) -> Option<StrategyCategory> {
        let name = name.to_lowercase();
        if name.contains("scalp") {
            Some(StrategyCategory::Scalping)
        } else if name.contains("momentum") || name.contains("trend") {
            Some(StrategyCategory::Momentum)
        } else if name.contains("reversion") || name.contains("range") {
            Some(StrategyCategory::MeanReversion)
        } else if name.contains("breakout") {
            Some(StrategyCategory::Breakout)
        } else {
            None
        }
    }
}

impl fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StrategyCategory {
    type Err = StrategosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::BY_RISK
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| StrategosError::Validation(format!("unknown strategy category: {s}")))
    }
}

/// Logical secret slots of a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveCategory {
    Credentials,
    ApiKeys,
    SecretKeys,
    PrivateParams,
}

impl SensitiveCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensitiveCategory::Credentials => "credentials",
            SensitiveCategory::ApiKeys => "api_keys",
            SensitiveCategory::SecretKeys => "secret_keys",
            SensitiveCategory::PrivateParams => "private_params",
        }
    }
}

impl fmt::Display for SensitiveCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ciphertext envelope produced by [`crate::crypto::CipherBox`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    pub(crate) fn new(envelope: String) -> Self {
        Self(envelope)
    }

    /// Rehydrate a blob read back from the backing store
    pub fn from_stored(envelope: impl Into<String>) -> Self {
        Self(envelope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Never print ciphertext in logs
impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.0.len())
    }
}

/// A sensitive field as returned by a read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum SensitiveField {
    /// Decrypted plaintext structure
    Plain(serde_json::Value),
    /// Read without decryption
    Sealed(EncryptedBlob),
    /// Decryption was attempted and failed for this field only
    DecryptionFailed { reason: String },
}

impl SensitiveField {
    pub fn plain(&self) -> Option<&serde_json::Value> {
        match self {
            SensitiveField::Plain(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SensitiveField::DecryptionFailed { .. })
    }
}

/// A strategy configuration as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: ConfigId,
    pub name: String,
    pub description: Option<String>,
    pub category: StrategyCategory,
    pub active: bool,
    pub assets_to_monitor: BTreeSet<String>,
    pub timeframe: Timeframe,
    pub indicators: ParamTree,
    pub entry_rules: ParamTree,
    pub exit_rules: ParamTree,
    pub risk_management: ParamTree,
    pub sensitive_fields: BTreeMap<SensitiveCategory, SensitiveField>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller input for `ConfigStore::create`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationDraft {
    pub name: String,
    pub description: Option<String>,
    /// Explicit category; inferred from the name when absent
    pub category: Option<String>,
    /// Activate atomically with creation
    pub activate: bool,
    pub assets_to_monitor: Vec<String>,
    pub timeframe: Option<String>,
    pub indicators: ParamTree,
    pub entry_rules: ParamTree,
    pub exit_rules: ParamTree,
    pub risk_management: ParamTree,
    /// Plaintext secrets, encrypted before they reach the store
    pub sensitive_fields: BTreeMap<SensitiveCategory, serde_json::Value>,
}

impl ConfigurationDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: StrategyCategory) -> Self {
        self.category = Some(category.as_str().to_string());
        self
    }

    pub fn with_timeframe(mut self, timeframe: &str) -> Self {
        self.timeframe = Some(timeframe.to_string());
        self
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets_to_monitor = assets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secret(mut self, category: SensitiveCategory, value: serde_json::Value) -> Self {
        self.sensitive_fields.insert(category, value);
        self
    }

    pub fn activated(mut self) -> Self {
        self.activate = true;
        self
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub assets_to_monitor: Option<Vec<String>>,
    pub timeframe: Option<String>,
    pub indicators: Option<ParamTree>,
    pub entry_rules: Option<ParamTree>,
    pub exit_rules: Option<ParamTree>,
    pub risk_management: Option<ParamTree>,
    /// Per-category replacement; a JSON `null` removes the secret
    pub sensitive_fields: Option<BTreeMap<SensitiveCategory, serde_json::Value>>,
}

impl ConfigurationPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.assets_to_monitor.is_none()
            && self.timeframe.is_none()
            && self.indicators.is_none()
            && self.entry_rules.is_none()
            && self.exit_rules.is_none()
            && self.risk_management.is_none()
            && self.sensitive_fields.is_none()
    }
}

/// Validated, sealed content ready for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct SealedConfiguration {
    pub name: String,
    pub description: Option<String>,
    pub category: StrategyCategory,
    pub assets_to_monitor: BTreeSet<String>,
    pub timeframe: Timeframe,
    pub indicators: ParamTree,
    pub entry_rules: ParamTree,
    pub exit_rules: ParamTree,
    pub risk_management: ParamTree,
    pub sensitive_fields: BTreeMap<SensitiveCategory, EncryptedBlob>,
}

/// A configuration row exactly as the backing store holds it
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationRecord {
    pub id: ConfigId,
    pub active: bool,
    pub content: SealedConfiguration,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationRecord {
    pub fn has_sensitive_fields(&self) -> bool {
        !self.content.sensitive_fields.is_empty()
    }

    /// Assemble the caller-facing view with already-resolved secrets
    pub fn into_configuration(
        self,
        sensitive_fields: BTreeMap<SensitiveCategory, SensitiveField>,
    ) -> Configuration {
        let c = self.content;
        Configuration {
            id: self.id,
            name: c.name,
            description: c.description,
            category: c.category,
            active: self.active,
            assets_to_monitor: c.assets_to_monitor,
            timeframe: c.timeframe,
            indicators: c.indicators,
            entry_rules: c.entry_rules,
            exit_rules: c.exit_rules,
            risk_management: c.risk_management,
            sensitive_fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
