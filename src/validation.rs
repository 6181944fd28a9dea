//! Input validation for configuration drafts and patches
//!
//! Every check collects its problems instead of stopping at the first one,
//! so a caller gets the full list in a single `Validation` error.
use crate::domain::{
    ConfigurationDraft, ConfigurationPatch, EncryptedBlob, ParamSection, ParamTree,
    SealedConfiguration, SensitiveCategory, StrategyCategory, Timeframe,
};
use crate::error::{Result, StrategosError};
use std::collections::{BTreeMap, BTreeSet};

const MAX_NAME_LEN: usize = 120;
const MAX_ASSET_LEN: usize = 32;
pub const DEFAULT_TIMEFRAME: Timeframe = Timeframe::H1;

/// Validated content of a configuration, before secrets are sealed
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedContent {
    pub name: String,
    pub description: Option<String>,
    pub category: StrategyCategory,
    pub assets_to_monitor: BTreeSet<String>,
    pub timeframe: Timeframe,
    pub indicators: ParamTree,
    pub entry_rules: ParamTree,
    pub exit_rules: ParamTree,
    pub risk_management: ParamTree,
}

impl ValidatedContent {
    /// Attach sealed secrets to produce the persisted shape
    pub fn seal(
        self,
        sensitive_fields: BTreeMap<SensitiveCategory, EncryptedBlob>,
    ) -> SealedConfiguration {
        SealedConfiguration {
            name: self.name,
            description: self.description,
            category: self.category,
            assets_to_monitor: self.assets_to_monitor,
            timeframe: self.timeframe,
            indicators: self.indicators,
            entry_rules: self.entry_rules,
            exit_rules: self.exit_rules,
            risk_management: self.risk_management,
            sensitive_fields,
        }
    }
}

/// Validate a display name
pub fn validate_name(name: &str, errors: &mut Vec<String>) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        errors.push("name cannot be empty".to_string());
    } else if trimmed.chars().count() > MAX_NAME_LEN {
        errors.push(format!("name exceeds {MAX_NAME_LEN} characters"));
    }
    trimmed.to_string()
}

/// Parse a timeframe string, defaulting to one hour when absent
pub fn validate_timeframe(raw: Option<&str>, errors: &mut Vec<String>) -> Timeframe {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_TIMEFRAME,
        Some(s) => s.parse().unwrap_or_else(|_| {
            errors.push(format!(
                "timeframe '{s}' is not one of {}",
                Timeframe::ALL.map(|t| t.as_str()).join(", ")
            ));
            DEFAULT_TIMEFRAME
        }),
    }
}

/// Explicit category wins; otherwise infer from the name
pub fn validate_category(
    explicit: Option<&str>,
    name: &str,
    errors: &mut Vec<String>,
) -> StrategyCategory {
    if let Some(raw) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return raw.parse().unwrap_or_else(|_| {
            errors.push(format!("unknown strategy category '{raw}'"));
            StrategyCategory::MeanReversion
        });
    }
    StrategyCategory::infer_from_name(name).unwrap_or_else(|| {
        errors.push(format!(
            "category missing and cannot be inferred from name '{}'",
            name.trim()
        ));
        StrategyCategory::MeanReversion
    })
}

/// Upper-case, trim and de-duplicate asset symbols
pub fn validate_assets(assets: &[String], errors: &mut Vec<String>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for raw in assets {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            errors.push("asset symbol cannot be empty".to_string());
            continue;
        }
        if symbol.len() > MAX_ASSET_LEN
            || !symbol
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.'))
        {
            errors.push(format!("invalid asset symbol '{raw}'"));
            continue;
        }
        out.insert(symbol);
    }
    out
}

fn validate_trees(trees: [(ParamSection, &ParamTree); 4], errors: &mut Vec<String>) {
    for (section, tree) in trees {
        errors.extend(section.validate(tree));
    }
}

fn finish<T>(value: T, errors: Vec<String>) -> Result<T> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(StrategosError::Validation(errors.join("; ")))
    }
}

/// Validate a creation draft
pub fn validate_draft(draft: &ConfigurationDraft) -> Result<ValidatedContent> {
    let mut errors = Vec::new();

    let name = validate_name(&draft.name, &mut errors);
    let category = validate_category(draft.category.as_deref(), &name, &mut errors);
    let timeframe = validate_timeframe(draft.timeframe.as_deref(), &mut errors);
    let assets_to_monitor = validate_assets(&draft.assets_to_monitor, &mut errors);
    validate_trees(
        [
            (ParamSection::Indicators, &draft.indicators),
            (ParamSection::EntryRules, &draft.entry_rules),
            (ParamSection::ExitRules, &draft.exit_rules),
            (ParamSection::RiskManagement, &draft.risk_management),
        ],
        &mut errors,
    );

    finish(
        ValidatedContent {
            name,
            description: normalize_description(draft.description.as_deref()),
            category,
            assets_to_monitor,
            timeframe,
            indicators: draft.indicators.clone(),
            entry_rules: draft.entry_rules.clone(),
            exit_rules: draft.exit_rules.clone(),
            risk_management: draft.risk_management.clone(),
        },
        errors,
    )
}

/// Merge a patch over existing content and validate the result.
///
/// Sensitive fields are not handled here; the store seals them separately.
pub fn validate_patch(
    existing: &SealedConfiguration,
    patch: &ConfigurationPatch,
) -> Result<ValidatedContent> {
    let mut errors = Vec::new();

    let name = match &patch.name {
        Some(n) => validate_name(n, &mut errors),
        None => existing.name.clone(),
    };
    let category = match &patch.category {
        Some(c) => validate_category(Some(c), &name, &mut errors),
        None => existing.category,
    };
    let timeframe = match &patch.timeframe {
        Some(t) => validate_timeframe(Some(t), &mut errors),
        None => existing.timeframe,
    };
    let assets_to_monitor = match &patch.assets_to_monitor {
        Some(a) => validate_assets(a, &mut errors),
        None => existing.assets_to_monitor.clone(),
    };
    let description = match &patch.description {
        Some(d) => normalize_description(Some(d)),
        None => existing.description.clone(),
    };

    let pick = |new: &Option<ParamTree>, old: &ParamTree| new.clone().unwrap_or_else(|| old.clone());
    let indicators = pick(&patch.indicators, &existing.indicators);
    let entry_rules = pick(&patch.entry_rules, &existing.entry_rules);
    let exit_rules = pick(&patch.exit_rules, &existing.exit_rules);
    let risk_management = pick(&patch.risk_management, &existing.risk_management);

    validate_trees(
        [
            (ParamSection::Indicators, &indicators),
            (ParamSection::EntryRules, &entry_rules),
            (ParamSection::ExitRules, &exit_rules),
            (ParamSection::RiskManagement, &risk_management),
        ],
        &mut errors,
    );

    finish(
        ValidatedContent {
            name,
            description,
            category,
            assets_to_monitor,
            timeframe,
            indicators,
            entry_rules,
            exit_rules,
            risk_management,
        },
        errors,
    )
}

/// Null, empty objects and empty strings carry no secret
pub fn is_empty_secret(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn normalize_description(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draft_defaults_and_normalization() {
        let draft = ConfigurationDraft::new("  Trend rider ")
            .with_assets(["btc", " eth ", "BTC"]);
        let content = validate_draft(&draft).unwrap();

        assert_eq!(content.name, "Trend rider");
        assert_eq!(content.category, StrategyCategory::Momentum);
        assert_eq!(content.timeframe, Timeframe::H1);
        assert_eq!(
            content.assets_to_monitor.into_iter().collect::<Vec<_>>(),
            vec!["BTC".to_string(), "ETH".to_string()]
        );
    }

    #[test]
    fn test_draft_collects_all_errors() {
        let mut draft = ConfigurationDraft::new("   ").with_timeframe("2h");
        draft.risk_management = ParamTree::from_value(json!({"position_size_pct": 250.0}));

        let err = validate_draft(&draft).unwrap_err();
        let StrategosError::Validation(msg) = err else {
            panic!("expected validation error");
        };
        assert!(msg.contains("name cannot be empty"));
        assert!(msg.contains("timeframe '2h'"));
        assert!(msg.contains("category missing"));
        assert!(msg.contains("risk_management"));
    }

    #[test]
    fn test_explicit_category_overrides_name() {
        let draft = ConfigurationDraft::new("Scalper").with_category(StrategyCategory::Breakout);
        assert_eq!(
            validate_draft(&draft).unwrap().category,
            StrategyCategory::Breakout
        );

        let mut bad = ConfigurationDraft::new("Scalper");
        bad.category = Some("arbitrage".into());
        assert!(validate_draft(&bad).is_err());
    }

    #[test]
    fn test_invalid_asset_symbol_rejected() {
        let draft = ConfigurationDraft::new("Scalper").with_assets(["BTC", "bad symbol!"]);
        assert!(matches!(
            validate_draft(&draft),
            Err(StrategosError::Validation(_))
        ));
    }

    #[test]
    fn test_patch_merges_over_existing() {
        let existing = validate_draft(
            &ConfigurationDraft::new("Range keeper").with_assets(["SOL"]),
        )
        .unwrap()
        .seal(Default::default());

        let patch = ConfigurationPatch {
            timeframe: Some("15m".into()),
            description: Some("tighter".into()),
            ..Default::default()
        };
        let merged = validate_patch(&existing, &patch).unwrap();
        assert_eq!(merged.name, "Range keeper");
        assert_eq!(merged.category, StrategyCategory::MeanReversion);
        assert_eq!(merged.timeframe, Timeframe::M15);
        assert_eq!(merged.description.as_deref(), Some("tighter"));
        assert!(merged.assets_to_monitor.contains("SOL"));

        let bad = ConfigurationPatch {
            exit_rules: Some(ParamTree::from_value(json!({"foo": 1.0}))),
            ..Default::default()
        };
        assert!(validate_patch(&existing, &bad).is_err());
    }

    #[test]
    fn test_empty_secret_detection() {
        assert!(is_empty_secret(&json!(null)));
        assert!(is_empty_secret(&json!({})));
        assert!(is_empty_secret(&json!("")));
        assert!(!is_empty_secret(&json!({"key": "abc"})));
        assert!(!is_empty_secret(&json!(["a"])));
    }
}
