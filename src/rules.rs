use crate::error::RuleError;
use crate::expression::{EvalContext, Expr, Value};
use crate::markup::parse_selector;
use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

const DEFAULT_RULES: &str = include_str!("../rules/publishers.yaml");

lazy_static! {
    static ref SHIPPED_RULES: RuleSet =
        RuleSet::from_yaml(DEFAULT_RULES).expect("shipped rule table is valid");
}

/// The rule table that ships with the crate.
pub fn default_rules() -> &'static RuleSet {
    &SHIPPED_RULES
}

/// A rule condition: the literal `true`, or an expression that must be truthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Always(bool),
    When(Expr),
}

impl Condition {
    pub fn matches(&self, ctx: &EvalContext<'_>) -> Result<bool, crate::error::EvalError> {
        match self {
            Condition::Always(b) => Ok(*b),
            Condition::When(expr) => Ok(expr.evaluate(ctx)?.is_truthy()),
        }
    }
}

/// What a matching rule yields.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Consequent {
    /// No consequent: continue with the next rule.
    #[default]
    FallThrough,
    /// `null` or `false`: the page belongs to no publisher.
    Exclude,
    Compute(Expr),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConsequent {
    Flag(bool),
    Text(String),
    Expr(Expr),
}

fn deserialize_consequent<'de, D>(deserializer: D) -> Result<Consequent, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawConsequent>::deserialize(deserializer)? {
        None | Some(RawConsequent::Flag(false)) => Ok(Consequent::Exclude),
        Some(RawConsequent::Flag(true)) => Err(serde::de::Error::custom(
            "consequent must be an expression, null or false",
        )),
        Some(RawConsequent::Text(text)) if text.is_empty() => Ok(Consequent::FallThrough),
        Some(RawConsequent::Text(text)) => Err(serde::de::Error::custom(format!(
            "consequent {text:?} must be an expression; use {{ type: Literal, value: ... }}"
        ))),
        Some(RawConsequent::Expr(expr)) => Ok(Consequent::Compute(expr)),
    }
}

fn serialize_consequent<S>(consequent: &Consequent, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match consequent {
        Consequent::FallThrough | Consequent::Exclude => serializer.serialize_none(),
        Consequent::Compute(expr) => expr.serialize(serializer),
    }
}

impl Consequent {
    fn is_fall_through(&self) -> bool {
        matches!(self, Consequent::FallThrough)
    }

    /// Evaluate to the raw result value. `FallThrough` yields the empty
    /// string and `Exclude` yields null.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, crate::error::EvalError> {
        match self {
            Consequent::FallThrough => Ok(Value::Str(String::new())),
            Consequent::Exclude => Ok(Value::Null),
            Consequent::Compute(expr) => expr.evaluate(ctx),
        }
    }
}

/// A lookup into the page markup: find the first node matching
/// `node_selector`, then evaluate `consequent` with that node bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomRule {
    pub node_selector: String,
    pub consequent: Expr,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomRules {
    /// Replaces the rule's consequent; requires markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<DomRule>,
    /// Descriptive only; never part of identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon_url: Option<DomRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub condition: Condition,
    #[serde(
        default,
        deserialize_with = "deserialize_consequent",
        serialize_with = "serialize_consequent",
        skip_serializing_if = "Consequent::is_fall_through"
    )]
    pub consequent: Consequent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Rule {
    fn validate(&self, index: usize) -> Result<(), RuleError> {
        let violation = |reason: String| RuleError::SchemaViolation { index, reason };

        match &self.condition {
            Condition::Always(false) => {
                return Err(violation("a literal condition must be true".to_string()))
            }
            Condition::Always(true) => {}
            Condition::When(expr) => expr.validate(false).map_err(violation)?,
        }

        if let Consequent::Compute(expr) = &self.consequent {
            expr.validate(false).map_err(violation)?;
        }

        if let Some(dom) = &self.dom {
            for (name, sub) in [("publisher", &dom.publisher), ("favicon_url", &dom.favicon_url)] {
                let Some(sub) = sub else { continue };
                parse_selector(&sub.node_selector)
                    .map_err(|e| violation(format!("dom.{name}: {e}")))?;
                sub.consequent
                    .validate(true)
                    .map_err(|e| violation(format!("dom.{name}: {e}")))?;
            }
        }

        Ok(())
    }
}

/// An ordered rule table. The first rule whose condition holds decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        for (index, rule) in rules.iter().enumerate() {
            rule.validate(index)?;
        }
        Ok(Self { rules })
    }

    pub fn from_yaml(content: &str) -> Result<Self, RuleError> {
        let rules: Vec<Rule> =
            serde_yaml::from_str(content).map_err(|e| RuleError::Parse(e.to_string()))?;
        Self::new(rules)
    }

    pub fn from_json(content: &str) -> Result<Self, RuleError> {
        let rules: Vec<Rule> =
            serde_json::from_str(content).map_err(|e| RuleError::Parse(e.to_string()))?;
        Self::new(rules)
    }

    /// Load a rule table, as JSON when the file ends in `.json` and as YAML otherwise.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let rules = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        log::info!("Loaded {} publisher rules from {}", rules.len(), path.display());
        Ok(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipped_rules_load() {
        let rules = default_rules();
        assert_eq!(rules.len(), 6);
        assert_eq!(
            rules.rules().last().unwrap().condition,
            Condition::Always(true)
        );
        assert!(rules.rules()[1].dom.as_ref().unwrap().publisher.is_some());
        assert_eq!(rules.rules()[2].consequent, Consequent::Exclude);
    }

    #[test]
    fn test_consequent_forms() {
        let yaml = r#"
- condition: true
- condition: true
  consequent: null
- condition: true
  consequent: false
- condition: true
  consequent: ""
- condition: true
  consequent: { type: Property, name: SLD }
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let consequents: Vec<_> = rules.rules().iter().map(|r| r.consequent.clone()).collect();
        assert_eq!(
            consequents,
            vec![
                Consequent::FallThrough,
                Consequent::Exclude,
                Consequent::Exclude,
                Consequent::FallThrough,
                Consequent::Compute(Expr::property("SLD")),
            ]
        );

        let err = RuleSet::from_yaml("- condition: true\n  consequent: SLD\n").unwrap_err();
        assert!(matches!(err, RuleError::Parse(_)), "{err:?}");
    }

    #[test]
    fn test_empty_consequent_falls_through() {
        let json = r#"[
            {"condition": true, "consequent": ""},
            {"condition": true, "consequent": {"type": "Literal", "value": "next"}}
        ]"#;
        let rules = RuleSet::from_json(json).unwrap();
        assert_eq!(rules.rules()[0].consequent, Consequent::FallThrough);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let cases = [
            // misspelled consequent on a deny rule
            "- condition: true\n  consequnt: null\n- condition: true\n  consequent: { type: Property, name: SLD }\n",
            "- condition: true\n  dom:\n    faviconURL:\n      node_selector: img\n      consequent: { type: NodeText }\n",
            "- condition: true\n  dom:\n    publisher:\n      nodeSelector: meta\n      consequent: { type: NodeText }\n",
        ];
        for yaml in cases {
            match RuleSet::from_yaml(yaml) {
                Err(RuleError::Parse(message)) => assert!(message.contains("unknown field"), "{message}"),
                other => panic!("expected rejection for {yaml:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_condition_is_rejected() {
        let yaml = "- consequent: { type: Property, name: SLD }\n";
        assert!(matches!(RuleSet::from_yaml(yaml), Err(RuleError::Parse(_))));
    }

    #[test]
    fn test_schema_violations() {
        let cases = [
            "- condition: false\n",
            "- condition: true\n  consequent: true\n",
            "- condition: { type: Property, name: Domain }\n",
            "- condition: true\n  consequent: { type: NodeText }\n",
            "- condition: true\n  dom:\n    publisher:\n      node_selector: 'div[[['\n      consequent: { type: NodeText }\n",
        ];
        for yaml in cases {
            match RuleSet::from_yaml(yaml) {
                Err(RuleError::SchemaViolation { index: 0, .. }) | Err(RuleError::Parse(_)) => {}
                other => panic!("expected rejection for {yaml:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::to_string(default_rules()).unwrap();
        let reloaded = RuleSet::from_json(&json).unwrap();
        assert_eq!(&reloaded, default_rules());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "- condition: true\n  consequent: { type: Property, name: SLD }\n")
            .unwrap();
        let rules = RuleSet::from_file(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(matches!(
            RuleSet::from_file(dir.path().join("missing.yaml")),
            Err(RuleError::Io(_))
        ));
    }
}
