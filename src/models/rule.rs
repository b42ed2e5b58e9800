// Guard conditions for synchronous transitions

//! # Guard Rules
//!
//! Synchronous transitions carry a guard condition that must hold against the
//! live process data before a decision crossing them can be consumed. This
//! module defines those conditions as data so that process definitions can be
//! loaded from JSON and evaluated without any scripting runtime.
//!
//! ## Key Concepts
//!
//! - **Rule**: A single evaluatable condition with an ID and description
//! - **RuleCondition**: The actual logic - field checks, logical operations, etc.
//! - **RuleEvaluationResult**: Detailed results of rule evaluation for debugging
//!
//! ## Data Lookup Order
//!
//! Every field check looks in the *workflow-relevant data* first and then in
//! the *application-relevant data* (a JSON object). Workflow data is where
//! process input parameters are bound, so it shadows application data.
//!
//! ## Rust Learning Notes:
//!
//! ### Recursive Enums
//! The `RuleCondition` enum is recursive - `And` and `Or` variants contain
//! vectors of `Rule` structs, which themselves contain `RuleCondition` enums.
//!
//! ### Serde Tag for JSON Serialization
//! The `#[serde(tag = "type")]` attribute creates "tagged union" JSON:
//! `{"type": "FieldEquals", "field": "status", "value": "approved"}`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Workflow-relevant data of a process: named values used by guards and
/// bound from process input parameters.
pub type DataMap = HashMap<String, serde_json::Value>;

/// A single rule that can be evaluated against process data
///
/// ```
/// use waypoint::models::Rule;
///
/// let rule = Rule::field_equals("approved", "status", serde_json::json!("approved"));
/// assert_eq!(rule.id, "approved");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for this rule
    pub id: String,

    /// Human-readable description of what this rule checks
    pub description: String,

    /// The actual condition logic to evaluate
    pub condition: RuleCondition,
}

/// Different types of conditions that can be evaluated
///
/// ## Rust Learning Notes:
///
/// ### Box<Rule> for Recursion
/// The `Not` variant uses `Box<Rule>` because Rust enums must have a known size.
/// Since `Rule` contains `RuleCondition` which contains `Rule`, we need `Box`
/// to break the infinite size chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuleCondition {
    /// Always passes. Handy for sync transitions that only need ordering.
    Always,

    /// Check if a field exists (regardless of value)
    ///
    /// Example: `{"type": "FieldExists", "field": "reviewer"}`
    FieldExists { field: String },

    /// Check if a field has a specific value (exact JSON equality)
    ///
    /// Example: `{"type": "FieldEquals", "field": "status", "value": "approved"}`
    FieldEquals {
        field: String,
        value: serde_json::Value,
    },

    /// Check if a numeric field is greater than a threshold
    ///
    /// Non-numeric fields fail this check.
    FieldGreaterThan { field: String, value: f64 },

    /// Check if a numeric field is less than a threshold
    FieldLessThan { field: String, value: f64 },

    /// Check if a string field contains a substring (case-sensitive)
    FieldContains { field: String, substring: String },

    /// Logical AND - all nested rules must pass. Empty vector is true.
    And { rules: Vec<Rule> },

    /// Logical OR - at least one nested rule must pass. Empty vector is false.
    Or { rules: Vec<Rule> },

    /// Logical NOT - nested rule must fail for this to pass
    Not { rule: Box<Rule> },
}

/// Detailed results of rule evaluation
#[derive(Debug, Clone)]
pub struct RuleEvaluationResult {
    /// ID of the rule that was evaluated
    pub rule_id: String,

    /// Whether the overall rule evaluation passed
    pub passed: bool,

    /// Detailed results for each sub-rule (for And/Or/Not conditions)
    /// Format: (rule_id, passed)
    pub sub_results: Vec<(String, bool)>,

    /// Human-readable explanation of the result
    pub explanation: String,
}

/// Look a field up in workflow data, then in application data
fn lookup<'a>(
    field: &str,
    workflow: &'a DataMap,
    application: &'a serde_json::Value,
) -> Option<&'a serde_json::Value> {
    workflow.get(field).or_else(|| application.get(field))
}

impl Rule {
    /// Evaluate this rule against process data
    ///
    /// ## Parameters
    /// - `workflow`: workflow-relevant data of the process
    /// - `application`: application-relevant data (JSON object, may be null)
    pub fn evaluate(&self, workflow: &DataMap, application: &serde_json::Value) -> bool {
        self.condition.evaluate(workflow, application)
    }

    /// Get detailed evaluation results for debugging
    pub fn evaluate_detailed(
        &self,
        workflow: &DataMap,
        application: &serde_json::Value,
    ) -> RuleEvaluationResult {
        let passed = self.evaluate(workflow, application);
        let (sub_results, explanation) = self.condition.evaluate_detailed(workflow, application);

        RuleEvaluationResult {
            rule_id: self.id.clone(),
            passed,
            sub_results,
            explanation,
        }
    }
}

impl RuleCondition {
    /// Evaluate the condition against process data
    ///
    /// ## Rust Learning Notes:
    ///
    /// ### Pattern Matching on Enums
    /// The `match` expression handles each variant of the enum differently.
    /// Rust ensures we handle all variants - if we add a new condition type,
    /// the compiler will force us to add a case here.
    pub fn evaluate(&self, workflow: &DataMap, application: &serde_json::Value) -> bool {
        match self {
            RuleCondition::Always => true,

            RuleCondition::FieldExists { field } => lookup(field, workflow, application).is_some(),

            RuleCondition::FieldEquals { field, value } => {
                lookup(field, workflow, application) == Some(value)
            }

            RuleCondition::FieldGreaterThan { field, value } => lookup(field, workflow, application)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v > *value),

            RuleCondition::FieldLessThan { field, value } => lookup(field, workflow, application)
                .and_then(|v| v.as_f64())
                .map_or(false, |v| v < *value),

            RuleCondition::FieldContains { field, substring } => lookup(field, workflow, application)
                .and_then(|v| v.as_str())
                .map_or(false, |v| v.contains(substring.as_str())),

            RuleCondition::And { rules } => rules.iter().all(|rule| rule.evaluate(workflow, application)),

            RuleCondition::Or { rules } => rules.iter().any(|rule| rule.evaluate(workflow, application)),

            RuleCondition::Not { rule } => !rule.evaluate(workflow, application),
        }
    }

    /// Returns a tuple of (sub_results, explanation) for detailed reports
    fn evaluate_detailed(
        &self,
        workflow: &DataMap,
        application: &serde_json::Value,
    ) -> (Vec<(String, bool)>, String) {
        match self {
            RuleCondition::Always => (vec![], "Always passes".to_string()),

            RuleCondition::FieldExists { field } => {
                let explanation = if lookup(field, workflow, application).is_some() {
                    format!("Field '{}' exists", field)
                } else {
                    format!("Field '{}' does not exist", field)
                };
                (vec![], explanation)
            }

            RuleCondition::FieldEquals { field, value } => {
                let explanation = if lookup(field, workflow, application) == Some(value) {
                    format!("Field '{}' equals {:?}", field, value)
                } else {
                    format!("Field '{}' does not equal {:?}", field, value)
                };
                (vec![], explanation)
            }

            RuleCondition::FieldGreaterThan { field, value } => {
                let explanation = match lookup(field, workflow, application).and_then(|v| v.as_f64()) {
                    Some(v) if v > *value => format!("Field '{}' ({}) > {}", field, v, value),
                    Some(v) => format!("Field '{}' ({}) <= {}", field, v, value),
                    None => format!("Field '{}' is not a number", field),
                };
                (vec![], explanation)
            }

            RuleCondition::FieldLessThan { field, value } => {
                let explanation = match lookup(field, workflow, application).and_then(|v| v.as_f64()) {
                    Some(v) if v < *value => format!("Field '{}' ({}) < {}", field, v, value),
                    Some(v) => format!("Field '{}' ({}) >= {}", field, v, value),
                    None => format!("Field '{}' is not a number", field),
                };
                (vec![], explanation)
            }

            RuleCondition::FieldContains { field, substring } => {
                let explanation = match lookup(field, workflow, application).and_then(|v| v.as_str()) {
                    Some(v) if v.contains(substring.as_str()) => {
                        format!("Field '{}' contains '{}'", field, substring)
                    }
                    Some(_) => format!("Field '{}' does not contain '{}'", field, substring),
                    None => format!("Field '{}' is not a string", field),
                };
                (vec![], explanation)
            }

            RuleCondition::And { rules } | RuleCondition::Or { rules } => {
                let sub_results: Vec<(String, bool)> = rules
                    .iter()
                    .map(|rule| (rule.id.clone(), rule.evaluate(workflow, application)))
                    .collect();
                let label = if matches!(self, RuleCondition::And { .. }) { "AND" } else { "OR" };
                let explanation = format!(
                    "{}: {} of {} rules passed",
                    label,
                    sub_results.iter().filter(|(_, passed)| *passed).count(),
                    sub_results.len()
                );
                (sub_results, explanation)
            }

            RuleCondition::Not { rule } => {
                let passed = rule.evaluate(workflow, application);
                let explanation = format!(
                    "NOT: nested rule '{}' {}",
                    rule.id,
                    if passed { "passed (so NOT fails)" } else { "failed (so NOT passes)" }
                );
                (vec![(rule.id.clone(), !passed)], explanation)
            }
        }
    }
}

// Builder methods for easier rule construction
impl Rule {
    /// A rule that always passes
    pub fn always(id: &str) -> Self {
        Rule {
            id: id.to_string(),
            description: "Always passes".to_string(),
            condition: RuleCondition::Always,
        }
    }

    /// Create a simple field exists rule
    ///
    /// ```
    /// use waypoint::models::Rule;
    ///
    /// let rule = Rule::field_exists("has_reviewer", "reviewer");
    /// ```
    pub fn field_exists(id: &str, field: &str) -> Self {
        Rule {
            id: id.to_string(),
            description: format!("Field '{}' must exist", field),
            condition: RuleCondition::FieldExists {
                field: field.to_string(),
            },
        }
    }

    /// Create a simple field equals rule
    pub fn field_equals(id: &str, field: &str, value: serde_json::Value) -> Self {
        Rule {
            id: id.to_string(),
            description: format!("Field '{}' must equal {:?}", field, value),
            condition: RuleCondition::FieldEquals {
                field: field.to_string(),
                value,
            },
        }
    }

    /// Create a field greater than rule
    pub fn field_greater_than(id: &str, field: &str, value: f64) -> Self {
        Rule {
            id: id.to_string(),
            description: format!("Field '{}' must be greater than {}", field, value),
            condition: RuleCondition::FieldGreaterThan {
                field: field.to_string(),
                value,
            },
        }
    }

    /// Create an AND combination of rules
    pub fn and(id: &str, description: &str, rules: Vec<Rule>) -> Self {
        Rule {
            id: id.to_string(),
            description: description.to_string(),
            condition: RuleCondition::And { rules },
        }
    }

    /// Create an OR combination of rules
    pub fn or(id: &str, description: &str, rules: Vec<Rule>) -> Self {
        Rule {
            id: id.to_string(),
            description: description.to_string(),
            condition: RuleCondition::Or { rules },
        }
    }

    /// Create a NOT rule
    pub fn not(id: &str, description: &str, rule: Rule) -> Self {
        Rule {
            id: id.to_string(),
            description: description.to_string(),
            condition: RuleCondition::Not {
                rule: Box::new(rule),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_exists_rule() {
        let rule = Rule::field_exists("has_reviewer", "reviewer");

        // Present in workflow data
        let mut workflow = DataMap::new();
        workflow.insert("reviewer".to_string(), json!("alice"));
        assert!(rule.evaluate(&workflow, &json!({})));

        // Present in application data only
        let empty = DataMap::new();
        assert!(rule.evaluate(&empty, &json!({"reviewer": "bob"})));

        // Nowhere, and null application data
        assert!(!rule.evaluate(&empty, &serde_json::Value::Null));
    }

    #[test]
    fn test_workflow_data_shadows_application_data() {
        let rule = Rule::field_equals("approved", "status", json!("approved"));

        let mut workflow = DataMap::new();
        workflow.insert("status".to_string(), json!("pending"));
        let application = json!({"status": "approved"});

        assert!(!rule.evaluate(&workflow, &application));
        assert!(rule.evaluate(&DataMap::new(), &application));
    }

    #[test]
    fn test_logical_combinations() {
        let rule = Rule::and(
            "ready",
            "Ready to ship",
            vec![
                Rule::field_greater_than("paid", "amount", 0.0),
                Rule::not(
                    "not_blocked",
                    "Not blocked",
                    Rule::field_equals("blocked", "blocked", json!(true)),
                ),
            ],
        );

        let mut workflow = DataMap::new();
        workflow.insert("amount".to_string(), json!(12.5));
        assert!(rule.evaluate(&workflow, &json!({})));

        workflow.insert("blocked".to_string(), json!(true));
        assert!(!rule.evaluate(&workflow, &json!({})));

        let either = Rule::or("either", "Either", vec![]);
        assert!(!either.evaluate(&workflow, &json!({})));
        assert!(Rule::always("t").evaluate(&workflow, &json!({})));
    }

    #[test]
    fn test_detailed_evaluation() {
        let rule = Rule::and(
            "complex_approval",
            "Complex approval logic",
            vec![
                Rule::field_exists("has_content", "content"),
                Rule::field_equals("status_approved", "status", json!("approved")),
            ],
        );

        let mut workflow = DataMap::new();
        workflow.insert("content".to_string(), json!("Hello world"));
        workflow.insert("status".to_string(), json!("pending"));

        let result = rule.evaluate_detailed(&workflow, &json!({}));

        assert_eq!(result.rule_id, "complex_approval");
        assert!(!result.passed);
        assert_eq!(result.sub_results.len(), 2);
        assert!(result.sub_results[0].1);
        assert!(!result.sub_results[1].1);
        assert_eq!(result.explanation, "AND: 1 of 2 rules passed");
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "amount_ok",
            "description": "Amount under limit",
            "condition": {"type": "FieldLessThan", "field": "amount", "value": 100.0}
        }))
        .unwrap();

        let mut workflow = DataMap::new();
        workflow.insert("amount".to_string(), json!(42));
        assert!(rule.evaluate(&workflow, &json!({})));
    }
}
