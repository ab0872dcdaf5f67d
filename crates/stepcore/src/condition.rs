use crate::error::EngineError;
use crate::Value;
use std::collections::HashMap;

/// Evaluates a transition's stored guard expression against an execution's
/// visible variables. Pluggable so embedders can bring their own expression
/// language.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<bool, EngineError>;
}

/// Default evaluator: guard expressions are JMESPath over the variable
/// scope rendered as a JSON object; the search result's truthiness decides
/// the transition.
pub struct JmespathConditionEvaluator;

impl ConditionEvaluator for JmespathConditionEvaluator {
    fn evaluate(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<bool, EngineError> {
        let compiled = jmespath::compile(expression).map_err(|e| {
            EngineError::Condition(format!("invalid guard expression '{}': {}", expression, e))
        })?;

        let context = serde_json::Value::Object(
            variables
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        );

        let result = compiled.search(context).map_err(|e| {
            EngineError::Condition(format!("guard expression '{}' failed: {}", expression, e))
        })?;

        let passed = result.is_truthy();
        tracing::debug!("guard '{}' evaluated to {}", expression, passed);
        Ok(passed)
    }
}
