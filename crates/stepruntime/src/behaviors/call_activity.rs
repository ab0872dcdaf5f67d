use super::{execute_activity, ActivityBehavior};
use crate::ops::OpContext;
use async_trait::async_trait;
use std::collections::HashMap;
use stepcore::events::ExecutionId;
use stepcore::{props, DefinitionError, EngineError, Result};

/// Call activity: starts another process definition as a called instance
/// linked through the super-execution back-reference. Variables cross the
/// boundary only through the declared `in`/`out` mappings.
pub struct CallActivityBehavior;

#[async_trait]
impl ActivityBehavior for CallActivityBehavior {
    async fn execute(&self, ctx: &mut OpContext<'_>, execution: ExecutionId) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, execution)?;
        let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!("execution '{}' is not at an activity", execution))
        })?;
        let activity = def.find_activity(&activity_id)?;
        let called = activity
            .property(props::CALLED_ELEMENT)
            .ok_or_else(|| DefinitionError::DanglingReference {
                activity: activity_id.clone(),
                reference: props::CALLED_ELEMENT.to_string(),
            })?
            .to_string();
        let called_definition = env.definition(&called)?.definition.clone();

        let visible = ctx.tree.visible_variables(execution);
        let mut sub_variables = HashMap::new();
        for (target, source) in parse_mappings(activity.property(props::IN_MAPPINGS)) {
            if let Some(value) = visible.get(&source) {
                sub_variables.insert(target, value.clone());
            }
        }

        tracing::info!(
            "call activity '{}' starts process '{}'",
            activity_id,
            called
        );
        ctx.tree.get_mut(execution)?.is_active = false;
        let sub_root = ctx.tree.start_instance(&called, execution, sub_variables);
        execute_activity(ctx, sub_root, &called_definition.initial)
    }

    /// Applies the declared output mappings from the ending (or abandoned)
    /// called instance onto the calling execution. Invoked once per
    /// crossed instance boundary, before any error handler runs.
    fn completing(
        &self,
        ctx: &mut OpContext<'_>,
        super_execution: ExecutionId,
        sub_instance: ExecutionId,
    ) -> Result<()> {
        let env = ctx.env;
        let def = env.definition_of(ctx.tree, super_execution)?;
        let activity_id = ctx.tree.get(super_execution)?.activity.clone().ok_or_else(|| {
            EngineError::Invariant(format!(
                "calling execution '{}' is not at an activity",
                super_execution
            ))
        })?;
        let activity = def.find_activity(&activity_id)?;

        let sub_root = ctx.tree.process_instance_root(sub_instance)?;
        let sub_variables = ctx.tree.visible_variables(sub_root);
        for (target, source) in parse_mappings(activity.property(props::OUT_MAPPINGS)) {
            if let Some(value) = sub_variables.get(&source) {
                ctx.tree
                    .set_variable(super_execution, &target, value.clone())?;
            }
        }
        Ok(())
    }
}

/// Parses `target=source;...` mapping declarations; a bare name maps a
/// variable onto itself.
fn parse_mappings(raw: Option<&str>) -> Vec<(String, String)> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(';')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match entry.split_once('=') {
                Some((target, source)) => {
                    Some((target.trim().to_string(), source.trim().to_string()))
                }
                None => Some((entry.to_string(), entry.to_string())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_mappings;

    #[test]
    fn parses_pairs_and_bare_names() {
        let mappings = parse_mappings(Some("result=subResult; total ;x=y"));
        assert_eq!(
            mappings,
            vec![
                ("result".to_string(), "subResult".to_string()),
                ("total".to_string(), "total".to_string()),
                ("x".to_string(), "y".to_string()),
            ]
        );
    }

    #[test]
    fn none_yields_nothing() {
        assert!(parse_mappings(None).is_empty());
    }
}
