use async_trait::async_trait;
use std::collections::HashMap;
use stepcore::{
    BusinessError, DelegateContext, DelegateError, DelegateOutput, ServiceDelegate, Value,
};

/// Writes a fixed set of variables when the activity executes.
pub struct SetVariablesDelegate {
    variables: HashMap<String, Value>,
}

impl SetVariablesDelegate {
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self { variables }
    }

    pub fn single(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut variables = HashMap::new();
        variables.insert(name.into(), value.into());
        Self { variables }
    }
}

#[async_trait]
impl ServiceDelegate for SetVariablesDelegate {
    async fn execute(&self, _ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        Ok(DelegateOutput {
            variables: self.variables.clone(),
        })
    }
}

/// Logs the execution's visible variables.
pub struct LogDelegate;

#[async_trait]
impl ServiceDelegate for LogDelegate {
    async fn execute(&self, ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        tracing::info!("activity '{}' executing", ctx.activity);
        for (name, value) in &ctx.variables {
            tracing::info!("  {}: {:?}", name, value);
        }
        Ok(DelegateOutput::new())
    }
}

/// Raises a declared business error with the configured code. Stands in
/// for any delegate that signals a structured process error.
pub struct ThrowErrorDelegate {
    code: String,
    message: Option<String>,
}

impl ThrowErrorDelegate {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
impl ServiceDelegate for ThrowErrorDelegate {
    async fn execute(&self, _ctx: DelegateContext) -> Result<DelegateOutput, DelegateError> {
        let error = match &self.message {
            Some(message) => BusinessError::with_message(self.code.clone(), message.clone()),
            None => BusinessError::new(self.code.clone()),
        };
        Err(DelegateError::Business(error))
    }
}
