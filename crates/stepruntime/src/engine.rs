use crate::behaviors::{self, BehaviorRegistry};
use crate::instance::{activity_instance_tree, ActivityInstanceNode};
use crate::locks::RootLocks;
use crate::ops::{self, DefinitionEntry, Environment, OpContext};
use crate::reachability::ReachabilityIndex;
use crate::tree::{ExecutionTree, ProcessState};
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::events::{EngineEvent, EventBus, ExecutionId};
use stepcore::{
    ConditionEvaluator, EngineError, ExecutionListener, JmespathConditionEvaluator, ListenerPhase,
    ProcessDefinition, Result, ServiceDelegate, TransactionContext, Value,
};
use tokio::sync::{broadcast, Mutex, RwLock};

/// Configuration for the engine facade.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
        }
    }
}

/// Handle returned when a process instance is started.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub instance: ExecutionId,
    pub state: ProcessState,
}

/// Embedding facade of the execution kernel: definition registry,
/// collaborator registration, chain triggering and state queries.
///
/// Each process-instance tree sits behind its own mutex; only one
/// externally-triggered operation chain mutates a given tree at a time.
/// Domain concurrency is data in the tree, never runtime parallelism.
pub struct Engine {
    events: EventBus,
    environment: RwLock<Environment>,
    instances: RwLock<HashMap<ExecutionId, Arc<Mutex<ExecutionTree>>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            events: EventBus::new(config.event_buffer_size),
            environment: RwLock::new(Environment {
                definitions: HashMap::new(),
                behaviors: Arc::new(BehaviorRegistry::standard()),
                delegates: HashMap::new(),
                listeners: HashMap::new(),
                conditions: Arc::new(JmespathConditionEvaluator),
                transaction: Arc::new(stepcore::AlwaysActive),
                locks: Arc::new(RootLocks::new()),
            }),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Validates and registers a process definition, precomputing its
    /// reachability index.
    pub async fn register_definition(&self, definition: ProcessDefinition) -> Result<()> {
        definition.validate()?;
        tracing::info!("registering process definition '{}'", definition.key);
        let reachability = Arc::new(ReachabilityIndex::build(&definition));
        let mut environment = self.environment.write().await;
        environment.definitions.insert(
            definition.key.clone(),
            DefinitionEntry {
                definition: Arc::new(definition),
                reachability,
            },
        );
        Ok(())
    }

    pub async fn register_delegate(&self, name: &str, delegate: Arc<dyn ServiceDelegate>) {
        tracing::info!("registering delegate '{}'", name);
        self.environment
            .write()
            .await
            .delegates
            .insert(name.to_string(), delegate);
    }

    pub async fn register_listener(
        &self,
        definition_key: &str,
        activity: &str,
        phase: ListenerPhase,
        listener: Arc<dyn ExecutionListener>,
    ) {
        self.environment
            .write()
            .await
            .listeners
            .entry((definition_key.to_string(), activity.to_string()))
            .or_default()
            .push((phase, listener));
    }

    pub async fn set_condition_evaluator(&self, evaluator: Arc<dyn ConditionEvaluator>) {
        self.environment.write().await.conditions = evaluator;
    }

    pub async fn set_transaction_context(&self, transaction: Arc<dyn TransactionContext>) {
        self.environment.write().await.transaction = transaction;
    }

    /// Registers a custom behavior table in place of the standard one.
    pub async fn set_behavior_registry(&self, behaviors: BehaviorRegistry) {
        self.environment.write().await.behaviors = Arc::new(behaviors);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Starts a process instance and runs the triggered operation chain to
    /// quiescence.
    pub async fn start_process(
        &self,
        definition_key: &str,
        variables: HashMap<String, Value>,
    ) -> Result<ProcessHandle> {
        let environment = self.environment.read().await.clone();
        let initial = environment
            .definition(definition_key)?
            .definition
            .initial
            .clone();
        tracing::info!("starting process '{}'", definition_key);

        let (mut tree, root) =
            ExecutionTree::new_process_instance(self.events.clone(), definition_key, variables);
        let outcome = {
            let mut ctx = OpContext::new(&mut tree, &environment);
            match behaviors::execute_activity(&mut ctx, root, &initial) {
                Ok(()) => ops::drain(&mut ctx).await,
                Err(err) => Err(err),
            }
        };
        let state = tree.state().clone();
        self.instances
            .write()
            .await
            .insert(root, Arc::new(Mutex::new(tree)));
        outcome?;
        Ok(ProcessHandle {
            instance: root,
            state,
        })
    }

    /// Resumes a waiting execution: merges the given variables, signals
    /// the activity's behavior and drains the resulting chain.
    pub async fn signal(
        &self,
        instance: ExecutionId,
        execution: ExecutionId,
        variables: HashMap<String, Value>,
    ) -> Result<ProcessState> {
        let environment = self.environment.read().await.clone();
        let tree = self.instance_tree(instance).await?;
        let mut tree = tree.lock().await;
        {
            let mut ctx = OpContext::new(&mut tree, &environment);
            let activity_id = ctx.tree.get(execution)?.activity.clone().ok_or_else(|| {
                EngineError::Execution(format!(
                    "execution '{}' is not waiting at an activity",
                    execution
                ))
            })?;
            for (name, value) in variables {
                ctx.tree.set_variable(execution, &name, value)?;
            }
            let definition = environment.definition_of(ctx.tree, execution)?;
            let kind = definition.find_activity(&activity_id)?.behavior;
            let behavior = environment.behaviors.get(kind)?.clone();
            behavior.signal(&mut ctx, execution, "signal", None).await?;
            ops::drain(&mut ctx).await?;
        }
        Ok(tree.state().clone())
    }

    /// Cancels a process-instance tree. Cancellation is tree mutation:
    /// executions are removed, subscriptions die with them.
    pub async fn cancel_process(&self, instance: ExecutionId) -> Result<()> {
        let tree = self.instance_tree(instance).await?;
        let mut tree = tree.lock().await;
        tracing::info!("cancelling process instance '{}'", instance);
        tree.cancel()
    }

    pub async fn process_state(&self, instance: ExecutionId) -> Result<ProcessState> {
        let tree = self.instance_tree(instance).await?;
        let tree = tree.lock().await;
        Ok(tree.state().clone())
    }

    /// Derived activity-instance tree of a process instance.
    pub async fn activity_instances(&self, instance: ExecutionId) -> Result<ActivityInstanceNode> {
        let tree = self.instance_tree(instance).await?;
        let tree = tree.lock().await;
        activity_instance_tree(&tree, instance)
    }

    /// Executions (across the whole instance hierarchy) currently
    /// positioned at the given activity.
    pub async fn executions_at(
        &self,
        instance: ExecutionId,
        activity: &str,
    ) -> Result<Vec<ExecutionId>> {
        let tree = self.instance_tree(instance).await?;
        let tree = tree.lock().await;
        Ok(tree
            .executions()
            .filter(|e| e.activity.as_deref() == Some(activity))
            .map(|e| e.id)
            .collect())
    }

    pub async fn variable(
        &self,
        instance: ExecutionId,
        execution: ExecutionId,
        name: &str,
    ) -> Result<Option<Value>> {
        let tree = self.instance_tree(instance).await?;
        let tree = tree.lock().await;
        Ok(tree.variable(execution, name).cloned())
    }

    pub async fn variables(
        &self,
        instance: ExecutionId,
        execution: ExecutionId,
    ) -> Result<HashMap<String, Value>> {
        let tree = self.instance_tree(instance).await?;
        let tree = tree.lock().await;
        Ok(tree.visible_variables(execution))
    }

    async fn instance_tree(&self, instance: ExecutionId) -> Result<Arc<Mutex<ExecutionTree>>> {
        self.instances
            .read()
            .await
            .get(&instance)
            .cloned()
            .ok_or_else(|| {
                EngineError::Execution(format!("unknown process instance '{}'", instance))
            })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
