//! Operation registry backing `tools/list` and `tools/call`.
//!
//! Each operation is registered once at startup as an [`OperationDescriptor`]
//! (name, description, JSON schema, handler). The registry is read-only after
//! construction and is shared by every protocol-server instance.

use crate::error::ToolError;
use futures::future::BoxFuture;
use futures::FutureExt;
use rmcp::model::{JsonObject, Tool};
use rmcp::schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Future returned by an operation handler.
pub type OperationFuture = BoxFuture<'static, Result<Value, ToolError>>;

/// Validates the payload and, if it passes, starts the handler.
type Handler = Arc<dyn Fn(Value) -> Result<OperationFuture, String> + Send + Sync>;

/// Semantic checks that the JSON schema alone cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Operation already registered: {0}")]
    DuplicateOperation(String),
}

/// Failure of [`OperationRegistry::invoke`]. The three cases stay distinct so
/// the protocol layer can report them differently.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error(transparent)]
    Handler(#[from] ToolError),
}

/// Static description of one callable operation.
pub struct OperationDescriptor {
    name: &'static str,
    description: &'static str,
    input_schema: Arc<JsonObject>,
    handler: Handler,
}

impl std::fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl OperationDescriptor {
    /// Build a descriptor from a typed parameter struct and an async handler.
    ///
    /// The schema is derived from `P`; payloads are deserialized into `P` and
    /// validated before `handler` runs.
    pub fn new<P, R, F, Fut>(name: &'static str, description: &'static str, handler: F) -> Self
    where
        P: DeserializeOwned + JsonSchema + Validate + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload: Value| -> Result<OperationFuture, String> {
            let params: P = serde_json::from_value(payload).map_err(|e| e.to_string())?;
            params.validate()?;
            let fut = handler(params);
            Ok(async move {
                let result = fut.await?;
                Ok::<Value, ToolError>(serde_json::to_value(result)?)
            }
            .boxed())
        });

        Self {
            name,
            description,
            input_schema: Arc::new(schema_object::<P>()),
            handler,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn input_schema(&self) -> &Arc<JsonObject> {
        &self.input_schema
    }

    /// MCP tool advertisement for this operation.
    pub fn to_tool(&self) -> Tool {
        Tool::new(self.name, self.description, self.input_schema.clone())
    }
}

/// JSON schema of `T` as an object, without the `$schema` key some clients reject.
fn schema_object<T: JsonSchema>() -> JsonObject {
    match serde_json::to_value(schema_for!(T)) {
        Ok(Value::Object(mut map)) => {
            map.remove("$schema");
            map
        }
        _ => {
            let mut map = JsonObject::new();
            map.insert("type".to_string(), Value::String("object".to_string()));
            map
        }
    }
}

/// Named operations, in registration order.
#[derive(Default)]
pub struct OperationRegistry {
    operations: Vec<OperationDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation. Names must be unique.
    pub fn register(&mut self, descriptor: OperationDescriptor) -> Result<(), RegistryError> {
        if self.index.contains_key(descriptor.name) {
            return Err(RegistryError::DuplicateOperation(
                descriptor.name.to_string(),
            ));
        }
        self.index.insert(descriptor.name, self.operations.len());
        self.operations.push(descriptor);
        Ok(())
    }

    /// All descriptors, for capability advertisement.
    pub fn list(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Look up, validate and run one operation.
    pub async fn invoke(&self, name: &str, payload: Value) -> Result<Value, InvokeError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| InvokeError::MethodNotFound(name.to_string()))?;
        let payload = if payload.is_null() {
            Value::Object(JsonObject::new())
        } else {
            payload
        };
        let fut = (descriptor.handler)(payload).map_err(InvokeError::InvalidParams)?;
        Ok(fut.await?)
    }
}
