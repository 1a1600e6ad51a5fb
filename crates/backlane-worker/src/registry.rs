//! Handler registry: maps handler keys to executable bindings.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::JobError;
use crate::handler::{JobHandler, payload_type_of};

/// A decoded payload whose concrete type is known only to its binding.
pub type ErasedPayload = Box<dyn Any + Send>;

type DecodeFn = dyn Fn(Value) -> Result<ErasedPayload, serde_json::Error> + Send + Sync;
type InvokeFn =
    dyn Fn(ErasedPayload, CancellationToken) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync;

/// Everything needed to run a job of one handler type.
pub struct HandlerBinding {
    handler_type: &'static str,
    payload_type: &'static str,
    decode: Box<DecodeFn>,
    invoke: Box<InvokeFn>,
}

impl HandlerBinding {
    /// Capture `handler` with its payload decoder and invocation thunk.
    pub fn new<H: JobHandler>(handler: H) -> Self {
        let handler = Arc::new(handler);

        let decode: Box<DecodeFn> = Box::new(|value: Value| {
            serde_json::from_value::<H::Payload>(value).map(|p| Box::new(p) as ErasedPayload)
        });

        let invoke: Box<InvokeFn> = Box::new(move |payload: ErasedPayload, cancel: CancellationToken| {
            let handler = Arc::clone(&handler);
            async move {
                let payload = payload.downcast::<H::Payload>().map_err(|_| {
                    JobError::HandlerResolution {
                        handler_type: H::handler_type().to_string(),
                        reason: "decoded payload has an unexpected type".to_string(),
                    }
                })?;
                handler
                    .execute(*payload, cancel)
                    .await
                    .map_err(JobError::Execution)
            }
            .boxed()
        });

        Self {
            handler_type: H::handler_type(),
            payload_type: payload_type_of::<H>(),
            decode,
            invoke,
        }
    }

    /// Handler key.
    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Payload type the handler accepts.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Decode a stored payload.
    pub fn decode(&self, payload: Value) -> Result<ErasedPayload, JobError> {
        (self.decode)(payload).map_err(|source| JobError::PayloadDecode {
            payload_type: self.payload_type.to_string(),
            source,
        })
    }

    /// Run the handler with a payload produced by [`Self::decode`].
    pub async fn invoke(
        &self,
        payload: ErasedPayload,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        (self.invoke)(payload, cancel).await
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("handler_type", &self.handler_type)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}

/// Registered handler bindings keyed by handler type.
///
/// Append-only: a key, once bound, is never replaced or removed.
#[derive(Default)]
pub struct HandlerRegistry {
    bindings: DashMap<String, Arc<HandlerBinding>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler under its [`JobHandler::handler_type`] key.
    pub fn register<H: JobHandler>(&self, handler: H) -> Result<(), JobError> {
        let key = H::handler_type();
        if key.trim().is_empty() {
            return Err(JobError::Configuration(
                "Handler type key must not be empty".to_string(),
            ));
        }

        match self.bindings.entry(key.to_string()) {
            Entry::Occupied(_) => Err(JobError::Configuration(format!(
                "A handler is already registered for '{key}'"
            ))),
            Entry::Vacant(slot) => {
                let binding = HandlerBinding::new(handler);
                info!(
                    handler_type = key,
                    payload_type = binding.payload_type(),
                    "Registered job handler"
                );
                slot.insert(Arc::new(binding));
                Ok(())
            }
        }
    }

    /// Look up the binding for a stored handler key.
    pub fn resolve(&self, handler_type: &str) -> Result<Arc<HandlerBinding>, JobError> {
        self.bindings
            .get(handler_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| JobError::HandlerResolution {
                handler_type: handler_type.to_string(),
                reason: "no handler is registered under this key".to_string(),
            })
    }

    /// Whether a handler is bound to `handler_type`.
    pub fn contains(&self, handler_type: &str) -> bool {
        self.bindings.contains_key(handler_type)
    }

    /// Registered handler keys.
    pub fn handler_types(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_types", &self.handler_types())
            .finish()
    }
}
