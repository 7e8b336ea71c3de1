//! Service registry: maps case-sensitive `"Service.Method"` names to
//! invocation thunks.
//!
//! Handlers are assembled with [`ServiceHandler`], whose builder enforces
//! the one-request/one-reply/one-error method shape through its trait
//! bounds; what the source runtime checked with reflection is checked here
//! by the compiler, leaving only name uniqueness to verify at registration
//! time.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::RpcError;

type Thunk = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// One registered method: the full dotted name plus the typed invocation
/// thunk. Created at registration, never mutated afterwards.
pub struct MethodDescriptor {
    service_method: String,
    thunk: Thunk,
}

impl MethodDescriptor {
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Runs the handler behind a fault boundary: a panic inside the thunk
    /// becomes a call-level `Handler` error and never reaches the dispatch
    /// loop.
    pub fn invoke(&self, params: Value) -> Result<Value, RpcError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.thunk)(params))) {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(message)) => Err(RpcError::handler(message)),
            Err(payload) => Err(RpcError::handler(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("service_method", &self.service_method)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "opaque panic payload"
    }
}

/// Builder for the exported method set of one service.
///
/// Every method has the fixed shape `Fn(Req) -> Result<Rep, E>` with
/// serde-expressible request and reply types. Duplicate method names are
/// recorded and rejected when the handler is registered.
#[derive(Default)]
pub struct ServiceHandler {
    methods: BTreeMap<String, Thunk>,
    duplicate: Option<String>,
}

impl ServiceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<Req, Rep, E, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned,
        Rep: Serialize,
        E: fmt::Display,
        F: Fn(Req) -> Result<Rep, E> + Send + Sync + 'static,
    {
        let name = name.into();
        let thunk: Thunk = Arc::new(move |params: Value| {
            let request: Req = serde_json::from_value(params)
                .map_err(|err| format!("invalid request payload: {err}"))?;
            let reply = handler(request).map_err(|err| err.to_string())?;
            serde_json::to_value(reply).map_err(|err| format!("unencodable reply: {err}"))
        });
        if self.methods.insert(name.clone(), thunk).is_some() {
            self.duplicate = Some(name);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[derive(Default)]
struct Tables {
    services: HashSet<String>,
    methods: HashMap<String, Arc<MethodDescriptor>>,
}

/// Thread-safe name-to-descriptor table. Lookups may run concurrently with
/// ongoing registration; an entry is either fully published or absent.
#[derive(Default)]
pub struct Registry {
    tables: RwLock<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `handler`'s methods under `"{name}.{method}"`. Fails
    /// without side effects on an empty or already-taken service name, a
    /// handler with zero methods, or a duplicated method name.
    pub fn register(&self, name: &str, handler: ServiceHandler) -> Result<(), RpcError> {
        if name.is_empty() {
            return Err(RpcError::registration("service name must not be empty"));
        }
        if let Some(duplicate) = handler.duplicate {
            return Err(RpcError::registration(format!(
                "service {name} defines method {duplicate} twice"
            )));
        }
        if handler.methods.is_empty() {
            return Err(RpcError::registration(format!(
                "service {name} exposes no methods"
            )));
        }

        let mut tables = self.tables.write().expect("registry lock poisoned");
        if tables.services.contains(name) {
            return Err(RpcError::registration(format!(
                "service {name} is already registered"
            )));
        }
        tables.services.insert(name.to_string());
        for (method, thunk) in handler.methods {
            let service_method = format!("{name}.{method}");
            tables.methods.insert(
                service_method.clone(),
                Arc::new(MethodDescriptor {
                    service_method,
                    thunk,
                }),
            );
        }
        Ok(())
    }

    pub fn lookup(&self, service_method: &str) -> Result<Arc<MethodDescriptor>, RpcError> {
        self.tables
            .read()
            .expect("registry lock poisoned")
            .methods
            .get(service_method)
            .cloned()
            .ok_or_else(|| RpcError::not_found(service_method))
    }

    /// Lookup plus invocation; the dispatch loop's single entry point.
    pub fn dispatch(&self, service_method: &str, params: Value) -> Result<Value, RpcError> {
        self.lookup(service_method)?.invoke(params)
    }
}
