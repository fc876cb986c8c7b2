//! Invocation hooks: callbacks around each call and the error transformer.

use crate::error::{ApplicationError, BridgeError};
use crate::lock;
use crate::types::{MethodDef, Type};
use crate::value::Value;
use std::sync::{Arc, Mutex};

/// Observer of invocations made while a context item of its registered type
/// is present.
pub trait InvocationCallback: Send + Sync {
    fn pre_invoke(
        &self,
        _context: &Value,
        _target: Option<&Value>,
        _method: &MethodDef,
        _args: &[Value],
    ) -> Result<(), ApplicationError> {
        Ok(())
    }

    fn post_invoke(
        &self,
        _context: &Value,
        _target: Option<&Value>,
        _method: &MethodDef,
        _result: &Value,
    ) -> Result<(), ApplicationError> {
        Ok(())
    }

    fn on_error(
        &self,
        _context: &Value,
        _target: Option<&Value>,
        _method: &MethodDef,
        _error: &BridgeError,
    ) {
    }
}

/// Maps an application error before it is reported.
pub trait ExceptionTransformer: Send + Sync {
    fn transform(&self, error: ApplicationError) -> ApplicationError;
}

impl<F> ExceptionTransformer for F
where
    F: Fn(ApplicationError) -> ApplicationError + Send + Sync,
{
    fn transform(&self, error: ApplicationError) -> ApplicationError {
        self(error)
    }
}

/// Reports application errors unchanged.
pub struct IdentityTransformer;

impl ExceptionTransformer for IdentityTransformer {
    fn transform(&self, error: ApplicationError) -> ApplicationError {
        error
    }
}

type Registered = (Arc<dyn InvocationCallback>, Type);

#[derive(Default)]
pub struct CallbackController {
    callbacks: Mutex<Vec<Registered>>,
}

fn same_callback(a: &Arc<dyn InvocationCallback>, b: &Arc<dyn InvocationCallback>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl CallbackController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: Arc<dyn InvocationCallback>, context_type: &Type) {
        lock(&self.callbacks).push((callback, context_type.clone()));
    }

    pub fn unregister(&self, callback: &Arc<dyn InvocationCallback>, context_type: &Type) {
        lock(&self.callbacks).retain(|(cb, ty)| !(same_callback(cb, callback) && ty == context_type));
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.callbacks).is_empty()
    }

    /// Callbacks interested in `context`, snapshotted so none run under the lock.
    fn matching(&self, context: &Value) -> Vec<Arc<dyn InvocationCallback>> {
        let Some(ty) = context.runtime_type() else {
            return Vec::new();
        };
        lock(&self.callbacks)
            .iter()
            .filter(|(_, context_type)| context_type.is_assignable_from(&ty))
            .map(|(cb, _)| Arc::clone(cb))
            .collect()
    }

    pub fn pre_invoke(
        &self,
        context: &[Value],
        target: Option<&Value>,
        method: &MethodDef,
        args: &[Value],
    ) -> Result<(), ApplicationError> {
        for item in context {
            for callback in self.matching(item) {
                callback.pre_invoke(item, target, method, args)?;
            }
        }
        Ok(())
    }

    pub fn post_invoke(
        &self,
        context: &[Value],
        target: Option<&Value>,
        method: &MethodDef,
        result: &Value,
    ) -> Result<(), ApplicationError> {
        for item in context {
            for callback in self.matching(item) {
                callback.post_invoke(item, target, method, result)?;
            }
        }
        Ok(())
    }

    pub fn on_error(
        &self,
        context: &[Value],
        target: Option<&Value>,
        method: &MethodDef,
        error: &BridgeError,
    ) {
        for item in context {
            for callback in self.matching(item) {
                callback.on_error(item, target, method, error);
            }
        }
    }
}
