//! Local arguments: parameters filled from the transport context rather than
//! from the request.
//!
//! A method may declare, say, a `Session` parameter; when a resolver is
//! registered for `Session`, that parameter is not counted in the method's
//! wire arity and is supplied from the first context item of the resolver's
//! context type.

use crate::error::{ApplicationError, UnmarshalError};
use crate::lock;
use crate::types::Type;
use crate::value::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub trait LocalArgResolver: Send + Sync {
    fn resolve(&self, context: &Value) -> Result<Value, ApplicationError>;
}

impl<F> LocalArgResolver for F
where
    F: Fn(&Value) -> Result<Value, ApplicationError> + Send + Sync,
{
    fn resolve(&self, context: &Value) -> Result<Value, ApplicationError> {
        self(context)
    }
}

struct Registration {
    arg_type: Type,
    context_type: Type,
    resolver: Arc<dyn LocalArgResolver>,
}

#[derive(Default)]
pub struct LocalArgRegistry {
    resolvers: Mutex<Vec<Registration>>,
}

impl LocalArgRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve parameters of `arg_type` from context items of `context_type`.
    /// A later registration for the same pair replaces the earlier one.
    pub fn register(&self, arg_type: &Type, context_type: &Type, resolver: Arc<dyn LocalArgResolver>) {
        let mut resolvers = lock(&self.resolvers);
        resolvers.retain(|r| !(r.arg_type == *arg_type && r.context_type == *context_type));
        debug!("Registering local arg resolver {} <- {}", arg_type, context_type);
        resolvers.push(Registration {
            arg_type: arg_type.clone(),
            context_type: context_type.clone(),
            resolver,
        });
    }

    pub fn unregister(&self, arg_type: &Type, context_type: &Type) {
        lock(&self.resolvers)
            .retain(|r| !(r.arg_type == *arg_type && r.context_type == *context_type));
    }

    pub fn is_local_arg(&self, ty: &Type) -> bool {
        lock(&self.resolvers).iter().any(|r| r.arg_type == *ty)
    }

    /// Number of parameters a caller has to send.
    pub fn wire_arity(&self, params: &[Type]) -> usize {
        params.iter().filter(|p| !self.is_local_arg(p)).count()
    }

    /// Fill a parameter of `ty` from the first suitable context item.
    pub fn resolve(&self, context: &[Value], ty: &Type) -> Result<Value, UnmarshalError> {
        let candidates: Vec<(Type, Arc<dyn LocalArgResolver>)> = lock(&self.resolvers)
            .iter()
            .filter(|r| r.arg_type == *ty)
            .map(|r| (r.context_type.clone(), Arc::clone(&r.resolver)))
            .collect();

        for item in context {
            let Some(item_type) = item.runtime_type() else {
                continue;
            };
            for (context_type, resolver) in &candidates {
                if context_type.is_assignable_from(&item_type) {
                    return resolver.resolve(item).map_err(|e| {
                        UnmarshalError::LocalArg {
                            type_name: ty.name().to_string(),
                        }
                        .within(e.to_string())
                    });
                }
            }
        }
        Err(UnmarshalError::LocalArg {
            type_name: ty.name().to_string(),
        })
    }
}
