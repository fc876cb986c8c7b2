//! Request dispatch: parse, rewire, resolve, invoke, encode.

use super::{Bridge, ObjectKey};
use crate::config::DispatchConfig;
use crate::error::{BridgeError, Result};
use crate::fixup::rewire;
use crate::lock;
use crate::protocol::{RpcRequest, RpcResponse};
use crate::resolver::{method_map, resolve_method, unmarshal_args};
use crate::types::MethodDef;
use crate::value::Value;
use crate::wire::WireNode;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Class and method tokens of an encoded method name, plus the handle id of
/// an `.obj[<id>]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MethodTarget {
    class_name: String,
    method_name: String,
    handle: Option<u64>,
}

impl MethodTarget {
    fn parse(encoded: &str) -> Self {
        let mut tokens = encoded.split('.').filter(|t| !t.is_empty());
        let class_name = tokens.next().unwrap_or_default().to_string();
        let method_name = tokens.next().unwrap_or_default().to_string();
        Self {
            class_name,
            method_name,
            handle: handle_id(encoded),
        }
    }
}

fn handle_id(encoded: &str) -> Option<u64> {
    if !encoded.starts_with(DispatchConfig::OBJECT_METHOD_PREFIX) {
        return None;
    }
    let start = encoded.find('[')?;
    let end = encoded.find(']')?;
    if start >= end {
        return None;
    }
    encoded[start + 1..end].parse().ok()
}

/// Where a resolved call goes.
struct Invocation {
    target: Option<Value>,
    method: Arc<MethodDef>,
}

impl Bridge {
    /// Handle one request. Every failure becomes an error response; nothing
    /// is propagated to the caller.
    pub fn dispatch(&self, context: &[Value], request: &serde_json::Value) -> RpcResponse {
        let id = request
            .get("id")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let request = match RpcRequest::parse(request) {
            Ok(request) => request,
            Err(e) => {
                error!("Rejected request: {}", e);
                return RpcResponse::from_error(id, &e);
            }
        };
        debug!(
            "Call {} with {} fixups, id {}",
            request.method,
            request.fixups.len(),
            request.id
        );

        let params = request.params.clone();
        let response = match rewire(request.params, &request.fixups) {
            Ok(params) => self.call(context, &request.method, &params, request.id.clone()),
            Err(e) => {
                error!("Error applying fixups: {}", e);
                RpcResponse::from_error(request.id.clone(), &BridgeError::Fixup(e))
            }
        };
        params.dismantle();
        response
    }

    /// Parse a request line and dispatch it. Unparseable text is answered
    /// with a parse error.
    pub fn dispatch_str(&self, context: &[Value], line: &str) -> RpcResponse {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(request) => self.dispatch(context, &request),
            Err(e) => RpcResponse::from_error(
                serde_json::Value::Null,
                &BridgeError::Parse(e.to_string()),
            ),
        }
    }

    fn call(
        &self,
        context: &[Value],
        encoded: &str,
        params: &WireNode,
        id: serde_json::Value,
    ) -> RpcResponse {
        let target = MethodTarget::parse(encoded);
        if target.handle.is_none() && encoded == DispatchConfig::LIST_METHODS {
            let methods = self
                .list_methods()
                .into_iter()
                .map(serde_json::Value::String)
                .collect();
            return RpcResponse::success(id, serde_json::Value::Array(methods), &[]);
        }

        let args = params.as_array().map(|a| a.items()).unwrap_or_default();
        let invocation = match self.resolve_invocation(&target, &args) {
            Ok(invocation) => invocation,
            Err(e) => {
                debug!("No target for {}: {}", encoded, e);
                return RpcResponse::from_error(id, &e);
            }
        };

        let outcome = self
            .invoke(context, &invocation, &args)
            .and_then(|result| {
                let (node, fixups) = self.serializer().marshal_root(&result)?;
                Ok((node.to_json()?, fixups))
            });
        match outcome {
            Ok((result, fixups)) => RpcResponse::success(id, result, &fixups),
            Err(e) => {
                self.callbacks
                    .on_error(context, invocation.target.as_ref(), &invocation.method, &e);
                let e = match e {
                    BridgeError::Application(app) => {
                        BridgeError::Application(self.exception_transformer().transform(app))
                    }
                    other => other,
                };
                warn!("Call to {} failed: {}", encoded, e);
                RpcResponse::from_error(id, &e)
            }
        }
    }

    /// Find the receiver and candidate methods for `target`, then pick the
    /// overload matching `args`.
    fn resolve_invocation(&self, target: &MethodTarget, args: &[WireNode]) -> Result<Invocation> {
        let (receiver, candidates) = match target.handle {
            Some(handle) => {
                let instance = self
                    .resolve_object(&ObjectKey::Handle(handle))
                    .ok_or(BridgeError::NoMethod)?;
                let methods = instance.exposed.instance_methods();
                (Some(instance.object), methods)
            }
            None => {
                if let Some(instance) = self.resolve_object(&ObjectKey::from(target.class_name.as_str())) {
                    let methods = instance.exposed.instance_methods();
                    (Some(instance.object), methods)
                } else if target.method_name == DispatchConfig::CONSTRUCTOR_FLAG {
                    let class = self
                        .resolve_class(&target.class_name)
                        .ok_or(BridgeError::NoConstructor)?;
                    (None, class.constructors())
                } else if let Some(class) = self.resolve_class(&target.class_name) {
                    (None, class.static_methods())
                } else {
                    return Err(BridgeError::NoMethod);
                }
            }
        };

        let serializer = self.serializer();
        let methods = method_map(candidates, &self.local_args);
        let method = resolve_method(&methods, &target.method_name, args, &serializer, &self.local_args)
            .ok_or(BridgeError::NoMethod)?;

        // An interface method runs the receiver's own implementation.
        let method = match &receiver {
            Some(object) => object.type_of().find_override(&method).unwrap_or(method),
            None => method,
        };
        Ok(Invocation {
            target: receiver.map(Value::Object),
            method,
        })
    }

    fn invoke(&self, context: &[Value], invocation: &Invocation, args: &[WireNode]) -> Result<Value> {
        let serializer = self.serializer();
        let values = unmarshal_args(&invocation.method, args, context, &serializer, &self.local_args)?;
        let target = invocation.target.as_ref();
        let method = &invocation.method;

        self.callbacks.pre_invoke(context, target, method, &values)?;
        debug!("Invoking {}", method.signature());
        let result = method.call(target, &values)?;
        self.callbacks.post_invoke(context, target, method, &result)?;
        Ok(result)
    }

    // ========================================
    // Introspection
    // ========================================

    /// Every callable method name, sorted and without repeats.
    pub fn list_methods(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        if let Some(parent) = &self.parent {
            parent.static_method_names(&mut names);
            parent.instance_method_names(&mut names);
        }
        self.static_method_names(&mut names);
        self.instance_method_names(&mut names);
        self.callable_reference_names(&mut names);
        names.into_iter().collect()
    }

    fn static_method_names(&self, names: &mut BTreeSet<String>) {
        let classes: Vec<_> = lock(&self.classes)
            .iter()
            .map(|(name, ty)| (name.clone(), ty.clone()))
            .collect();
        for (name, ty) in classes {
            for method in ty.static_methods() {
                names.insert(format!("{}.{}", name, method.name()));
            }
        }
    }

    fn instance_method_names(&self, names: &mut BTreeSet<String>) {
        let objects: Vec<_> = lock(&self.objects)
            .iter()
            .filter_map(|(key, instance)| match key {
                ObjectKey::Name(name) => Some((name.clone(), instance.exposed.clone())),
                ObjectKey::Handle(_) => None,
            })
            .collect();
        for (name, ty) in objects {
            for method in ty.instance_methods() {
                names.insert(format!("{}.{}", name, method.name()));
            }
        }
    }

    fn callable_reference_names(&self, names: &mut BTreeSet<String>) {
        for ty in self.callable_reference_types() {
            let prefix = format!("{}[{}].", DispatchConfig::CALLABLE_REFERENCE_METHOD_PREFIX, ty);
            for method in ty.static_methods().into_iter().chain(ty.instance_methods()) {
                names.insert(format!("{}{}", prefix, method.name()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_target_parse() {
        let target = MethodTarget::parse("calc.add");
        assert_eq!(target.class_name, "calc");
        assert_eq!(target.method_name, "add");
        assert_eq!(target.handle, None);

        let target = MethodTarget::parse(".obj[42].get");
        assert_eq!(target.class_name, "obj[42]");
        assert_eq!(target.method_name, "get");
        assert_eq!(target.handle, Some(42));

        let target = MethodTarget::parse("Point.$constructor");
        assert_eq!(target.method_name, DispatchConfig::CONSTRUCTOR_FLAG);

        assert_eq!(MethodTarget::parse("").class_name, "");
    }

    #[test]
    fn test_handle_id_rejects_malformed() {
        assert_eq!(handle_id(".obj]1[.x"), None);
        assert_eq!(handle_id(".obj[abc].x"), None);
        assert_eq!(handle_id("calc[1].x"), None);
    }
}
