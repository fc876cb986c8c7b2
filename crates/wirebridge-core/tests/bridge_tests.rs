//! Integration tests for request dispatch through the bridge.
//!
//! Each test builds its own root bridge so registrations do not leak between
//! tests; only `test_global_bridge_is_initialised_once` touches the
//! process-wide global.

use serde_json::{json, Value as Json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wirebridge::types::{builtin, TypeBuilder};
use wirebridge::{
    ApplicationError, Bridge, BridgeError, InvocationCallback, JsonSerializer, MethodDef,
    ObjectRef, SerializerConfig, Type, Value,
};

fn calc_type() -> Type {
    TypeBuilder::native("Calculator")
        .method("add", &[&builtin::INT, &builtin::INT], &builtin::INT, |_, args| {
            Ok(Value::Int(
                args[0].as_i64().unwrap_or_default() + args[1].as_i64().unwrap_or_default(),
            ))
        })
        .method(
            "add",
            &[&builtin::DOUBLE_PRIMITIVE, &builtin::DOUBLE_PRIMITIVE],
            &builtin::DOUBLE_PRIMITIVE,
            |_, args| {
                Ok(Value::Float(
                    args[0].as_f64().unwrap_or_default() + args[1].as_f64().unwrap_or_default(),
                ))
            },
        )
        .method("describe", &[&builtin::STRING], &builtin::STRING, |_, _| {
            Ok(Value::from("string"))
        })
        .method("describe", &[&builtin::NUMBER], &builtin::STRING, |_, _| {
            Ok(Value::from("number"))
        })
        .method("divide", &[&builtin::INT, &builtin::INT], &builtin::INT, |_, args| {
            let divisor = args[1].as_i64().unwrap_or_default();
            if divisor == 0 {
                return Err(ApplicationError::new("ArithmeticError", "division by zero"));
            }
            Ok(Value::Int(args[0].as_i64().unwrap_or_default() / divisor))
        })
        .build()
}

fn node_type() -> Type {
    TypeBuilder::record("Node")
        .field("name", &builtin::STRING)
        .field("next", &builtin::OBJECT)
        .build()
}

fn graph_type(node: &Type) -> Type {
    let ring_node = node.clone();
    TypeBuilder::native("Graph")
        .method("same", &[node, node], &builtin::BOOLEAN, |_, args| {
            Ok(Value::Bool(args[0].same_object(&args[1])))
        })
        .method("ring", &[], node, move |_, _| {
            let a = ObjectRef::record(&ring_node);
            let b = ObjectRef::record(&ring_node);
            a.set("name", Value::from("a"));
            b.set("name", Value::from("b"));
            a.set("next", Value::Object(b.clone()));
            b.set("next", Value::Object(a.clone()));
            Ok(Value::Object(a))
        })
        .build()
}

fn call(bridge: &Bridge, method: &str, params: Json) -> Json {
    bridge
        .dispatch(&[], &json!({"method": method, "params": params, "id": 1}))
        .to_json()
}

fn calc_bridge() -> Arc<Bridge> {
    let bridge = Bridge::new_root(JsonSerializer::default());
    bridge.register_object("calc", ObjectRef::native(&calc_type(), ()));
    bridge
}

#[test]
fn test_dispatch_simple_call() {
    let bridge = calc_bridge();
    assert_eq!(
        call(&bridge, "calc.add", json!([2, 3])),
        json!({"id": 1, "result": 5})
    );
    assert_eq!(
        call(&bridge, "calc.add", json!([2.5, 1])),
        json!({"id": 1, "result": 3.5})
    );
}

#[test]
fn test_overload_string_versus_number() {
    let bridge = calc_bridge();
    assert_eq!(call(&bridge, "calc.describe", json!(["3"]))["result"], "string");
    assert_eq!(call(&bridge, "calc.describe", json!([3]))["result"], "number");
}

#[test]
fn test_unknown_method_and_arity() {
    let bridge = calc_bridge();
    assert_eq!(call(&bridge, "calc.nope", json!([]))["error"]["code"], 591);
    assert_eq!(call(&bridge, "calc.add", json!([1]))["error"]["code"], 591);
    assert_eq!(call(&bridge, "nobody.add", json!([1, 2]))["error"]["code"], 591);
    assert_eq!(call(&bridge, "calc.add", json!([true, 2]))["error"]["code"], 591);

    let response = bridge.dispatch(&[], &json!({"params": [], "id": 4}));
    assert_eq!(response.error_code(), Some(591));
    assert_eq!(response.id, json!(4));
}

#[test]
fn test_unparseable_line() {
    let bridge = calc_bridge();
    let response = bridge.dispatch_str(&[], "{not json");
    assert_eq!(response.error_code(), Some(590));
    assert_eq!(response.id, Json::Null);
}

#[test]
fn test_application_error_is_reported() {
    let bridge = calc_bridge();
    let response = call(&bridge, "calc.divide", json!([1, 0]));
    assert_eq!(
        response["error"],
        json!({"code": 490, "message": "division by zero", "data": {"kind": "ArithmeticError"}})
    );
}

#[test]
fn test_list_methods_has_no_repeats() {
    let bridge = calc_bridge();
    let point = TypeBuilder::record("Point")
        .static_method("origin", &[], &builtin::STRING, |_, _| Ok(Value::from("0,0")))
        .build();
    bridge.register_class("Point", &point).unwrap();

    for _ in 0..3 {
        call(&bridge, "calc.add", json!([1, 1]));
    }
    let listed = call(&bridge, "system.listMethods", json!([]))["result"].clone();
    let names: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Json::as_str)
        .collect();
    assert_eq!(names.iter().filter(|n| **n == "calc.add").count(), 1);
    assert!(names.contains(&"Point.origin"));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_session_sees_global_registrations() {
    let global = calc_bridge();
    let session = Bridge::new_session(&global);
    assert_eq!(call(&session, "calc.add", json!([4, 4]))["result"], 8);

    let listed = call(&session, "system.listMethods", json!([]))["result"].clone();
    assert_eq!(
        listed
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == Some("calc.add"))
            .count(),
        1
    );

    assert!(matches!(
        global.register_reference(&calc_type()),
        Err(BridgeError::IllegalOperation(_))
    ));
    session.register_reference(&calc_type()).unwrap();
}

#[test]
fn test_global_bridge_is_initialised_once() {
    let global = Bridge::init_global(JsonSerializer::default()).unwrap();
    assert!(Arc::ptr_eq(&global, &Bridge::global().unwrap()));
    assert!(matches!(
        Bridge::init_global(JsonSerializer::default()),
        Err(BridgeError::IllegalOperation(_))
    ));
}

#[test]
fn test_constructor_and_static_calls() {
    let bridge = Bridge::new_root(JsonSerializer::default());
    let point = TypeBuilder::record("Point")
        .field("x", &builtin::INT)
        .field("y", &builtin::INT)
        .build();
    let ctor_point = point.clone();
    let point = TypeBuilder::record("Point")
        .field("x", &builtin::INT)
        .field("y", &builtin::INT)
        .constructor(&[&builtin::INT, &builtin::INT], move |_, args| {
            let p = ObjectRef::record(&ctor_point);
            p.set("x", args[0].clone());
            p.set("y", args[1].clone());
            Ok(Value::Object(p))
        })
        .build();
    bridge.register_class("Point", &point).unwrap();

    assert_eq!(
        call(&bridge, "Point.$constructor", json!([1, 2]))["result"],
        json!({"javaClass": "Point", "x": 1, "y": 2})
    );
    // A known class without a matching overload is a plain method miss.
    assert_eq!(call(&bridge, "Point.$constructor", json!([1]))["error"]["code"], 591);
    assert_eq!(call(&bridge, "Point.$constructor", json!(["a", "b"]))["error"]["code"], 591);
    assert_eq!(call(&bridge, "Missing.$constructor", json!([]))["error"]["code"], 595);
}

#[test]
fn test_incoming_fixups_share_nodes() {
    let bridge = Bridge::new_root(JsonSerializer::default());
    let node = node_type();
    bridge.register_object("graph", ObjectRef::native(&graph_type(&node), ()));

    let request = json!({
        "method": "graph.same",
        "params": [{"javaClass": "Node", "name": "x", "next": null}, null],
        "fixups": [[[1], [0]]],
        "id": 9
    });
    assert_eq!(bridge.dispatch(&[], &request).to_json(), json!({"id": 9, "result": true}));

    let request = json!({
        "method": "graph.same",
        "params": [
            {"javaClass": "Node", "name": "x", "next": null},
            {"javaClass": "Node", "name": "x", "next": null}
        ],
        "id": 10
    });
    assert_eq!(bridge.dispatch(&[], &request).to_json()["result"], false);
}

#[test]
fn test_bad_fixups_abort_before_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let svc = TypeBuilder::native("Svc")
        .method("take", &[&builtin::OBJECT], &builtin::INT, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(0))
        })
        .build();
    let bridge = Bridge::new_root(JsonSerializer::default());
    bridge.register_object("svc", ObjectRef::native(&svc, ()));

    let request = json!({"method": "svc.take", "params": [1], "fixups": [[[0, "a"], [5]]], "id": 1});
    let response = bridge.dispatch(&[], &request);
    assert_eq!(response.error_code(), Some(594));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let request = json!({"method": "svc.take", "params": [1], "fixups": "nope", "id": 1});
    assert_eq!(bridge.dispatch(&[], &request).error_code(), Some(594));

    for index in [json!(u64::MAX), json!(1_000_000_000_000u64), json!("99999999999")] {
        let request = json!({
            "method": "svc.take",
            "params": [[]],
            "fixups": [[[0, index], [0]]],
            "id": 2
        });
        let response = bridge.dispatch(&[], &request);
        assert_eq!(response.error_code(), Some(594));
        assert_eq!(response.id, json!(2));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cyclic_result_needs_circular_fixups() {
    let node = node_type();
    let graph = ObjectRef::native(&graph_type(&node), ());

    let strict = Bridge::new_root(JsonSerializer::default());
    strict.register_object("graph", graph.clone());
    assert_eq!(call(&strict, "graph.ring", json!([]))["error"]["code"], 593);

    let config = SerializerConfig::default().circular_fixups(true);
    let lenient = Bridge::new_root(JsonSerializer::with_default_codecs(config));
    lenient.register_object("graph", graph);
    let response = call(&lenient, "graph.ring", json!([]));
    assert_eq!(
        response,
        json!({
            "id": 1,
            "result": {"javaClass": "Node", "name": "a", "next": {"javaClass": "Node", "name": "b"}},
            "fixups": [[["result", "next", "next"], ["result"]]]
        })
    );
}

#[test]
fn test_exposed_interface_restricts_methods() {
    let named = TypeBuilder::interface("Named")
        .method("name", &[], &builtin::STRING, |_, _| Ok(Value::from("anonymous")))
        .build();
    let person = TypeBuilder::native("Person")
        .extends(&named)
        .method("name", &[], &builtin::STRING, |_, _| Ok(Value::from("ada")))
        .method("secret", &[], &builtin::STRING, |_, _| Ok(Value::from("hidden")))
        .build();
    let bridge = Bridge::new_root(JsonSerializer::default());
    bridge
        .register_object_as("who", ObjectRef::native(&person, ()), &named)
        .unwrap();

    assert_eq!(call(&bridge, "who.name", json!([]))["result"], "ada");
    assert_eq!(call(&bridge, "who.secret", json!([]))["error"]["code"], 591);
}

#[test]
fn test_callable_reference_round_trip() {
    let counter = TypeBuilder::native("Counter")
        .method("value", &[], &builtin::INT, |target, _| {
            let n = target
                .and_then(Value::as_object)
                .and_then(|o| o.payload::<i64>())
                .map(|n| *n)
                .unwrap_or_default();
            Ok(Value::Int(n))
        })
        .build();
    let made = counter.clone();
    let factory = TypeBuilder::native("Factory")
        .method("make", &[&builtin::INT], &counter, move |_, args| {
            Ok(Value::Object(ObjectRef::native(
                &made,
                args[0].as_i64().unwrap_or_default(),
            )))
        })
        .method("read", &[&counter], &builtin::INT, |_, args| {
            let n = args[0]
                .as_object()
                .and_then(|o| o.payload::<i64>())
                .map(|n| *n)
                .unwrap_or_default();
            Ok(Value::Int(n))
        })
        .build();

    let global = Bridge::new_root(JsonSerializer::default());
    global.register_object("factory", ObjectRef::native(&factory, ()));
    let session = Bridge::new_session(&global);
    session.register_callable_reference(&counter).unwrap();

    let handle = call(&session, "factory.make", json!([41]))["result"].clone();
    assert_eq!(handle["JSONRPCType"], "CallableReference");
    assert_eq!(handle["javaClass"], "Counter");
    let id = handle["objectID"].as_u64().unwrap();

    assert_eq!(call(&session, &format!(".obj[{id}].value"), json!([]))["result"], 41);
    assert_eq!(call(&session, "factory.read", json!([handle]))["result"], 41);

    let bogus = json!({"JSONRPCType": "CallableReference", "javaClass": "Counter", "objectID": 0});
    assert_eq!(call(&session, "factory.read", json!([bogus]))["error"]["code"], 592);
    assert_eq!(call(&session, ".obj[0].value", json!([]))["error"]["code"], 591);

    let listed = call(&session, "system.listMethods", json!([]))["result"].clone();
    assert!(listed
        .as_array()
        .unwrap()
        .contains(&json!(".ref[Counter].value")));
}

#[test]
fn test_reference_round_trip() {
    let secret = TypeBuilder::native("Secret").build();
    let kept = secret.clone();
    let vault = TypeBuilder::native("Vault")
        .method("open", &[], &secret, move |_, _| {
            Ok(Value::Object(ObjectRef::native(&kept, "s3cr3t")))
        })
        .method("peek", &[&secret], &builtin::STRING, |_, args| {
            let text = args[0]
                .as_object()
                .and_then(|o| o.payload::<&str>())
                .map(|s| s.to_string())
                .unwrap_or_default();
            Ok(Value::from(text))
        })
        .build();

    let global = Bridge::new_root(JsonSerializer::default());
    global.register_object("vault", ObjectRef::native(&vault, ()));
    let session = Bridge::new_session(&global);
    session.register_reference(&secret).unwrap();

    let handle = call(&session, "vault.open", json!([]))["result"].clone();
    assert_eq!(handle["JSONRPCType"], "Reference");
    assert_eq!(call(&session, "vault.peek", json!([handle]))["result"], "s3cr3t");

    // The global bridge has no reference codec: the native object cannot travel.
    assert_eq!(call(&global, "vault.open", json!([]))["error"]["code"], 593);
}

#[derive(Default)]
struct Audit {
    pre: AtomicUsize,
    post: AtomicUsize,
    errors: AtomicUsize,
}

impl InvocationCallback for Audit {
    fn pre_invoke(
        &self,
        _: &Value,
        _: Option<&Value>,
        _: &MethodDef,
        _: &[Value],
    ) -> Result<(), ApplicationError> {
        self.pre.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_invoke(
        &self,
        _: &Value,
        _: Option<&Value>,
        _: &MethodDef,
        _: &Value,
    ) -> Result<(), ApplicationError> {
        self.post.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_error(&self, _: &Value, _: Option<&Value>, _: &MethodDef, _: &BridgeError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_callbacks_and_exception_transformer() {
    let request = TypeBuilder::native("HttpRequest").build();
    let bridge = calc_bridge();
    let audit = Arc::new(Audit::default());
    bridge.register_callback(audit.clone(), &request);
    bridge.set_exception_transformer(Arc::new(|e: ApplicationError| {
        ApplicationError::new(e.kind, "internal error")
    }));

    let context = [Value::Object(ObjectRef::native(&request, ()))];
    let ok = bridge.dispatch(&context, &json!({"method": "calc.add", "params": [1, 2], "id": 1}));
    assert!(ok.is_success());

    let failed = bridge
        .dispatch(&context, &json!({"method": "calc.divide", "params": [1, 0], "id": 2}))
        .to_json();
    assert_eq!(failed["error"]["code"], 490);
    assert_eq!(failed["error"]["message"], "internal error");

    assert_eq!(audit.pre.load(Ordering::SeqCst), 2);
    assert_eq!(audit.post.load(Ordering::SeqCst), 1);
    assert_eq!(audit.errors.load(Ordering::SeqCst), 1);

    // Callbacks only fire for context items of the registered type.
    bridge.dispatch(&[], &json!({"method": "calc.add", "params": [1, 2], "id": 3}));
    assert_eq!(audit.pre.load(Ordering::SeqCst), 2);
}

#[test]
fn test_local_args_come_from_context() {
    let request = TypeBuilder::native("HttpRequest").build();
    let session = TypeBuilder::native("Session").build();
    let svc = TypeBuilder::native("Greeter")
        .method("greet", &[&session, &builtin::STRING], &builtin::STRING, |_, args| {
            let user = args[0]
                .as_object()
                .and_then(|o| o.payload::<String>())
                .map(|s| s.to_string())
                .unwrap_or_default();
            Ok(Value::from(format!(
                "{} greets {}",
                user,
                args[1].as_str().unwrap_or_default()
            )))
        })
        .build();

    let bridge = Bridge::new_root(JsonSerializer::default());
    bridge.register_object("greeter", ObjectRef::native(&svc, ()));
    let session_type = session.clone();
    bridge.local_args().register(
        &session,
        &request,
        Arc::new(move |_: &Value| {
            Ok::<_, ApplicationError>(Value::Object(ObjectRef::native(
                &session_type,
                String::from("alice"),
            )))
        }),
    );

    let context = [Value::Object(ObjectRef::native(&request, ()))];
    let response = bridge
        .dispatch(&context, &json!({"method": "greeter.greet", "params": ["bob"], "id": 1}))
        .to_json();
    assert_eq!(response["result"], "alice greets bob");

    let response = bridge
        .dispatch(&[], &json!({"method": "greeter.greet", "params": ["bob"], "id": 2}))
        .to_json();
    assert_eq!(response["error"]["code"], 592);
}
