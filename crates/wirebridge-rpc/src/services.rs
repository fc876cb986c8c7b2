//! Demo services exported by the driver.

use std::sync::Arc;
use wirebridge::types::{builtin, TypeBuilder};
use wirebridge::{ApplicationError, Bridge, ObjectRef, Result, Type, Value};

/// Transport context handed to every call: where the request came from.
pub fn connection_type() -> Type {
    TypeBuilder::native("Connection").build()
}

fn int_arg(args: &[Value], index: usize) -> i64 {
    args.get(index).and_then(Value::as_i64).unwrap_or_default()
}

fn float_arg(args: &[Value], index: usize) -> f64 {
    args.get(index).and_then(Value::as_f64).unwrap_or_default()
}

fn calculator() -> Type {
    TypeBuilder::native("Calculator")
        .method("add", &[&builtin::INT, &builtin::INT], &builtin::INT, |_, args| {
            int_arg(args, 0)
                .checked_add(int_arg(args, 1))
                .map(Value::Int)
                .ok_or_else(|| ApplicationError::new("ArithmeticError", "integer overflow"))
        })
        .method(
            "add",
            &[&builtin::DOUBLE_PRIMITIVE, &builtin::DOUBLE_PRIMITIVE],
            &builtin::DOUBLE_PRIMITIVE,
            |_, args| Ok(Value::Float(float_arg(args, 0) + float_arg(args, 1))),
        )
        .method("add", &[&builtin::STRING, &builtin::STRING], &builtin::STRING, |_, args| {
            Ok(Value::from(format!(
                "{}{}",
                args[0].as_str().unwrap_or_default(),
                args[1].as_str().unwrap_or_default()
            )))
        })
        .method("divide", &[&builtin::INT, &builtin::INT], &builtin::INT, |_, args| {
            let divisor = int_arg(args, 1);
            if divisor == 0 {
                return Err(ApplicationError::new("ArithmeticError", "division by zero"));
            }
            Ok(Value::Int(int_arg(args, 0) / divisor))
        })
        .method("whoami", &[&connection_type()], &builtin::STRING, |_, args| {
            let source = args
                .first()
                .and_then(Value::as_object)
                .and_then(|c| c.payload::<String>())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            Ok(Value::from(source))
        })
        .build()
}

fn node_type() -> Type {
    TypeBuilder::record("Node")
        .field("name", &builtin::STRING)
        .field("next", &builtin::OBJECT)
        .build()
}

fn node(ty: &Type, name: &str) -> ObjectRef {
    let node = ObjectRef::record(ty);
    node.set("name", Value::from(name));
    node
}

fn graph_service() -> Type {
    let node_ty = node_type();
    let ring_ty = node_ty.clone();
    let shared_ty = node_ty.clone();
    TypeBuilder::native("GraphService")
        .method("ring", &[&builtin::INT], &node_ty, move |_, args| {
            let len = int_arg(args, 0).clamp(1, 64);
            let nodes: Vec<ObjectRef> = (0..len)
                .map(|i| node(&ring_ty, &format!("n{i}")))
                .collect();
            for (i, current) in nodes.iter().enumerate() {
                let next = &nodes[(i + 1) % nodes.len()];
                current.set("next", Value::Object(next.clone()));
            }
            Ok(Value::Object(nodes[0].clone()))
        })
        .method("shared", &[], &builtin::LIST, move |_, _| {
            let leaf = Value::Object(node(&shared_ty, "leaf"));
            Ok(Value::Object(ObjectRef::list(vec![leaf.clone(), leaf])))
        })
        .method("same", &[&builtin::OBJECT, &builtin::OBJECT], &builtin::BOOLEAN, |_, args| {
            Ok(Value::Bool(args[0].same_object(&args[1])))
        })
        .method("length", &[&node_ty], &builtin::INT, |_, args| {
            let mut count = 0;
            let mut current = args[0].clone();
            while let Some(obj) = current.as_object().cloned() {
                count += 1;
                current = obj.get("next").unwrap_or_default();
                if current.same_object(&args[0]) {
                    break;
                }
            }
            Ok(Value::Int(count))
        })
        .build()
}

fn point_class() -> Type {
    let shape = TypeBuilder::record("Point")
        .field("x", &builtin::INT)
        .field("y", &builtin::INT)
        .build();
    let make = move |x: i64, y: i64| {
        let p = ObjectRef::record(&shape);
        p.set("x", Value::Int(x));
        p.set("y", Value::Int(y));
        Value::Object(p)
    };
    let origin = make.clone();
    let field = |p: &Value, name: &str| {
        p.as_object()
            .and_then(|o| o.get(name))
            .and_then(|v| v.as_i64())
            .unwrap_or_default()
    };
    TypeBuilder::record("Point")
        .field("x", &builtin::INT)
        .field("y", &builtin::INT)
        .constructor(&[], move |_, _| Ok(origin(0, 0)))
        .constructor(&[&builtin::INT, &builtin::INT], move |_, args| {
            Ok(make(int_arg(args, 0), int_arg(args, 1)))
        })
        .static_method("dimensions", &[], &builtin::INT, |_, _| Ok(Value::Int(2)))
        .static_method("manhattan", &[&builtin::OBJECT, &builtin::OBJECT], &builtin::INT, move |_, args| {
            let dx = field(&args[0], "x") - field(&args[1], "x");
            let dy = field(&args[0], "y") - field(&args[1], "y");
            Ok(Value::Int(dx.abs() + dy.abs()))
        })
        .build()
}

/// Export the demo services on `bridge`.
pub fn register(bridge: &Bridge) -> Result<()> {
    let connection = connection_type();
    bridge.local_args().register(
        &connection,
        &connection,
        Arc::new(|context: &Value| Ok::<_, ApplicationError>(context.clone())),
    );
    bridge.register_object("calc", ObjectRef::native(&calculator(), ()));
    bridge.register_object("graph", ObjectRef::native(&graph_service(), ()));
    bridge.register_class("Point", &point_class())?;
    Ok(())
}
