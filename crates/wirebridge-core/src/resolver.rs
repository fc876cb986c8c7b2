//! Overload resolution.
//!
//! Candidates are grouped by name and wire arity. Each candidate is scored by
//! trial-decoding the arguments against its parameter types; a parameter that
//! fails eliminates the candidate. Survivors are ranked by their worst
//! parameter match, then the sum of matches, then by which signature is more
//! specific, then by declaration order.

use crate::codec::ObjectMatch;
use crate::error::UnmarshalError;
use crate::local_arg::LocalArgRegistry;
use crate::serializer::JsonSerializer;
use crate::state::SerializerState;
use crate::types::{MethodDef, Type};
use crate::value::Value;
use crate::wire::WireNode;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Overload group key: method name plus the number of arguments a caller sends.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodKey {
    pub name: String,
    pub arity: usize,
}

pub type MethodMap = BTreeMap<MethodKey, Vec<Arc<MethodDef>>>;

/// Group `methods` by name and wire arity, keeping declaration order.
pub fn method_map(methods: Vec<Arc<MethodDef>>, local_args: &LocalArgRegistry) -> MethodMap {
    let mut map = MethodMap::new();
    for method in methods {
        let key = MethodKey {
            name: method.name().to_string(),
            arity: local_args.wire_arity(method.params()),
        };
        map.entry(key).or_default().push(method);
    }
    map
}

struct Scored {
    method: Arc<MethodDef>,
    worst: ObjectMatch,
    total: i64,
}

fn score(
    method: &Arc<MethodDef>,
    args: &[WireNode],
    serializer: &JsonSerializer,
    local_args: &LocalArgRegistry,
) -> Result<Scored, UnmarshalError> {
    let mut state = SerializerState::new();
    let mut wire_args = args.iter();
    let mut worst = ObjectMatch::OKAY;
    let mut total = 0i64;
    for (index, param) in method.params().iter().enumerate() {
        let quality = if local_args.is_local_arg(param) {
            ObjectMatch::OKAY
        } else {
            let arg = wire_args
                .next()
                .ok_or_else(|| UnmarshalError::mismatch("too few arguments"))?;
            serializer
                .try_unmarshal(&mut state, Some(param), arg)
                .map_err(|e| e.within(format!("arg {}", index + 1)))?
        };
        worst = worst.max(quality);
        total += i64::from(quality.mismatch());
    }
    Ok(Scored {
        method: Arc::clone(method),
        worst,
        total,
    })
}

/// Which of two parameter types is more specific. `Less` favours `a`.
fn compare_param(a: &Type, b: &Type) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if let (Some(x), Some(y)) = (a.primitive_kind(), b.primitive_kind()) {
        return x.rank().cmp(&y.rank());
    }
    if a.is_assignable_from(b) {
        Ordering::Greater
    } else if b.is_assignable_from(a) {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

/// The signature winning more parameter positions is the more specific one.
fn better_signature(a: &MethodDef, b: &MethodDef) -> Ordering {
    let (mut a_wins, mut b_wins) = (0, 0);
    for (pa, pb) in a.params().iter().zip(b.params()) {
        match compare_param(pa, pb) {
            Ordering::Less => a_wins += 1,
            Ordering::Greater => b_wins += 1,
            Ordering::Equal => {}
        }
    }
    b_wins.cmp(&a_wins)
}

/// Pick the best candidate named `name` for `args`, or `None` when no
/// candidate accepts them.
pub fn resolve_method(
    methods: &MethodMap,
    name: &str,
    args: &[WireNode],
    serializer: &JsonSerializer,
    local_args: &LocalArgRegistry,
) -> Option<Arc<MethodDef>> {
    let key = MethodKey {
        name: name.to_string(),
        arity: args.len(),
    };
    let candidates = methods.get(&key)?;

    let survivors: Vec<Scored> = candidates
        .iter()
        .filter_map(|method| match score(method, args, serializer, local_args) {
            Ok(scored) => Some(scored),
            Err(e) => {
                debug!("Candidate {} rejected: {}", method.signature(), e);
                None
            }
        })
        .collect();

    survivors
        .into_iter()
        .min_by(|a, b| {
            a.worst
                .cmp(&b.worst)
                .then(a.total.cmp(&b.total))
                .then_with(|| better_signature(&a.method, &b.method))
        })
        .map(|best| {
            debug!(
                "Resolved {} to {} (worst {}, total {})",
                name,
                best.method.signature(),
                best.worst.mismatch(),
                best.total
            );
            best.method
        })
}

/// Decode the arguments for `method`, filling local arguments from `context`.
/// One tracker spans all arguments so nodes shared between them decode to
/// the same object.
pub fn unmarshal_args(
    method: &MethodDef,
    args: &[WireNode],
    context: &[Value],
    serializer: &JsonSerializer,
    local_args: &LocalArgRegistry,
) -> Result<Vec<Value>, UnmarshalError> {
    let mut state = SerializerState::new();
    let mut wire_args = args.iter();
    let mut values = Vec::with_capacity(method.params().len());
    for (index, param) in method.params().iter().enumerate() {
        let value = if local_args.is_local_arg(param) {
            local_args.resolve(context, param)?
        } else {
            let arg = wire_args
                .next()
                .ok_or_else(|| UnmarshalError::mismatch("too few arguments"))?;
            serializer
                .unmarshal(&mut state, Some(param), arg)
                .map_err(|e| e.within(format!("arg {}", index + 1)))?
        };
        values.push(value);
    }
    Ok(values)
}
