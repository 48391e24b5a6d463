//! Promises: construction, settlement, and reactions.
//!
//! Settling never runs user code synchronously. Each registered reaction
//! becomes a microtask on the VM queue, which the event loop drains before
//! any host-posted event — the ordering guarantee user code observes.

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    event::Microtask,
    heap::HeapId,
    io::PrintWriter,
    tracer::VmTracer,
    types::{BoundNative, JsObject, ObjectKind, PromiseData, PromiseState, Reaction},
    value::Value,
};

/// Allocates a fresh pending promise.
pub(crate) fn new_promise<P: PrintWriter, T: VmTracer>(interp: &mut Interp<'_, P, T>) -> RunResult<HeapId> {
    let obj = JsObject::new(ObjectKind::Promise(PromiseData::pending()), Some(interp.protos.promise));
    interp.heap.alloc_object(obj)
}

/// `new Promise(executor)`: the executor runs synchronously with bound
/// resolve/reject natives; a throw from it rejects the promise.
pub(crate) fn construct<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    executor: Value,
) -> RunResult<Value> {
    let promise = new_promise(interp)?;
    let resolve = interp.heap.alloc_object(JsObject::new(
        ObjectKind::Bound(BoundNative::PromiseResolve(promise)),
        Some(interp.protos.function),
    ))?;
    let reject = interp.heap.alloc_object(JsObject::new(
        ObjectKind::Bound(BoundNative::PromiseReject(promise)),
        Some(interp.protos.function),
    ))?;
    let outcome = interp.call_function(executor, Value::Undefined, &[Value::Ref(resolve), Value::Ref(reject)]);
    if let Err(err) = outcome {
        let reason = interp.error_to_value(err)?;
        settle(interp, promise, reason, true)?;
    }
    Ok(Value::Ref(promise))
}

fn promise_data<'i, P: PrintWriter, T: VmTracer>(
    interp: &'i mut Interp<'_, P, T>,
    promise: HeapId,
) -> RunResult<&'i mut PromiseData> {
    match &mut interp.heap.object_mut(promise).kind {
        ObjectKind::Promise(data) => Ok(data),
        _ => Err(JsError::type_error("receiver is not a Promise").into()),
    }
}

/// Resolution: adopting a promise links the two; anything else fulfills.
pub(crate) fn resolve_with<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    promise: HeapId,
    value: Value,
) -> RunResult<()> {
    if let Value::Ref(inner) = value {
        let inner_is_promise = matches!(
            interp.heap.try_object(inner).map(|o| &o.kind),
            Some(ObjectKind::Promise(_))
        );
        if inner_is_promise {
            // Adopt the inner promise's eventual state.
            let reaction = Reaction {
                on_fulfilled: None,
                on_rejected: None,
                derived: promise,
            };
            register(interp, inner, reaction)?;
            return Ok(());
        }
    }
    settle(interp, promise, value, false)
}

/// Moves a settled promise's value into its reactions, or queues the
/// reaction for later settlement.
fn register<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    promise: HeapId,
    reaction: Reaction,
) -> RunResult<()> {
    let data = promise_data(interp, promise)?;
    match data.state {
        PromiseState::Pending => {
            data.reactions.push(reaction);
        }
        PromiseState::Fulfilled | PromiseState::Rejected => {
            let rejected = data.state == PromiseState::Rejected;
            let value = data.value;
            let handler = if rejected { reaction.on_rejected } else { reaction.on_fulfilled };
            interp.events.microtasks.push_back(Microtask::Reaction {
                derived: reaction.derived,
                handler,
                value,
                rejected,
            });
        }
    }
    Ok(())
}

/// Settles a promise, enqueuing a microtask per queued reaction. Settling
/// an already-settled promise is a no-op.
pub(crate) fn settle<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    promise: HeapId,
    value: Value,
    rejected: bool,
) -> RunResult<()> {
    let data = promise_data(interp, promise)?;
    if data.state != PromiseState::Pending {
        return Ok(());
    }
    data.state = if rejected { PromiseState::Rejected } else { PromiseState::Fulfilled };
    data.value = value;
    let reactions = std::mem::take(&mut data.reactions);
    for reaction in reactions {
        let handler = if rejected { reaction.on_rejected } else { reaction.on_fulfilled };
        interp.events.microtasks.push_back(Microtask::Reaction {
            derived: reaction.derived,
            handler,
            value,
            rejected,
        });
    }
    Ok(())
}

/// `promise.then(onFulfilled, onRejected)` — returns the derived promise.
pub(crate) fn then<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    this: Value,
    on_fulfilled: Value,
    on_rejected: Value,
) -> RunResult<Value> {
    let Value::Ref(promise) = this else {
        return Err(JsError::type_error("receiver is not a Promise").into());
    };
    let derived = new_promise(interp)?;
    let callable = |interp: &Interp<'_, P, T>, v: Value| match v {
        Value::Builtin(_) => Some(v),
        Value::Ref(id) if interp.heap.try_object(id).is_some_and(JsObject::is_callable) => Some(v),
        _ => None,
    };
    let reaction = Reaction {
        on_fulfilled: callable(interp, on_fulfilled),
        on_rejected: callable(interp, on_rejected),
        derived,
    };
    register(interp, promise, reaction)?;
    Ok(Value::Ref(derived))
}

/// Runs one dequeued reaction microtask and settles the derived promise
/// from its outcome.
pub(crate) fn run_reaction<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    derived: HeapId,
    handler: Option<Value>,
    value: Value,
    rejected: bool,
) -> RunResult<()> {
    match handler {
        None => {
            // Pass-through: the derived promise mirrors the settlement.
            if rejected {
                settle(interp, derived, value, true)
            } else {
                resolve_with(interp, derived, value)
            }
        }
        Some(handler) => match interp.call_function(handler, Value::Undefined, &[value]) {
            Ok(result) => resolve_with(interp, derived, result),
            Err(err) => {
                let reason = interp.error_to_value(err)?;
                settle(interp, derived, reason, true)
            }
        },
    }
}
