//! The Math namespace.

use crate::{
    bytecode::vm::Interp,
    error::{JsError, RunResult},
    io::PrintWriter,
    tracer::VmTracer,
    value::Value,
};

use super::Builtins;

pub(crate) fn call<P: PrintWriter, T: VmTracer>(
    interp: &mut Interp<'_, P, T>,
    builtin: Builtins,
    args: &[Value],
) -> RunResult<Value> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Undefined);
    let result = match builtin {
        Builtins::MathFloor => interp.to_number(arg(0))?.floor(),
        Builtins::MathCeil => interp.to_number(arg(0))?.ceil(),
        // JS rounds half-way cases toward +Infinity, unlike f64::round.
        Builtins::MathRound => {
            let n = interp.to_number(arg(0))?;
            (n + 0.5).floor()
        }
        Builtins::MathAbs => interp.to_number(arg(0))?.abs(),
        Builtins::MathMax | Builtins::MathMin => {
            let mut best = if builtin == Builtins::MathMax {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
            for &value in args {
                let n = interp.to_number(value)?;
                if n.is_nan() {
                    best = f64::NAN;
                    break;
                }
                best = if builtin == Builtins::MathMax { best.max(n) } else { best.min(n) };
            }
            best
        }
        Builtins::MathPow => {
            let base = interp.to_number(arg(0))?;
            let exp = interp.to_number(arg(1))?;
            base.powf(exp)
        }
        Builtins::MathSqrt => interp.to_number(arg(0))?.sqrt(),
        Builtins::MathRandom => rand::random::<f64>(),
        _ => return Err(JsError::internal("misrouted math builtin").into()),
    };
    Ok(Value::Number(result))
}
