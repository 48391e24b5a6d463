//! Runtime object kinds: plain objects, arrays, functions, errors, regexps,
//! dates, promises, and host-backed externals.

pub(crate) mod function;
pub(crate) mod object;
pub(crate) mod promise;
pub(crate) mod regexp;

pub(crate) use function::{FunctionId, JsFunction, Lambda};
pub(crate) use object::{BoundNative, JsObject, ObjectKind, PropMap, PropValue, Property};
pub(crate) use promise::{PromiseData, PromiseState, Reaction};
pub(crate) use regexp::{CompiledRegexp, RegexpFlags, RegexpObject};
