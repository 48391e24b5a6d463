//! Property access: get/set/delete/in, prototype walks, enumeration,
//! instanceof, and the host property-handler dispatch.

use crate::{
    error::{JsError, RunResult},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    tracer::VmTracer,
    types::{ObjectKind, PropValue, Property},
    value::Value,
};

use super::Interp;

/// A numeric key usable as a dense array index.
fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse().ok()
}

/// Largest gap a write past the dense end may leave before the array is
/// demoted and the index moves to the property table.
const FAST_ARRAY_GAP: usize = 256;

/// Length of a demoted array: the dense part or the highest indexed own
/// property, whichever reaches further.
fn sparse_length(obj: &crate::types::JsObject) -> usize {
    let dense = obj.elements().map_or(0, Vec::len);
    let sparse = obj
        .props
        .keys()
        .filter_map(|key| array_index(key))
        .map(|index| index + 1)
        .max()
        .unwrap_or(0);
    dense.max(sparse)
}

impl<P: PrintWriter, T: VmTracer> Interp<'_, P, T> {
    /// Converts an arbitrary key value and looks the property up.
    pub(crate) fn get_property_by_value(&mut self, target: Value, key: Value) -> RunResult<Option<Value>> {
        // Fast-array path for numeric keys; demoted arrays fall through to
        // the by-name walk so indices in the property table resolve.
        if let (Value::Ref(id), Value::Number(n)) = (target, key) {
            if n.fract() == 0.0 && n >= 0.0 {
                if let Some(obj) = self.heap.try_object(id) {
                    if obj.fast_array {
                        if let Some(elements) = obj.elements() {
                            let index = n as usize;
                            if index < elements.len() {
                                let value = elements[index];
                                if !matches!(value, Value::Hole) {
                                    return Ok(Some(value));
                                }
                            }
                            return Ok(None);
                        }
                    }
                }
            }
        }
        let key = self.to_js_string(key)?;
        self.get_property(target, &key)
    }

    /// Property lookup with the full prototype-chain walk. `None` means the
    /// property is absent (distinct from holding `undefined`).
    pub(crate) fn get_property(&mut self, target: Value, key: &str) -> RunResult<Option<Value>> {
        match target {
            Value::Undefined | Value::Hole => {
                Err(JsError::type_error(format!("cannot read property \"{key}\" of undefined")).into())
            }
            Value::Null => Err(JsError::type_error(format!("cannot read property \"{key}\" of null")).into()),
            Value::Number(_) => self.lookup_on_object(self.protos.number, target, key),
            Value::Bool(_) => self.lookup_on_object(self.protos.boolean, target, key),
            Value::Builtin(_) => Ok(None),
            Value::Str(_) => self.string_property(target, key),
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Str(_) => self.string_property(target, key),
                HeapData::Slab(_) => Err(JsError::internal("slab escaped into property access").into()),
                HeapData::Object(_) => self.object_property(id, target, key),
            },
        }
    }

    /// String values: `length`, one-character indexing, then the String
    /// prototype.
    fn string_property(&mut self, target: Value, key: &str) -> RunResult<Option<Value>> {
        let text = self.value_str(target).expect("string target");
        if key == "length" {
            let length = text.chars().count();
            return Ok(Some(Value::Number(length as f64)));
        }
        if let Some(index) = array_index(key) {
            let picked: Option<char> = text.chars().nth(index);
            return match picked {
                Some(ch) => Ok(Some(self.string_value(ch.to_string())?)),
                None => Ok(None),
            };
        }
        self.lookup_on_object(self.protos.string, target, key)
    }

    /// Ref-target lookup: own table, kind-specific intrinsics, then the
    /// prototype chain.
    fn object_property(&mut self, id: HeapId, target: Value, key: &str) -> RunResult<Option<Value>> {
        // Kind intrinsics first.
        let intrinsic = {
            let obj = self.heap.object(id);
            match &obj.kind {
                ObjectKind::Array(elements) => {
                    if key == "length" {
                        let length = if obj.fast_array { elements.len() } else { sparse_length(obj) };
                        Some(Value::Number(length as f64))
                    } else if let Some(index) = array_index(key) {
                        match elements.get(index) {
                            Some(&value) if !matches!(value, Value::Hole) => Some(value),
                            // A demoted array may hold the index as an own
                            // property; let the normal walk find it.
                            _ if !obj.fast_array => None,
                            _ => return Ok(None),
                        }
                    } else {
                        None
                    }
                }
                ObjectKind::Regexp(re) => match key {
                    "source" => {
                        let source = re.source.clone();
                        return Ok(Some(self.string_value(source)?));
                    }
                    "flags" => {
                        let flags = re.flags.to_flag_string();
                        return Ok(Some(self.string_value(flags)?));
                    }
                    "global" => Some(Value::Bool(re.flags.global)),
                    "ignoreCase" => Some(Value::Bool(re.flags.ignore_case)),
                    "multiline" => Some(Value::Bool(re.flags.multiline)),
                    _ => None,
                },
                ObjectKind::External { proto, token } => {
                    let (proto, token) = (*proto, *token);
                    return self.external_property(id, proto, token, key);
                }
                ObjectKind::Function(f) => {
                    let lambda = &self.program.lambdas[f.lambda.index()];
                    match key {
                        "length" => Some(Value::Number(f64::from(lambda.param_count))),
                        "name" => {
                            let name = lambda.name;
                            if self.heap.object(id).own("name").is_none() {
                                return Ok(Some(Value::Str(name)));
                            }
                            None
                        }
                        _ => None,
                    }
                }
                _ => None,
            }
        };
        if let Some(value) = intrinsic {
            return Ok(Some(value));
        }

        // The global object exposes the global scope's slab variables.
        if id == self.global_object {
            if let Some(slot) = self.global_slab_slot(key) {
                let value = self.heap.slab(self.globals)[slot as usize];
                return Ok(Some(value.dehole()));
            }
        }

        // Functions materialize `prototype` on first access.
        if key == "prototype" {
            let is_function = matches!(self.heap.object(id).kind, ObjectKind::Function(_) | ObjectKind::Native(_));
            if is_function && self.heap.object(id).own("prototype").is_none() {
                let proto_obj = {
                    let mut obj = crate::types::JsObject::plain(Some(self.protos.object));
                    obj.define("constructor", Property::hidden(target));
                    self.heap.alloc_object(obj)?
                };
                self.heap
                    .object_mut(id)
                    .define("prototype", Property::hidden(Value::Ref(proto_obj)));
            }
        }

        self.lookup_on_object(id, target, key)
    }

    /// Walks the chain starting at `start`, invoking getters against the
    /// original receiver.
    fn lookup_on_object(&mut self, start: HeapId, receiver: Value, key: &str) -> RunResult<Option<Value>> {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let obj = self.heap.object(id);
            if let Some(prop) = obj.own(key) {
                return match &prop.value {
                    PropValue::Data(value) => Ok(Some(*value)),
                    PropValue::Accessor { getter, .. } => match getter {
                        Some(getter) => {
                            let getter = *getter;
                            Ok(Some(self.call_function(getter, receiver, &[])?))
                        }
                        None => Ok(Some(Value::Undefined)),
                    },
                };
            }
            cursor = obj.proto;
        }
        Ok(None)
    }

    /// Slab offset of a declared global-scope variable.
    fn global_slab_slot(&self, key: &str) -> Option<u32> {
        let program = self.program;
        program
            .global_names
            .iter()
            .find(|(sid, _)| program.interns.get(*sid) == key)
            .map(|&(_, slot)| slot)
    }

    /// Host-backed object lookup: descriptor table, then handler dispatch.
    /// A `None` from the handler (DECLINED) means "property absent".
    fn external_property(&mut self, _id: HeapId, proto: u32, token: u64, key: &str) -> RunResult<Option<Value>> {
        let Some(entry_index) = self.externals.find(proto, key) else {
            return Ok(None);
        };
        let descriptor = self.externals.descriptor(proto, entry_index);
        match descriptor.kind {
            crate::run::ExternalKind::Property => {
                let result = self
                    .externals
                    .handler(proto)
                    .property(token, key, descriptor.magic32)
                    .map_err(|message| JsError::type_error(message))?;
                match result {
                    Some(object) => Ok(Some(self.import_object(&object)?)),
                    None => Ok(None),
                }
            }
            crate::run::ExternalKind::Method => {
                let bound = crate::types::BoundNative::ExternalMethod {
                    proto,
                    entry: entry_index,
                    token,
                };
                let obj = crate::types::JsObject::new(ObjectKind::Bound(bound), Some(self.protos.function));
                Ok(Some(Value::Ref(self.heap.alloc_object(obj)?)))
            }
        }
    }

    /// Converts a key value and stores a property.
    pub(crate) fn set_property_by_value(&mut self, target: Value, key: Value, value: Value) -> RunResult<()> {
        if let (Value::Ref(id), Value::Number(n)) = (target, key) {
            if n.fract() == 0.0 && n >= 0.0 && self.heap.try_object(id).is_some_and(|o| o.elements().is_some()) {
                self.set_array_element(id, n as usize, value);
                return Ok(());
            }
        }
        let key = self.to_js_string(key)?;
        self.set_property(target, &key, value)
    }

    /// First mutation of an engine-installed object claims the session's
    /// private copy. Under deep-copied arenas the copy already exists, so
    /// the claim clears the bit; clones never observe each other's writes.
    fn claim_shared(&mut self, id: HeapId) {
        let obj = self.heap.object_mut(id);
        if obj.shared {
            obj.shared = false;
        }
    }

    /// Indexed array store. In-range and near-the-end writes stay dense;
    /// a write far past the end demotes the array and parks the index in
    /// the property table instead of materializing a run of holes.
    fn set_array_element(&mut self, id: HeapId, index: usize, value: Value) {
        self.claim_shared(id);
        let obj = self.heap.object_mut(id);
        let len = obj.elements().map_or(0, Vec::len);
        if index < len {
            obj.elements_mut().expect("checked array")[index] = value;
            return;
        }
        if obj.fast_array && index <= len + FAST_ARRAY_GAP {
            let elements = obj.elements_mut().expect("checked array");
            elements.resize(index + 1, Value::Hole);
            elements[index] = value;
        } else {
            obj.fast_array = false;
            obj.define(index.to_string(), Property::data(value));
        }
    }

    /// Property store. Setters on the chain win; otherwise an own data
    /// property is created or overwritten. Stores to primitives are
    /// silently dropped, as in sloppy-mode JS.
    pub(crate) fn set_property(&mut self, target: Value, key: &str, value: Value) -> RunResult<()> {
        let Value::Ref(id) = target else {
            if target.is_nullish() {
                return Err(JsError::type_error(format!("cannot set property \"{key}\" of undefined")).into());
            }
            return Ok(());
        };
        let HeapData::Object(_) = self.heap.get(id) else {
            return Ok(());
        };

        // Writes to a declared global land in the slab it lives in.
        if id == self.global_object {
            if let Some(slot) = self.global_slab_slot(key) {
                let globals = self.globals;
                self.heap.slab_mut(globals)[slot as usize] = value;
                return Ok(());
            }
        }

        match &self.heap.object(id).kind {
            ObjectKind::Array(_) => {
                if key == "length" {
                    let length = self.to_number(value)? as usize;
                    self.claim_shared(id);
                    let elements = self.heap.object_mut(id).elements_mut().expect("checked array");
                    elements.resize(length, Value::Hole);
                    return Ok(());
                }
                if let Some(index) = array_index(key) {
                    self.set_array_element(id, index, value);
                    return Ok(());
                }
            }
            ObjectKind::External { proto, token } => {
                let (proto, token) = (*proto, *token);
                if let Some(entry) = self.externals.find(proto, key) {
                    let descriptor = self.externals.descriptor(proto, entry);
                    if !descriptor.writable {
                        return Ok(());
                    }
                    let exported = self.export_value(value)?;
                    self.externals
                        .handler(proto)
                        .set_property(token, key, &exported)
                        .map_err(|message| JsError::type_error(message))?;
                    return Ok(());
                }
            }
            _ => {}
        }

        // A setter anywhere on the chain intercepts the store.
        let mut cursor = Some(id);
        while let Some(cur) = cursor {
            let obj = self.heap.object(cur);
            if let Some(prop) = obj.own(key) {
                match &prop.value {
                    PropValue::Accessor { setter, .. } => {
                        return match setter {
                            Some(setter) => {
                                let setter = *setter;
                                self.call_function(setter, target, &[value])?;
                                Ok(())
                            }
                            None => Ok(()),
                        };
                    }
                    PropValue::Data(_) => {
                        if cur == id {
                            if !prop.writable {
                                return Ok(());
                            }
                            self.claim_shared(cur);
                            let obj = self.heap.object_mut(cur);
                            if let Some(own) = obj.props.get_mut(key) {
                                own.value = PropValue::Data(value);
                            }
                            return Ok(());
                        }
                        break;
                    }
                }
            }
            cursor = obj.proto;
        }

        if !self.heap.object(id).extensible {
            return Ok(());
        }
        self.claim_shared(id);
        self.heap.object_mut(id).define(key, Property::data(value));
        Ok(())
    }

    /// Object-literal property definition: plain data define, except that a
    /// literal `__proto__` key sets the prototype link instead.
    pub(crate) fn init_property(&mut self, id: HeapId, key: &str, value: Value) -> RunResult<()> {
        if key == "__proto__" {
            match value {
                Value::Ref(proto) if matches!(self.heap.get(proto), HeapData::Object(_)) => {
                    self.heap.object_mut(id).proto = Some(proto);
                }
                Value::Null => self.heap.object_mut(id).proto = None,
                _ => {}
            }
            return Ok(());
        }
        if let Some(index) = array_index(key) {
            if self.heap.object(id).elements().is_some() {
                self.set_array_element(id, index, value);
                return Ok(());
            }
        }
        self.heap.object_mut(id).define(key, Property::data(value));
        Ok(())
    }

    /// Getter/setter definition in an object literal; a second accessor for
    /// the same key fills in the missing half.
    pub(crate) fn init_accessor(&mut self, id: HeapId, key: &str, getter: Option<Value>, setter: Option<Value>) {
        let obj = self.heap.object_mut(id);
        if let Some(existing) = obj.props.get_mut(key) {
            if let PropValue::Accessor {
                getter: ref mut existing_get,
                setter: ref mut existing_set,
            } = existing.value
            {
                if getter.is_some() {
                    *existing_get = getter;
                }
                if setter.is_some() {
                    *existing_set = setter;
                }
                return;
            }
        }
        obj.define(key, Property::accessor(getter, setter));
    }

    /// `delete obj[key]`.
    pub(crate) fn delete_property(&mut self, target: Value, key: Value) -> RunResult<bool> {
        let Value::Ref(id) = target else { return Ok(true) };
        if !matches!(self.heap.get(id), HeapData::Object(_)) {
            return Ok(true);
        }
        let key = self.to_js_string(key)?;
        self.delete_property_raw(id, &key)
    }

    pub(crate) fn delete_property_raw(&mut self, id: HeapId, key: &str) -> RunResult<bool> {
        if let Some(index) = array_index(key) {
            // In-range dense deletes punch a hole; a demoted index falls
            // through to ordinary own-property removal below.
            let in_dense = self
                .heap
                .try_object(id)
                .and_then(crate::types::JsObject::elements)
                .is_some_and(|elements| index < elements.len());
            if in_dense {
                self.claim_shared(id);
                self.heap.object_mut(id).elements_mut().expect("checked array")[index] = Value::Hole;
                return Ok(true);
            }
        }
        match self.heap.object(id).own(key) {
            Some(prop) if !prop.configurable => Ok(false),
            Some(_) => {
                self.claim_shared(id);
                self.heap.object_mut(id).props.shift_remove(key);
                Ok(true)
            }
            None => Ok(true),
        }
    }

    /// Enumerable keys for `for..in`: own keys first (array indices before
    /// named properties), then the prototype chain, deduplicated.
    pub(crate) fn enumerate_keys(&mut self, target: Value) -> RunResult<Vec<String>> {
        let mut keys = Vec::new();
        let Value::Ref(start) = target else {
            if let Some(text) = self.value_str(target) {
                return Ok((0..text.chars().count()).map(|i| i.to_string()).collect());
            }
            return Ok(keys);
        };
        if !matches!(self.heap.get(start), HeapData::Object(_)) {
            if let Some(text) = self.value_str(target) {
                return Ok((0..text.chars().count()).map(|i| i.to_string()).collect());
            }
            return Ok(keys);
        }
        let mut seen = ahash::AHashSet::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            let obj = self.heap.object(id);
            if let ObjectKind::Array(elements) = &obj.kind {
                for (index, element) in elements.iter().enumerate() {
                    if !matches!(element, Value::Hole) {
                        let key = index.to_string();
                        if seen.insert(key.clone()) {
                            keys.push(key);
                        }
                    }
                }
            }
            if let ObjectKind::External { proto, token } = &obj.kind {
                let (proto, token) = (*proto, *token);
                for key in self.externals.handler(proto).keys(token) {
                    if seen.insert(key.clone()) {
                        keys.push(key);
                    }
                }
                cursor = self.heap.object(id).proto;
                continue;
            }
            for (key, prop) in &obj.props {
                if prop.enumerable && seen.insert(key.clone()) {
                    keys.push(key.clone());
                }
            }
            cursor = obj.proto;
        }
        Ok(keys)
    }

    /// `value instanceof ctor`: walks value's prototype chain looking for
    /// ctor's `prototype` object.
    pub(crate) fn instance_of(&mut self, value: Value, ctor: Value) -> RunResult<bool> {
        let callable = match ctor {
            Value::Builtin(_) => true,
            Value::Ref(id) => self.heap.try_object(id).is_some_and(crate::types::JsObject::is_callable),
            _ => false,
        };
        if !callable {
            return Err(JsError::type_error("right-hand side of \"instanceof\" is not callable").into());
        }
        let Some(target_proto) = (match self.get_property(ctor, "prototype") {
            Ok(Some(Value::Ref(id))) => Some(id),
            _ => None,
        }) else {
            return Ok(false);
        };
        let Value::Ref(id) = value else { return Ok(false) };
        if !matches!(self.heap.get(id), HeapData::Object(_)) {
            return Ok(false);
        }
        let mut cursor = self.heap.object(id).proto;
        while let Some(proto) = cursor {
            if proto == target_proto {
                return Ok(true);
            }
            cursor = self.heap.object(proto).proto;
        }
        Ok(false)
    }

    /// The length of an array-kind object.
    pub(crate) fn array_length(&self, id: HeapId) -> Option<usize> {
        self.heap.try_object(id).and_then(|o| o.elements().map(Vec::len))
    }

    /// Own enumerable keys only — the `Object.keys` contract, insertion
    /// order with array indices first.
    pub(crate) fn enumerate_own_keys(&mut self, target: Value) -> RunResult<Vec<String>> {
        let mut keys = Vec::new();
        let Value::Ref(id) = target else { return Ok(keys) };
        let Some(obj) = self.heap.try_object(id) else { return Ok(keys) };
        if let ObjectKind::Array(elements) = &obj.kind {
            for (index, element) in elements.iter().enumerate() {
                if !matches!(element, Value::Hole) {
                    keys.push(index.to_string());
                }
            }
        }
        if let ObjectKind::External { proto, token } = &obj.kind {
            let (proto, token) = (*proto, *token);
            return Ok(self.externals.handler(proto).keys(token));
        }
        for (key, prop) in &obj.props {
            if prop.enumerable {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }
}
