//! The memory manager: typed arenas, string interning, and mark-sweep
//! collection.

use hashbrown::HashMap;
use log::debug;

use crate::chunk::Chunk;
use crate::memory::{GcRef, Trace, Tracer};
use crate::object::{
    NativeHandler, ObjArray, ObjBoundMethod, ObjClass, ObjClosure, ObjFunctionProto, ObjHashTable,
    ObjInstance, ObjModule, ObjNativeFunction, ObjString, ObjUpvalue, UpvalueDesc,
};
use crate::value::Value;

/// Collection is first considered once this many objects are live.
const INITIAL_GC_THRESHOLD: usize = 1024;

/// One slab of objects of a single kind, with parallel mark bits and a free
/// list. Allocating registers the object with the collector by construction.
struct Arena<T> {
    slots: Vec<Option<T>>,
    marks: Vec<bool>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Arena<T> {
    fn alloc(&mut self, object: T) -> GcRef<T> {
        match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(object);
                self.marks[index as usize] = false;
                GcRef::new(index)
            }
            None => {
                self.slots.push(Some(object));
                self.marks.push(false);
                GcRef::new((self.slots.len() - 1) as u32)
            }
        }
    }

    fn get(&self, handle: GcRef<T>) -> &T {
        self.slots[handle.index()]
            .as_ref()
            .expect("dangling object handle")
    }

    fn get_mut(&mut self, handle: GcRef<T>) -> &mut T {
        self.slots[handle.index()]
            .as_mut()
            .expect("dangling object handle")
    }

    fn contains(&self, handle: GcRef<T>) -> bool {
        self.slots
            .get(handle.index())
            .map_or(false, |slot| slot.is_some())
    }

    fn clear_marks(&mut self) {
        for mark in &mut self.marks {
            *mark = false;
        }
    }

    /// Marks a slot; returns `true` if it was unmarked before (the caller
    /// then traces its contents).
    fn mark(&mut self, handle: GcRef<T>) -> bool {
        let index = handle.index();
        if self.marks[index] {
            false
        } else {
            self.marks[index] = true;
            true
        }
    }

    fn sweep(&mut self) -> usize {
        let mut live = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].is_none() {
                continue;
            }
            if self.marks[index] {
                live += 1;
            } else {
                self.slots[index] = None;
                self.free.push(index as u32);
            }
        }
        live
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Owns every heap object and hands out [`GcRef`] handles.
///
/// Allocation itself never collects: the execution engine checks
/// [`MemoryManager::should_collect`] between instructions and calls
/// [`MemoryManager::collect`] with the current root set, so a collection can
/// never observe a half-published object mid-instruction.
impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager").finish_non_exhaustive()
    }
}

pub struct MemoryManager {
    strings: Arena<ObjString>,
    arrays: Arena<ObjArray>,
    hash_tables: Arena<ObjHashTable>,
    classes: Arena<ObjClass>,
    instances: Arena<ObjInstance>,
    bound_methods: Arena<ObjBoundMethod>,
    upvalues: Arena<ObjUpvalue>,
    protos: Arena<ObjFunctionProto>,
    closures: Arena<ObjClosure>,
    natives: Arena<ObjNativeFunction>,
    modules: Arena<ObjModule>,

    intern_pool: HashMap<Box<str>, GcRef<ObjString>>,

    allocated: usize,
    threshold: usize,
    gc_paused: usize,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            strings: Arena::default(),
            arrays: Arena::default(),
            hash_tables: Arena::default(),
            classes: Arena::default(),
            instances: Arena::default(),
            bound_methods: Arena::default(),
            upvalues: Arena::default(),
            protos: Arena::default(),
            closures: Arena::default(),
            natives: Arena::default(),
            modules: Arena::default(),
            intern_pool: HashMap::new(),
            allocated: 0,
            threshold: INITIAL_GC_THRESHOLD,
            gc_paused: 0,
        }
    }

    // --- Allocation ---

    /// Interning constructor: byte-equal strings share one object for the
    /// VM's lifetime.
    pub fn new_string(&mut self, content: &str) -> GcRef<ObjString> {
        if let Some(existing) = self.intern_pool.get(content) {
            return *existing;
        }
        let handle = self.strings.alloc(ObjString::new(content));
        self.allocated += 1;
        self.intern_pool.insert(content.into(), handle);
        handle
    }

    pub fn new_array(&mut self, elements: Vec<Value>) -> GcRef<ObjArray> {
        self.allocated += 1;
        self.arrays.alloc(ObjArray::new(elements))
    }

    pub fn new_hash_table(
        &mut self,
        entries: HashMap<GcRef<ObjString>, Value>,
    ) -> GcRef<ObjHashTable> {
        self.allocated += 1;
        self.hash_tables.alloc(ObjHashTable::new(entries))
    }

    pub fn new_class(&mut self, name: GcRef<ObjString>) -> GcRef<ObjClass> {
        self.allocated += 1;
        self.classes.alloc(ObjClass::new(name))
    }

    pub fn new_instance(&mut self, class: GcRef<ObjClass>) -> GcRef<ObjInstance> {
        self.allocated += 1;
        self.instances.alloc(ObjInstance::new(class))
    }

    pub fn new_bound_method(
        &mut self,
        receiver: GcRef<ObjInstance>,
        method: GcRef<ObjClosure>,
    ) -> GcRef<ObjBoundMethod> {
        self.allocated += 1;
        self.bound_methods.alloc(ObjBoundMethod::new(receiver, method))
    }

    /// A fresh upvalue, open over an absolute register slot.
    pub fn new_upvalue(&mut self, slot: usize) -> GcRef<ObjUpvalue> {
        self.allocated += 1;
        self.upvalues.alloc(ObjUpvalue::open(slot))
    }

    pub fn new_proto(
        &mut self,
        num_registers: usize,
        num_upvalues: usize,
        name: GcRef<ObjString>,
        chunk: Chunk,
        upvalue_descs: Vec<UpvalueDesc>,
    ) -> GcRef<ObjFunctionProto> {
        self.allocated += 1;
        self.protos.alloc(ObjFunctionProto::new(
            num_registers,
            num_upvalues,
            name,
            chunk,
            upvalue_descs,
        ))
    }

    pub fn new_closure(
        &mut self,
        proto: GcRef<ObjFunctionProto>,
        upvalues: Vec<GcRef<ObjUpvalue>>,
        module: GcRef<ObjModule>,
    ) -> GcRef<ObjClosure> {
        self.allocated += 1;
        self.closures.alloc(ObjClosure::new(proto, upvalues, module))
    }

    pub fn new_native(&mut self, name: &str, handler: NativeHandler) -> GcRef<ObjNativeFunction> {
        self.allocated += 1;
        self.natives.alloc(ObjNativeFunction::new(name, handler))
    }

    pub fn new_bound_native(
        &mut self,
        name: &str,
        handler: NativeHandler,
        receiver: Value,
    ) -> GcRef<ObjNativeFunction> {
        self.allocated += 1;
        self.natives
            .alloc(ObjNativeFunction::bound(name, handler, receiver))
    }

    pub fn new_module(
        &mut self,
        file_name: GcRef<ObjString>,
        file_path: GcRef<ObjString>,
        main_proto: Option<GcRef<ObjFunctionProto>>,
    ) -> GcRef<ObjModule> {
        self.allocated += 1;
        self.modules
            .alloc(ObjModule::new(file_name, file_path, main_proto))
    }

    // --- Access ---

    pub fn string(&self, handle: GcRef<ObjString>) -> &ObjString {
        self.strings.get(handle)
    }

    pub fn array(&self, handle: GcRef<ObjArray>) -> &ObjArray {
        self.arrays.get(handle)
    }

    pub fn array_mut(&mut self, handle: GcRef<ObjArray>) -> &mut ObjArray {
        self.arrays.get_mut(handle)
    }

    pub fn hash_table(&self, handle: GcRef<ObjHashTable>) -> &ObjHashTable {
        self.hash_tables.get(handle)
    }

    pub fn hash_table_mut(&mut self, handle: GcRef<ObjHashTable>) -> &mut ObjHashTable {
        self.hash_tables.get_mut(handle)
    }

    pub fn class(&self, handle: GcRef<ObjClass>) -> &ObjClass {
        self.classes.get(handle)
    }

    pub fn class_mut(&mut self, handle: GcRef<ObjClass>) -> &mut ObjClass {
        self.classes.get_mut(handle)
    }

    pub fn instance(&self, handle: GcRef<ObjInstance>) -> &ObjInstance {
        self.instances.get(handle)
    }

    pub fn instance_mut(&mut self, handle: GcRef<ObjInstance>) -> &mut ObjInstance {
        self.instances.get_mut(handle)
    }

    pub fn bound_method(&self, handle: GcRef<ObjBoundMethod>) -> &ObjBoundMethod {
        self.bound_methods.get(handle)
    }

    pub fn upvalue(&self, handle: GcRef<ObjUpvalue>) -> &ObjUpvalue {
        self.upvalues.get(handle)
    }

    pub fn upvalue_mut(&mut self, handle: GcRef<ObjUpvalue>) -> &mut ObjUpvalue {
        self.upvalues.get_mut(handle)
    }

    pub fn proto(&self, handle: GcRef<ObjFunctionProto>) -> &ObjFunctionProto {
        self.protos.get(handle)
    }

    pub fn proto_mut(&mut self, handle: GcRef<ObjFunctionProto>) -> &mut ObjFunctionProto {
        self.protos.get_mut(handle)
    }

    pub fn closure(&self, handle: GcRef<ObjClosure>) -> &ObjClosure {
        self.closures.get(handle)
    }

    pub fn native(&self, handle: GcRef<ObjNativeFunction>) -> &ObjNativeFunction {
        self.natives.get(handle)
    }

    pub fn module(&self, handle: GcRef<ObjModule>) -> &ObjModule {
        self.modules.get(handle)
    }

    pub fn module_mut(&mut self, handle: GcRef<ObjModule>) -> &mut ObjModule {
        self.modules.get_mut(handle)
    }

    /// Whether an interned string is still live; tests use this to watch
    /// the collector's behaviour.
    pub fn string_is_live(&self, handle: GcRef<ObjString>) -> bool {
        self.strings.contains(handle)
    }

    /// Whether an array is still live.
    pub fn array_is_live(&self, handle: GcRef<ObjArray>) -> bool {
        self.arrays.contains(handle)
    }

    /// Total live objects across every arena.
    pub fn live_object_count(&self) -> usize {
        self.strings.live_count()
            + self.arrays.live_count()
            + self.hash_tables.live_count()
            + self.classes.live_count()
            + self.instances.live_count()
            + self.bound_methods.live_count()
            + self.upvalues.live_count()
            + self.protos.live_count()
            + self.closures.live_count()
            + self.natives.live_count()
            + self.modules.live_count()
    }

    /// Number of distinct interned strings.
    pub fn intern_pool_size(&self) -> usize {
        self.intern_pool.len()
    }

    /// The canonical handle for `content`, if it has been interned.
    pub fn find_interned(&self, content: &str) -> Option<GcRef<ObjString>> {
        self.intern_pool.get(content).copied()
    }

    // --- GC control ---

    /// Suppresses collection. Pauses nest; each `disable_gc` must be paired
    /// with an `enable_gc`.
    pub fn disable_gc(&mut self) {
        self.gc_paused += 1;
    }

    /// Releases one level of pause.
    pub fn enable_gc(&mut self) {
        debug_assert!(self.gc_paused > 0, "enable_gc without matching disable");
        self.gc_paused = self.gc_paused.saturating_sub(1);
    }

    /// Scoped pause: collection stays disabled for the duration of `f` and
    /// the prior state is restored on every exit path.
    pub fn with_gc_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.disable_gc();
        let result = f(self);
        self.enable_gc();
        result
    }

    pub fn gc_enabled(&self) -> bool {
        self.gc_paused == 0
    }

    /// Trigger policy: allocation count reached the threshold and no pause
    /// is active.
    pub fn should_collect(&self) -> bool {
        self.gc_enabled() && self.allocated >= self.threshold
    }

    // --- Collection ---

    /// Mark-sweep over every arena, starting from `roots`. Returns the
    /// surviving object count, which becomes the new allocation count. The
    /// threshold doubles, floored at twice the live set, so growing working
    /// sets do not thrash.
    pub fn collect(&mut self, roots: &[Value]) -> usize {
        let before = self.allocated;
        self.clear_marks();

        let mut tracer = Tracer::new();
        for root in roots {
            tracer.visit_value(*root);
        }
        while let Some(value) = tracer.pop() {
            self.mark_and_trace(value, &mut tracer);
        }

        let live = self.sweep();
        self.allocated = live;
        self.threshold = std::cmp::max(self.threshold * 2, live * 2);
        debug!(
            "gc: {} -> {} objects, next threshold {}",
            before, live, self.threshold
        );
        live
    }

    fn clear_marks(&mut self) {
        self.strings.clear_marks();
        self.arrays.clear_marks();
        self.hash_tables.clear_marks();
        self.classes.clear_marks();
        self.instances.clear_marks();
        self.bound_methods.clear_marks();
        self.upvalues.clear_marks();
        self.protos.clear_marks();
        self.closures.clear_marks();
        self.natives.clear_marks();
        self.modules.clear_marks();
    }

    fn mark_and_trace(&mut self, value: Value, tracer: &mut Tracer) {
        match value {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => {}
            Value::String(r) => {
                self.strings.mark(r);
            }
            Value::Array(r) => {
                if self.arrays.mark(r) {
                    self.arrays.get(r).trace(tracer);
                }
            }
            Value::HashTable(r) => {
                if self.hash_tables.mark(r) {
                    self.hash_tables.get(r).trace(tracer);
                }
            }
            Value::Class(r) => {
                if self.classes.mark(r) {
                    self.classes.get(r).trace(tracer);
                }
            }
            Value::Instance(r) => {
                if self.instances.mark(r) {
                    self.instances.get(r).trace(tracer);
                }
            }
            Value::BoundMethod(r) => {
                if self.bound_methods.mark(r) {
                    self.bound_methods.get(r).trace(tracer);
                }
            }
            Value::Upvalue(r) => {
                if self.upvalues.mark(r) {
                    self.upvalues.get(r).trace(tracer);
                }
            }
            Value::Proto(r) => {
                if self.protos.mark(r) {
                    self.protos.get(r).trace(tracer);
                }
            }
            Value::Closure(r) => {
                if self.closures.mark(r) {
                    self.closures.get(r).trace(tracer);
                }
            }
            Value::NativeFn(r) => {
                if self.natives.mark(r) {
                    self.natives.get(r).trace(tracer);
                }
            }
            Value::Module(r) => {
                if self.modules.mark(r) {
                    self.modules.get(r).trace(tracer);
                }
            }
        }
    }

    fn sweep(&mut self) -> usize {
        let live = self.strings.sweep()
            + self.arrays.sweep()
            + self.hash_tables.sweep()
            + self.classes.sweep()
            + self.instances.sweep()
            + self.bound_methods.sweep()
            + self.upvalues.sweep()
            + self.protos.sweep()
            + self.closures.sweep()
            + self.natives.sweep()
            + self.modules.sweep();

        // Dead interned strings must leave the pool, or a later
        // `new_string` would hand out a dangling handle.
        let strings = &self.strings;
        self.intern_pool.retain(|_, handle| strings.contains(*handle));

        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_returns_identical_handles() {
        let mut heap = MemoryManager::new();
        let a = heap.new_string("hello");
        let b = heap.new_string("hello");
        let c = heap.new_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.intern_pool_size(), 2);
    }

    #[test]
    fn test_collect_frees_unreachable_objects() {
        let mut heap = MemoryManager::new();
        let keep = heap.new_array(vec![Value::Int(1)]);
        let drop1 = heap.new_array(vec![Value::Int(2)]);
        let _drop2 = heap.new_array(Vec::new());

        let roots = [Value::Array(keep)];
        let live = heap.collect(&roots);

        assert_eq!(live, 1);
        assert!(heap.array_is_live(keep));
        assert!(!heap.array_is_live(drop1));
    }

    #[test]
    fn test_collect_traces_through_arrays() {
        let mut heap = MemoryManager::new();
        let inner = heap.new_string("payload");
        let outer = heap.new_array(vec![Value::String(inner)]);
        let _garbage = heap.new_string("garbage");

        let roots = [Value::Array(outer)];
        let live = heap.collect(&roots);

        assert_eq!(live, 2);
        assert!(heap.string_is_live(inner));
        assert_eq!(heap.intern_pool_size(), 1);
    }

    #[test]
    fn test_dead_interned_strings_leave_the_pool() {
        let mut heap = MemoryManager::new();
        let doomed = heap.new_string("doomed");
        assert_eq!(heap.intern_pool_size(), 1);

        heap.collect(&[]);
        assert!(!heap.string_is_live(doomed));
        assert_eq!(heap.intern_pool_size(), 0);

        // Reallocating after the prune must produce a fresh live object.
        let reborn = heap.new_string("doomed");
        assert!(heap.string_is_live(reborn));
    }

    #[test]
    fn test_collect_handles_cycles() {
        let mut heap = MemoryManager::new();
        // a -> b -> a
        let a = heap.new_array(Vec::new());
        let b = heap.new_array(vec![Value::Array(a)]);
        heap.array_mut(a).push(Value::Array(b));

        let live = heap.collect(&[Value::Array(a)]);
        assert_eq!(live, 2);

        let live = heap.collect(&[]);
        assert_eq!(live, 0);
        assert!(!heap.array_is_live(a));
        assert!(!heap.array_is_live(b));
    }

    #[test]
    fn test_gc_pause_nests() {
        let mut heap = MemoryManager::new();
        assert!(heap.gc_enabled());
        heap.disable_gc();
        heap.disable_gc();
        heap.enable_gc();
        assert!(!heap.gc_enabled());
        heap.enable_gc();
        assert!(heap.gc_enabled());

        let nested = heap.with_gc_disabled(|heap| {
            heap.with_gc_disabled(|heap| heap.gc_enabled())
        });
        assert!(!nested);
        assert!(heap.gc_enabled());
    }

    #[test]
    fn test_threshold_grows_after_collection() {
        let mut heap = MemoryManager::new();
        let keep = heap.new_array(Vec::new());
        heap.collect(&[Value::Array(keep)]);
        assert!(!heap.should_collect());
    }

    #[test]
    fn test_slot_reuse_after_sweep() {
        let mut heap = MemoryManager::new();
        let dead = heap.new_array(Vec::new());
        heap.collect(&[]);
        let fresh = heap.new_array(vec![Value::Int(9)]);
        // The freed slot is reused, so the handle indices coincide, but the
        // new object is the only live one.
        assert_eq!(dead.index(), fresh.index());
        assert_eq!(heap.live_object_count(), 1);
    }
}
