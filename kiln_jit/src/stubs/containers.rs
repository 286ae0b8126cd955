//! Container iteration stubs: `forEach` of the twelve container kinds plus
//! `replaceAllElements` of `ArrayList` and `Vector`.
//!
//! The callback receives `(value, key or index, container)` with the
//! caller's `thisArg`, and iteration stops at the first call that leaves an
//! exception pending. Kinds whose length can change under the callback
//! re-read it after every call, so removing the current element shortens
//! the walk.

use kiln_core::KilnResult;
use kiln_runtime::layout::{
    array_list, deque, hash_map, light_weight_map, light_weight_set, linked_node, object, plain_array, proxy, queue,
    stack, tagged_list, vector,
};
use kiln_runtime::{CommonStubId, ContainerKind, ContainersType, JsType, RuntimeStubId};

use super::{call_native_slow_path, StubEntry};
use crate::builder::CircuitBuilder;
use crate::call_signature::StubGenerator;
use crate::ir::{Circuit, GateRef, GateType, MachineType};

macro_rules! container_stubs {
    ($($ty:ident => $name:ident,)*) => {
        $(
            fn $name(circuit: &mut Circuit) -> KilnResult<()> {
                build_for_each(circuit, ContainersType::$ty)
            }
        )*

        pub(super) fn generator_for(ty: ContainersType) -> StubGenerator {
            match ty {
                $(ContainersType::$ty => $name,)*
            }
        }
    };
}

container_stubs! {
    VectorForEach => vector_for_each,
    VectorReplaceAllElements => vector_replace_all_elements,
    StackForEach => stack_for_each,
    PlainArrayForEach => plain_array_for_each,
    QueueForEach => queue_for_each,
    DequeForEach => deque_for_each,
    LightWeightMapForEach => light_weight_map_for_each,
    LightWeightSetForEach => light_weight_set_for_each,
    HashMapForEach => hash_map_for_each,
    HashSetForEach => hash_set_for_each,
    LinkedListForEach => linked_list_for_each,
    ListForEach => list_for_each,
    ArrayListForEach => array_list_for_each,
    ArrayListReplaceAllElements => array_list_replace_all_elements,
}

/// Operands shared by every iteration body.
#[derive(Clone, Copy)]
struct Iteration {
    obj: GateRef,
    callback: GateRef,
    this_arg: GateRef,
}

// =============================================================================
// Entry
// =============================================================================

fn build_for_each(circuit: &mut Circuit, ty: ContainersType) -> KilnResult<()> {
    let entry = StubEntry::of(circuit);
    let kind = ty.kind();
    let mut b = CircuitBuilder::new(circuit);
    let slow = b.new_label();

    // Receiver: the container itself or a proxy directly wrapping one.
    let receiver = entry.this;
    let obj = b.new_variable(MachineType::I64, GateType::Any, receiver);
    let receiver_ok = b.new_label();
    let try_proxy = b.new_label();
    let is_kind = b.tagged_is_object_type(receiver, kind.js_type());
    b.branch(is_kind, receiver_ok, try_proxy);
    b.bind(try_proxy);
    let unwrap = b.new_label();
    let is_proxy = b.tagged_is_object_type(receiver, JsType::JsProxy);
    b.branch(is_proxy, unwrap, slow);
    b.bind(unwrap);
    let target = b.load_field(receiver, proxy::TARGET_OFFSET);
    b.write(obj, target);
    let target_is_kind = b.tagged_is_object_type(target, kind.js_type());
    b.branch(target_is_kind, receiver_ok, slow);
    b.bind(receiver_ok);

    let callback = entry.args[0];
    let callable = b.new_label();
    let is_callable = b.tagged_is_callable(callback);
    b.branch(is_callable, callable, slow);
    b.bind(callable);

    let it = Iteration {
        obj: b.read(obj),
        callback,
        this_arg: entry.args[1],
    };
    match kind {
        ContainerKind::Queue => queue_loop(&mut b, it),
        ContainerKind::Deque => deque_loop(&mut b, it),
        ContainerKind::HashMap | ContainerKind::HashSet => hash_loop(&mut b, it, kind == ContainerKind::HashSet),
        ContainerKind::LinkedList | ContainerKind::List => list_loop(&mut b, it),
        ContainerKind::LightWeightMap | ContainerKind::LightWeightSet => light_weight_loop(&mut b, it, kind),
        ContainerKind::ArrayList | ContainerKind::Vector | ContainerKind::Stack | ContainerKind::PlainArray => {
            indexed_loop(&mut b, it, kind, ty.is_replace_all());
        }
    }
    let undefined = b.undefined();
    b.return_(undefined);

    // Wrong receivers and non-callable callbacks throw from the native body.
    b.bind(slow);
    let result = call_native_slow_path(&mut b, &entry);
    b.return_(result);
    Ok(())
}

// =============================================================================
// Loop Helpers
// =============================================================================

/// Call the callback and return its result if it left an exception.
fn invoke(b: &mut CircuitBuilder<'_>, it: Iteration, value: GateRef, key: GateRef) -> GateRef {
    let result = b.call_stub(CommonStubId::JSCallDispatch, &[it.callback, it.this_arg, value, key, it.obj]);
    bail_on_exception(b, result);
    result
}

fn bail_on_exception(b: &mut CircuitBuilder<'_>, result: GateRef) {
    let thrown = b.new_label();
    let ok = b.new_label();
    let pending = b.has_pending_exception();
    b.branch(pending, thrown, ok);
    b.bind(thrown);
    b.return_(result);
    b.bind(ok);
}

/// `for (k = 0; k < length; k++) body(k)`.
///
/// With `reread` the bound is loaded again after every body.
fn counted_loop<'a>(
    b: &mut CircuitBuilder<'a>,
    length_of: impl Fn(&mut CircuitBuilder<'a>) -> GateRef,
    reread: bool,
    body: impl FnOnce(&mut CircuitBuilder<'a>, GateRef),
) {
    let zero = b.int32(0);
    let k = b.new_variable(MachineType::I32, GateType::NJSValue, zero);
    let initial = length_of(b);
    let length = b.new_variable(MachineType::I32, GateType::NJSValue, initial);
    let head = b.new_label();
    let body_label = b.new_label();
    let exit = b.new_label();
    b.jump(head);
    b.loop_begin(head);
    let current = b.read(k);
    let bound = b.read(length);
    let more = b.int32_less_than(current, bound);
    b.branch(more, body_label, exit);
    b.bind(body_label);
    body(b, current);
    if reread {
        let bound = length_of(b);
        b.write(length, bound);
    }
    let one = b.int32(1);
    let next = b.int32_add(current, one);
    b.write(k, next);
    b.loop_end(head);
    b.bind(exit);
}

fn tagged_int_field(b: &mut CircuitBuilder<'_>, obj: GateRef, offset: u64) -> GateRef {
    let field = b.load_field(obj, offset);
    b.get_int32_of_tint(field)
}

/// Capacity of a ring buffer: the backing array length, at least one.
fn ring_capacity(b: &mut CircuitBuilder<'_>, elements: GateRef) -> GateRef {
    let len = b.tagged_array_length(elements);
    let zero = b.int32(0);
    let one = b.int32(1);
    let empty = b.int32_equal(len, zero);
    b.select(empty, one, len)
}

// =============================================================================
// Per-kind Iteration
// =============================================================================

fn indexed_length(b: &mut CircuitBuilder<'_>, obj: GateRef, kind: ContainerKind) -> GateRef {
    match kind {
        ContainerKind::ArrayList => tagged_int_field(b, obj, array_list::LENGTH_OFFSET),
        ContainerKind::Vector => b.load_at(MachineType::I32, obj, vector::ELEMENT_COUNT_OFFSET),
        ContainerKind::Stack => {
            let top = b.load_at(MachineType::I32, obj, stack::TOP_OFFSET);
            let one = b.int32(1);
            b.int32_add(top, one)
        }
        ContainerKind::PlainArray => tagged_int_field(b, obj, plain_array::LENGTH_OFFSET),
        ContainerKind::LightWeightMap => tagged_int_field(b, obj, light_weight_map::LENGTH_OFFSET),
        _ => tagged_int_field(b, obj, light_weight_set::LENGTH_OFFSET),
    }
}

/// `ArrayList`, `Vector`, `Stack` and `PlainArray`.
fn indexed_loop(b: &mut CircuitBuilder<'_>, it: Iteration, kind: ContainerKind, replace_all: bool) {
    let obj = it.obj;
    counted_loop(
        b,
        |b| indexed_length(b, obj, kind),
        true,
        |b, k| {
            let (value, key) = if kind == ContainerKind::PlainArray {
                let values = b.load_field(obj, plain_array::VALUES_OFFSET);
                let value = b.get_value_from_tagged_array(values, k);
                let keys = b.load_field(obj, plain_array::KEYS_OFFSET);
                (value, b.get_value_from_tagged_array(keys, k))
            } else {
                let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
                let value = b.get_value_from_tagged_array(elements, k);
                (value, b.int32_to_tagged(k))
            };
            let result = invoke(b, it, value, key);
            if replace_all {
                let length = indexed_length(b, obj, kind);
                let still_in = b.int32_less_than(k, length);
                let store = b.new_label();
                let done = b.new_label();
                b.branch(still_in, store, done);
                b.bind(store);
                let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
                b.set_value_to_tagged_array(elements, k, result);
                b.jump(done);
                b.bind(done);
            }
        },
    );
}

/// `LightWeightMap` and `LightWeightSet`; a set passes its value as key.
fn light_weight_loop(b: &mut CircuitBuilder<'_>, it: Iteration, kind: ContainerKind) {
    let obj = it.obj;
    let (keys_offset, values_offset) = if kind == ContainerKind::LightWeightMap {
        (light_weight_map::KEYS_OFFSET, light_weight_map::VALUES_OFFSET)
    } else {
        (light_weight_set::VALUES_OFFSET, light_weight_set::VALUES_OFFSET)
    };
    counted_loop(
        b,
        |b| indexed_length(b, obj, kind),
        true,
        |b, k| {
            let values = b.load_field(obj, values_offset);
            let value = b.get_value_from_tagged_array(values, k);
            let keys = b.load_field(obj, keys_offset);
            let key = b.get_value_from_tagged_array(keys, k);
            invoke(b, it, value, key);
        },
    );
}

/// `Queue`: a snapshot of the length, walking the ring from `front`.
fn queue_loop(b: &mut CircuitBuilder<'_>, it: Iteration) {
    let obj = it.obj;
    let front = b.load_at(MachineType::I32, obj, queue::FRONT_OFFSET);
    let position = b.new_variable(MachineType::I32, GateType::NJSValue, front);
    counted_loop(
        b,
        |b| {
            let front = b.load_at(MachineType::I32, obj, queue::FRONT_OFFSET);
            let tail = b.load_at(MachineType::I32, obj, queue::TAIL_OFFSET);
            let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
            let cap = ring_capacity(b, elements);
            let wrapped = b.int32_add(tail, cap);
            let distance = b.int32_sub(wrapped, front);
            b.int32_mod(distance, cap)
        },
        false,
        |b, k| {
            let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
            let current = b.read(position);
            let value = b.get_value_from_tagged_array(elements, current);
            let cap = ring_capacity(b, elements);
            let one = b.int32(1);
            let bumped = b.int32_add(current, one);
            let next = b.int32_mod(bumped, cap);
            b.write(position, next);
            let key = b.int32_to_tagged(k);
            invoke(b, it, value, key);
        },
    );
}

/// `Deque`: walk until `first` meets the `last` seen on entry.
fn deque_loop(b: &mut CircuitBuilder<'_>, it: Iteration) {
    let obj = it.obj;
    let first_init = b.load_at(MachineType::I32, obj, deque::FIRST_OFFSET);
    let last = b.load_at(MachineType::I32, obj, deque::LAST_OFFSET);
    let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
    let cap = ring_capacity(b, elements);
    let zero = b.int32(0);
    let first = b.new_variable(MachineType::I32, GateType::NJSValue, first_init);
    let index = b.new_variable(MachineType::I32, GateType::NJSValue, zero);
    let head = b.new_label();
    let body = b.new_label();
    let exit = b.new_label();
    b.jump(head);
    b.loop_begin(head);
    let current_first = b.read(first);
    let current_index = b.read(index);
    let more = b.int32_not_equal(current_first, last);
    b.branch(more, body, exit);
    b.bind(body);
    let base = b.load_at(MachineType::I32, obj, deque::FIRST_OFFSET);
    let elements = b.load_field(obj, object::ELEMENTS_OFFSET);
    let ring = ring_capacity(b, elements);
    let raw = b.int32_add(base, current_index);
    let slot = b.int32_mod(raw, ring);
    let value = b.get_value_from_tagged_array(elements, slot);
    let key = b.int32_to_tagged(current_index);
    invoke(b, it, value, key);
    let one = b.int32(1);
    let bumped = b.int32_add(current_first, one);
    let next_first = b.int32_mod(bumped, cap);
    b.write(first, next_first);
    let next_index = b.int32_add(current_index, one);
    b.write(index, next_index);
    b.loop_end(head);
    b.bind(exit);
}

/// `HashMap` and `HashSet`: every bucket holds a hole, a node chain or a
/// tree; trees are walked by the runtime.
fn hash_loop(b: &mut CircuitBuilder<'_>, it: Iteration, is_set: bool) {
    let obj = it.obj;
    counted_loop(
        b,
        |b| {
            let table = b.load_field(obj, hash_map::TABLE_OFFSET);
            b.tagged_array_length(table)
        },
        false,
        |b, k| {
            let table = b.load_field(obj, hash_map::TABLE_OFFSET);
            let bucket = b.get_value_from_tagged_array(table, k);
            let node = b.new_variable(MachineType::I64, GateType::Any, bucket);
            let next_bucket = b.new_label();
            let occupied = b.new_label();
            let tree = b.new_label();
            let chain = b.new_label();
            let empty = b.tagged_is_hole(bucket);
            b.branch(empty, next_bucket, occupied);
            b.bind(occupied);
            let is_tree = b.tagged_is_object_type(bucket, JsType::RbTreeNode);
            b.branch(is_tree, tree, chain);

            b.bind(tree);
            let set_flag = if is_set { b.tagged_true() } else { b.tagged_false() };
            let result = b.call_runtime(
                RuntimeStubId::ContainerRBTreeForEach,
                &[bucket, it.callback, it.this_arg, obj, set_flag],
            );
            bail_on_exception(b, result);
            b.jump(next_bucket);

            b.bind(chain);
            let head = b.new_label();
            let body = b.new_label();
            b.jump(head);
            b.loop_begin(head);
            let current = b.read(node);
            let end = b.tagged_is_hole(current);
            b.branch(end, next_bucket, body);
            b.bind(body);
            let key = b.load_field(current, linked_node::KEY_OFFSET);
            let value = if is_set {
                key
            } else {
                b.load_field(current, linked_node::VALUE_OFFSET)
            };
            invoke(b, it, value, key);
            let next = b.load_field(current, linked_node::NEXT_OFFSET);
            b.write(node, next);
            b.loop_end(head);

            b.bind(next_bucket);
        },
    );
}

/// `LinkedList` and `List`: follow next pointers from the head sentinel,
/// skipping deleted nodes.
fn list_loop(b: &mut CircuitBuilder<'_>, it: Iteration) {
    let obj = it.obj;
    let start = b.int32(tagged_list::ELEMENTS_START_INDEX as i32);
    let node = b.new_variable(MachineType::I32, GateType::NJSValue, start);
    counted_loop(
        b,
        |b| {
            let list = b.load_field(obj, tagged_list::LIST_OFFSET);
            let count = b.get_value_from_tagged_array_at(list, tagged_list::NUMBER_OF_NODE_INDEX);
            b.get_int32_of_tint(count)
        },
        false,
        |b, k| {
            let list = b.load_field(obj, tagged_list::LIST_OFFSET);
            let current = b.read(node);
            let next_ptr = b.int32(tagged_list::NEXT_PTR_OFFSET as i32);
            let link_slot = b.int32_add(current, next_ptr);
            let link = b.get_value_from_tagged_array(list, link_slot);
            let next = b.get_int32_of_tint(link);
            b.write(node, next);
            let value = b.get_value_from_tagged_array(list, next);
            let live = b.new_label();
            let skip = b.new_label();
            let deleted = b.tagged_is_hole(value);
            b.branch(deleted, skip, live);
            b.bind(live);
            let key = b.int32_to_tagged(k);
            invoke(b, it, value, key);
            b.jump(skip);
            b.bind(skip);
        },
    );
}
