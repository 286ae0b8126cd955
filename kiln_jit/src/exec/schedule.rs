//! Basic blocks and effect placement for execution.
//!
//! Blocks are discovered by walking the control chain from the state entry:
//! a block starts at a block head (`StateEntry`, a branch or exception
//! projection, a merge or a loop header) and runs through straight-line
//! control gates until a gate whose successors are block heads, or which
//! has none.
//!
//! Effect gates float on the depend chain. Each one is placed in the block
//! of the anchor its chain starts from: `DependEntry` places it in the entry
//! block, a `DependRelay` or `DependSelector` in the block of its control
//! gate, and a control gate that carries a depend input in that gate's
//! block. Inside a block, effects are ordered by their distance from the
//! anchor.

use rustc_hash::FxHashMap;

use kiln_core::{KilnError, KilnResult};

use crate::ir::{BitSet, Circuit, GateRef, OpCode};

/// One basic block.
#[derive(Debug, Clone)]
pub struct Block {
    /// The block head.
    pub head: GateRef,
    /// Control gates from the head to the terminator, inclusive.
    pub control: Vec<GateRef>,
    /// Effect gates placed in this block, in depend order.
    pub effects: Vec<GateRef>,
    /// Heads of the successor blocks.
    pub successors: Vec<GateRef>,
}

impl Block {
    /// The last control gate.
    #[must_use]
    pub fn terminator(&self) -> GateRef {
        self.control.last().copied().unwrap_or(self.head)
    }
}

/// Block structure of a circuit.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    blocks: Vec<Block>,
    block_of: FxHashMap<GateRef, usize>,
    successors: FxHashMap<GateRef, Vec<GateRef>>,
}

impl Schedule {
    /// Discover blocks and place effects.
    ///
    /// # Errors
    ///
    /// Fails if an effect chain does not start at a depend anchor, or a
    /// control gate is reachable without a block.
    pub fn build(circuit: &Circuit) -> KilnResult<Self> {
        let mut schedule = Schedule::default();
        schedule.discover_blocks(circuit);
        schedule.place_effects(circuit)?;
        Ok(schedule)
    }

    fn discover_blocks(&mut self, circuit: &Circuit) {
        let mut heads = BitSet::with_capacity(circuit.gate_count());
        let mut work = vec![circuit.state_entry()];
        while let Some(head) = work.pop() {
            if !heads.insert(head.as_usize()) {
                continue;
            }
            let index = self.blocks.len();
            let mut control = vec![head];
            self.block_of.insert(head, index);
            let mut current = head;
            let successors = loop {
                let next = control_successors(circuit, current);
                self.successors.insert(current, next.clone());
                match next.as_slice() {
                    [single] if !circuit.opcode(*single).is_block_head() => {
                        current = *single;
                        self.block_of.insert(current, index);
                        control.push(current);
                    }
                    _ => break next,
                }
            };
            work.extend(successors.iter().rev().copied());
            self.blocks.push(Block {
                head,
                control,
                effects: Vec::new(),
                successors,
            });
        }
    }

    fn place_effects(&mut self, circuit: &Circuit) -> KilnResult<()> {
        let mut placed: Vec<(usize, usize, GateRef)> = Vec::new();
        for gate in circuit.all_gates() {
            if circuit.is_dead(gate) || !circuit.opcode(gate).is_effect() {
                continue;
            }
            let mut depth = 0;
            let mut anchor = circuit.dep(gate);
            while anchor.is_valid() && circuit.opcode(anchor).is_effect() {
                depth += 1;
                anchor = circuit.dep(anchor);
            }
            let Some(block) = self.anchor_block(circuit, anchor) else {
                // Effects behind an unreachable anchor never run.
                if anchor.is_valid() {
                    continue;
                }
                return Err(KilnError::malformed(gate.index(), "effect chain without an anchor"));
            };
            placed.push((block, depth, gate));
        }
        placed.sort_by_key(|&(block, depth, gate)| (block, depth, gate.index()));
        for (block, _, gate) in placed {
            self.block_of.insert(gate, block);
            self.blocks[block].effects.push(gate);
        }
        Ok(())
    }

    fn anchor_block(&self, circuit: &Circuit, anchor: GateRef) -> Option<usize> {
        match circuit.opcode(anchor) {
            OpCode::DependEntry => self.block_of.get(&circuit.state_entry()).copied(),
            OpCode::DependRelay | OpCode::DependSelector => {
                self.block_of.get(&circuit.state_in(anchor, 0)).copied()
            }
            _ => self.block_of.get(&anchor).copied(),
        }
    }

    /// All blocks; the entry block is first.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block index of a control or effect gate.
    #[must_use]
    pub fn block_of(&self, gate: GateRef) -> Option<usize> {
        self.block_of.get(&gate).copied()
    }

    /// The block starting at `head`.
    #[must_use]
    pub fn block_at(&self, head: GateRef) -> Option<&Block> {
        self.block_of(head).map(|b| &self.blocks[b]).filter(|b| b.head == head)
    }

    /// Control successors of a scheduled control gate.
    #[must_use]
    pub fn successors(&self, gate: GateRef) -> &[GateRef] {
        self.successors.get(&gate).map_or(&[], Vec::as_slice)
    }
}

/// Control gates reading `gate` as their state input.
fn control_successors(circuit: &Circuit, gate: GateRef) -> Vec<GateRef> {
    let mut next: Vec<GateRef> = circuit
        .state_users(gate)
        .into_iter()
        .filter(|&u| !circuit.is_dead(u) && circuit.opcode(u).is_control())
        .collect();
    next.dedup();
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BytecodeBuilder, EcmaOpcode};

    #[test]
    fn test_straight_line_is_one_block() {
        let mut circuit = Circuit::for_function("f", 2, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let (a, b) = (bc.param(0), bc.param(1));
        let sum = bc.emit(EcmaOpcode::Add2, &[a, b]);
        bc.ret(sum);
        let schedule = Schedule::build(&circuit).unwrap();
        let entry = &schedule.blocks()[0];
        assert_eq!(entry.head, circuit.state_entry());
        // The add can throw: its projections start two blocks.
        assert_eq!(entry.successors.len(), 2);
        assert!(schedule.blocks().len() >= 3);
        assert_eq!(schedule.block_of(sum), Some(0));
    }

    #[test]
    fn test_branch_and_merge_blocks() {
        let mut circuit = Circuit::for_function("f", 1, 1);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let cond = bc.param(0);
        let (taken, join) = (bc.new_label(), bc.new_label());
        bc.jump_if(EcmaOpcode::Jeqz, cond, taken, join);
        bc.bind(taken);
        bc.jump(join);
        bc.bind(join);
        bc.ret_undefined();
        let schedule = Schedule::build(&circuit).unwrap();
        let merges = schedule
            .blocks()
            .iter()
            .filter(|b| circuit.opcode(b.head) == OpCode::Merge)
            .count();
        assert_eq!(merges, 1);
        for block in schedule.blocks() {
            for &gate in &block.control[1..] {
                assert!(!circuit.opcode(gate).is_block_head());
            }
        }
    }

    #[test]
    fn test_effects_follow_their_anchor() {
        let mut circuit = Circuit::for_function("f", 1, 0);
        let mut bc = BytecodeBuilder::new(&mut circuit);
        let x = bc.param(0);
        let r = bc.emit(EcmaOpcode::Inc, &[x]);
        bc.ret(r);
        let schedule = Schedule::build(&circuit).unwrap();
        let split = circuit
            .all_gates()
            .into_iter()
            .find(|&g| circuit.opcode(g) == OpCode::StateSplit)
            .unwrap();
        assert_eq!(schedule.block_of(split), Some(0));
        assert!(schedule.blocks()[0].effects.contains(&split));
    }

    #[test]
    fn test_loop_header_is_discovered_once() {
        use crate::lowering::{LoweringPass, TypeLowering};

        let mut circuit = Circuit::for_function("f", 0, 0);
        let mut b = crate::builder::CircuitBuilder::new(&mut circuit);
        let size = b.int_ptr(64);
        let obj = b.heap_alloc(size);
        b.return_(obj);
        TypeLowering::new().run(&mut circuit).unwrap();
        let schedule = Schedule::build(&circuit).unwrap();
        let loops = schedule
            .blocks()
            .iter()
            .filter(|b| circuit.opcode(b.head) == OpCode::LoopBegin)
            .count();
        assert_eq!(loops, 1);
        let mut heads: Vec<_> = schedule.blocks().iter().map(|b| b.head).collect();
        let total = heads.len();
        heads.sort_by_key(|h| h.index());
        heads.dedup();
        assert_eq!(heads.len(), total);
    }
}
