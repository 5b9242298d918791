//! Backwards searches over the definitions of a value.
use std::collections::VecDeque;

use crate::ir::{InstId, ObjectPool, Opcode, Value};

/// An immediate constant buffer location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CbufAddr {
    pub index: u32,
    pub offset: u32,
}

/// Restricts a search to a range of offsets in a single constant buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bias {
    pub index: u32,
    pub offset_begin: u32,
    pub offset_end: u32,
}

impl Bias {
    pub fn contains(&self, addr: CbufAddr) -> bool {
        addr.index == self.index && addr.offset >= self.offset_begin && addr.offset < self.offset_end
    }
}

/// Visit the instructions defining `value` and its arguments breadth first
/// and return the first result from `pred`.
///
/// Identity instructions are skipped and each instruction is visited at most once.
pub fn breadth_first_search<T>(
    pool: &ObjectPool,
    value: Value,
    mut pred: impl FnMut(InstId) -> Option<T>,
) -> Option<T> {
    let start = pool.resolve_inst(value)?;

    let mut visited = vec![false; pool.num_insts()];
    let mut queue = VecDeque::from([start]);
    visited[start.index()] = true;

    while let Some(inst) = queue.pop_front() {
        if let Some(result) = pred(inst) {
            return Some(result);
        }
        for arg in pool.inst(inst).args() {
            if let Some(def) = pool.resolve_inst(*arg) {
                if !visited[def.index()] {
                    visited[def.index()] = true;
                    queue.push_back(def);
                }
            }
        }
    }
    None
}

/// The immediate index and offset of a 32-bit constant buffer read.
pub fn cbuf_u32_addr(pool: &ObjectPool, inst: InstId) -> Option<CbufAddr> {
    let inst = pool.inst(inst);
    if inst.opcode() != Opcode::GetCbufU32 {
        return None;
    }
    Some(CbufAddr {
        index: pool.resolve(inst.arg(0)).u32()?,
        offset: pool.resolve(inst.arg(1)).u32()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrEmitter;
    use pretty_assertions::assert_eq;

    #[test]
    fn find_nearest_cbuf_read() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let mut ir = IrEmitter::new(&mut pool, block);
        let far = ir.get_cbuf_u32(Value::U32(2), Value::U32(0x40));
        let near = ir.get_cbuf_u32(Value::U32(1), Value::U32(0x10));
        let shifted = ir.shift_left_logical(far, Value::U32(2));
        let sum = ir.iadd(near, shifted);

        assert_eq!(
            Some(CbufAddr {
                index: 1,
                offset: 0x10
            }),
            breadth_first_search(&pool, sum, |i| cbuf_u32_addr(&pool, i))
        );
    }

    #[test]
    fn immediate_has_no_definition() {
        let pool = ObjectPool::new();
        assert_eq!(
            None,
            breadth_first_search(&pool, Value::U32(1), |i| Some(i))
        );
    }

    #[test]
    fn dynamic_cbuf_offset() {
        let mut pool = ObjectPool::new();
        let block = pool.new_block();
        let mut ir = IrEmitter::new(&mut pool, block);
        let offset = ir.lane_id();
        let read = ir.get_cbuf_u32(Value::U32(0), offset);
        assert_eq!(None, cbuf_u32_addr(&pool, read.inst().unwrap()));
    }
}
