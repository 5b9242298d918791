//! Basic blocks over guest instruction addresses.
//!
//! Blocks end at control instructions, at branch targets, and where the guard predicate of
//! consecutive instructions changes. Every instruction in a block except the final control
//! instruction executes under the same [Condition].
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use log::trace;

use super::decode::{decode, MaxwellOp};
use super::instruction::{Instruction, FLOW_TEST_T};
use crate::environment::Environment;
use crate::error::CompileError;
use crate::ir::Pred;
use crate::{logic_error, not_implemented};

/// A possibly negated guard predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Condition {
    pub pred: Pred,
    pub negate: bool,
}

impl Condition {
    pub const TRUE: Condition = Condition {
        pred: Pred::PT,
        negate: false,
    };

    pub fn new(pred: Pred, negate: bool) -> Self {
        Self { pred, negate }
    }

    fn from_guard(insn: Instruction) -> Self {
        Self::new(insn.pred(), insn.pred_negated())
    }

    pub fn is_true(self) -> bool {
        self == Self::TRUE
    }
}

impl std::ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        Self::new(self.pred, !self.negate)
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negate {
            write!(f, "!")?;
        }
        write!(f, "{}", self.pred)
    }
}

/// An index into [Cfg::blocks].
pub type FlowId = usize;

/// How control leaves a [FlowBlock].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Branch(FlowId),
    CondBranch {
        cond: Condition,
        taken: FlowId,
        not_taken: FlowId,
    },
    Exit,
    CondExit {
        cond: Condition,
        not_taken: FlowId,
    },
}

impl Terminator {
    pub fn successors(&self) -> Vec<FlowId> {
        match *self {
            Terminator::Branch(target) => vec![target],
            Terminator::CondBranch {
                taken, not_taken, ..
            } => vec![taken, not_taken],
            Terminator::Exit => Vec::new(),
            Terminator::CondExit { not_taken, .. } => vec![not_taken],
        }
    }

    fn map(self, f: impl Fn(FlowId) -> FlowId) -> Self {
        match self {
            Terminator::Branch(target) => Terminator::Branch(f(target)),
            Terminator::CondBranch {
                cond,
                taken,
                not_taken,
            } => Terminator::CondBranch {
                cond,
                taken: f(taken),
                not_taken: f(not_taken),
            },
            Terminator::Exit => Terminator::Exit,
            Terminator::CondExit { cond, not_taken } => Terminator::CondExit {
                cond,
                not_taken: f(not_taken),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowBlock {
    /// The address of the first instruction.
    pub begin: u32,
    /// The address after the last instruction.
    pub end: u32,
    /// The guard predicate for the non control instructions.
    pub cond: Condition,
    pub term: Terminator,
}

/// The control flow graph of a guest program with the entry block at index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfg {
    pub blocks: Vec<FlowBlock>,
    /// The address of the first instruction bundle.
    pub start_address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Ssy,
    Pbk,
}

#[derive(Debug, Clone, Copy)]
enum RawTerm {
    Fallthrough(u32),
    Branch { cond: Condition, target: u32 },
    Exit { cond: Condition },
    Sync { cond: Condition },
    Brk { cond: Condition },
}

struct RawBlock {
    begin: u32,
    end: u32,
    cond: Condition,
    term: RawTerm,
}

/// The address of the instruction after `address` skipping scheduling words.
pub fn next_address(address: u32, start_address: u32) -> u32 {
    let next = address + 8;
    if (next - start_address) % 32 == 0 {
        next + 8
    } else {
        next
    }
}

impl Cfg {
    /// Discover the reachable blocks starting from the first instruction after `start_address`.
    pub fn new(env: &mut dyn Environment, start_address: u32) -> Result<Self, CompileError> {
        let entry = start_address + 8;
        let (decoded, leaders) = discover(env, start_address, entry)?;
        let raw_blocks = split_blocks(&decoded, leaders, start_address)?;
        let blocks = resolve_blocks(&decoded, &raw_blocks, entry, start_address)?;
        trace!("Found {} blocks from {} instructions", blocks.len(), decoded.len());
        Ok(Self {
            blocks,
            start_address,
        })
    }

    /// The addresses of the instructions in `block` in program order.
    pub fn addresses(&self, block: FlowId) -> impl Iterator<Item = u32> + '_ {
        let FlowBlock { begin, end, .. } = self.blocks[block];
        let start = self.start_address;
        std::iter::successors(Some(begin), move |a| Some(next_address(*a, start)))
            .take_while(move |a| *a < end)
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(
                out,
                "Block {i} [{:#x}, {:#x}) {}",
                block.begin, block.end, block.cond
            );
            let term = match block.term {
                Terminator::Branch(t) => format!("Branch {t}"),
                Terminator::CondBranch {
                    cond,
                    taken,
                    not_taken,
                } => format!("Branch {cond} {taken} else {not_taken}"),
                Terminator::Exit => "Exit".to_string(),
                Terminator::CondExit { cond, not_taken } => {
                    format!("Exit {cond} else {not_taken}")
                }
            };
            let _ = writeln!(out, "    {term}");
        }
        out
    }
}

fn check_flow_test(insn: Instruction, op: MaxwellOp, address: u32) -> Result<(), CompileError> {
    if insn.flow_test() != FLOW_TEST_T {
        return Err(not_implemented!(
            "{op:?} flow test {:#x} at {address:#x}",
            insn.flow_test()
        ));
    }
    Ok(())
}

type Decoded = BTreeMap<u32, (Instruction, MaxwellOp)>;

// Walk every reachable instruction and collect the addresses that start a block.
fn discover(
    env: &mut dyn Environment,
    start_address: u32,
    entry: u32,
) -> Result<(Decoded, BTreeSet<u32>), CompileError> {
    let mut decoded = Decoded::new();
    let mut leaders = BTreeSet::from([entry]);
    let mut visited = BTreeSet::new();
    let mut pending = vec![entry];

    while let Some(address) = pending.pop() {
        if !visited.insert(address) {
            continue;
        }

        let mut pc = address;
        loop {
            let insn = Instruction(env.read_instruction(pc)?);
            let op = decode(insn.0, pc)?;
            decoded.insert(pc, (insn, op));

            let next = next_address(pc, start_address);
            if op.is_control_flow() {
                check_flow_test(insn, op, pc)?;
                if op == MaxwellOp::Bra {
                    let target = insn.branch_target(pc);
                    leaders.insert(target);
                    pending.push(target);
                }
                if !Condition::from_guard(insn).is_true() {
                    leaders.insert(next);
                    pending.push(next);
                }
                break;
            }

            if matches!(op, MaxwellOp::Ssy | MaxwellOp::Pbk) {
                let target = insn.branch_target(pc);
                leaders.insert(target);
                pending.push(target);
            }

            pc = next;
            if leaders.contains(&pc) {
                pending.push(pc);
                break;
            }
        }
    }

    Ok((decoded, leaders))
}

fn is_guarded(op: MaxwellOp) -> bool {
    !matches!(op, MaxwellOp::Ssy | MaxwellOp::Pbk | MaxwellOp::Nop)
}

// Split the code into blocks at leaders, control instructions, and predicate changes.
fn split_blocks(
    decoded: &Decoded,
    mut leaders: BTreeSet<u32>,
    start_address: u32,
) -> Result<BTreeMap<u32, RawBlock>, CompileError> {
    let mut blocks = BTreeMap::new();
    let mut pending: Vec<_> = leaders.iter().copied().collect();

    while let Some(begin) = pending.pop() {
        if blocks.contains_key(&begin) {
            continue;
        }

        let mut pc = begin;
        let mut cond = None;
        let (end, term) = loop {
            let (insn, op) = decoded
                .get(&pc)
                .ok_or_else(|| logic_error!("Instruction at {pc:#x} was not decoded"))?;
            let next = next_address(pc, start_address);

            if op.is_control_flow() {
                let guard = Condition::from_guard(*insn);
                let term = match op {
                    MaxwellOp::Bra => RawTerm::Branch {
                        cond: guard,
                        target: insn.branch_target(pc),
                    },
                    MaxwellOp::Exit => RawTerm::Exit { cond: guard },
                    MaxwellOp::Sync => RawTerm::Sync { cond: guard },
                    _ => RawTerm::Brk { cond: guard },
                };
                break (next, term);
            }

            if is_guarded(*op) {
                let guard = Condition::from_guard(*insn);
                match cond {
                    None => cond = Some(guard),
                    Some(c) if c != guard => {
                        leaders.insert(pc);
                        pending.push(pc);
                        break (pc, RawTerm::Fallthrough(pc));
                    }
                    _ => (),
                }
            }

            pc = next;
            if leaders.contains(&pc) {
                break (pc, RawTerm::Fallthrough(pc));
            }
        };

        blocks.insert(
            begin,
            RawBlock {
                begin,
                end,
                cond: cond.unwrap_or(Condition::TRUE),
                term,
            },
        );
    }

    Ok(blocks)
}

// Resolve SYNC and BRK targets with the token stack and number the reachable blocks.
fn resolve_blocks(
    decoded: &Decoded,
    raw_blocks: &BTreeMap<u32, RawBlock>,
    entry: u32,
    start_address: u32,
) -> Result<Vec<FlowBlock>, CompileError> {
    let mut stacks: BTreeMap<u32, Vec<(Token, u32)>> = BTreeMap::new();
    let mut terms: BTreeMap<u32, Terminator> = BTreeMap::new();
    stacks.insert(entry, Vec::new());
    let mut pending = vec![entry];

    while let Some(begin) = pending.pop() {
        if terms.contains_key(&begin) {
            continue;
        }
        let block = raw_blocks
            .get(&begin)
            .ok_or_else(|| logic_error!("No block starts at {begin:#x}"))?;

        let mut stack = stacks.get(&begin).cloned().unwrap_or_default();
        let mut pc = block.begin;
        while pc < block.end {
            if let Some((insn, op)) = decoded.get(&pc) {
                match op {
                    MaxwellOp::Ssy => stack.push((Token::Ssy, insn.branch_target(pc))),
                    MaxwellOp::Pbk => stack.push((Token::Pbk, insn.branch_target(pc))),
                    _ => (),
                }
            }
            pc = next_address(pc, start_address);
        }

        // Successor addresses and the token stack at the start of each successor.
        let mut successors = Vec::new();
        let term = match block.term {
            RawTerm::Fallthrough(next) => {
                successors.push((next, stack.clone()));
                Terminator::Branch(next as usize)
            }
            RawTerm::Branch { cond, target } => {
                successors.push((target, stack.clone()));
                conditional(cond, target, block.end, &stack, &mut successors)
            }
            RawTerm::Exit { cond } => {
                if cond.is_true() {
                    Terminator::Exit
                } else {
                    successors.push((block.end, stack.clone()));
                    Terminator::CondExit {
                        cond,
                        not_taken: block.end as usize,
                    }
                }
            }
            RawTerm::Sync { cond } | RawTerm::Brk { cond } => {
                let token = if matches!(block.term, RawTerm::Sync { .. }) {
                    Token::Ssy
                } else {
                    Token::Pbk
                };
                let index = stack
                    .iter()
                    .rposition(|(t, _)| *t == token)
                    .ok_or_else(|| {
                        not_implemented!("Unmatched {token:?} token at {:#x}", block.end - 8)
                    })?;
                let target = stack[index].1;
                let mut popped = stack.clone();
                popped.truncate(index);
                successors.push((target, popped));
                conditional(cond, target, block.end, &stack, &mut successors)
            }
        };
        terms.insert(begin, term);

        for (address, succ_stack) in successors {
            match stacks.get(&address) {
                Some(existing) if *existing != succ_stack => {
                    return Err(not_implemented!(
                        "Inconsistent token stack at {address:#x}"
                    ));
                }
                Some(_) => (),
                None => {
                    stacks.insert(address, succ_stack);
                }
            }
            pending.push(address);
        }
    }

    // Number blocks by address with the entry first.
    let mut addresses: Vec<u32> = terms.keys().copied().collect();
    addresses.sort_by_key(|a| (*a != entry, *a));
    let ids: BTreeMap<u32, FlowId> = addresses.iter().enumerate().map(|(i, a)| (*a, i)).collect();

    addresses
        .iter()
        .map(|address| {
            let raw = &raw_blocks[address];
            let term = terms[address].map(|a| ids[&(a as u32)]);
            Ok(FlowBlock {
                begin: raw.begin,
                end: raw.end,
                cond: raw.cond,
                term,
            })
        })
        .collect()
}

fn conditional(
    cond: Condition,
    target: u32,
    fallthrough: u32,
    stack: &[(Token, u32)],
    successors: &mut Vec<(u32, Vec<(Token, u32)>)>,
) -> Terminator {
    if cond.is_true() {
        Terminator::Branch(target as usize)
    } else {
        successors.push((fallthrough, stack.to_vec()));
        Terminator::CondBranch {
            cond,
            taken: target as usize,
            not_taken: fallthrough as usize,
        }
    }
}
