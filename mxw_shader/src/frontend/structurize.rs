//! Reconstruction of structured control flow from a reducible [Cfg].
//!
//! Conditional branches become ifs that rejoin at the immediate post dominator.
//! Natural loops with a single back edge become loops that evaluate the back edge
//! condition at the end of each iteration. Exits from a loop become breaks.
use std::collections::BTreeMap;

use log::trace;

use super::control_flow::{Cfg, Condition, FlowId, Terminator};
use crate::error::CompileError;
use crate::{logic_error, not_implemented};

/// A statement in the structured program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// The non control instructions of a block.
    Code(FlowId),
    If {
        cond: Condition,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    /// Run `body` and repeat while `repeat` is true.
    Loop {
        body: Vec<Stmt>,
        repeat: Condition,
    },
    /// Leave the innermost loop if the condition is true.
    Break(Condition),
    Return,
}

impl Stmt {
    // Control never continues after this statement.
    fn is_terminal(&self) -> bool {
        match self {
            Stmt::Break(cond) => cond.is_true(),
            Stmt::Return => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
struct NaturalLoop {
    latch: FlowId,
    body: Vec<bool>,
    exit: Option<FlowId>,
}

enum Next {
    Goto(FlowId),
    End,
    /// Reached the back edge of the current loop.
    Continue(Condition),
}

/// Convert `cfg` into a list of structured statements starting at the entry block.
pub fn structurize(cfg: &Cfg) -> Result<Vec<Stmt>, CompileError> {
    let mut structurizer = Structurizer::new(cfg)?;
    let mut stmts = Vec::new();
    structurizer.region(0, None, None, &mut stmts)?;
    Ok(stmts)
}

struct Structurizer<'a> {
    cfg: &'a Cfg,
    loops: BTreeMap<FlowId, NaturalLoop>,
    // Immediate post dominators for the top level and each loop region.
    post_dominators: BTreeMap<Option<FlowId>, Vec<Option<usize>>>,
    budget: usize,
}

impl<'a> Structurizer<'a> {
    fn new(cfg: &'a Cfg) -> Result<Self, CompileError> {
        let loops = find_loops(cfg)?;
        trace!("Found {} loops", loops.len());
        Ok(Self {
            cfg,
            loops,
            post_dominators: BTreeMap::new(),
            budget: cfg.blocks.len() * 16 + 64,
        })
    }

    fn region(
        &mut self,
        start: FlowId,
        stop: Option<FlowId>,
        ctx: Option<FlowId>,
        out: &mut Vec<Stmt>,
    ) -> Result<Option<Condition>, CompileError> {
        let mut current = start;
        loop {
            if Some(current) == stop {
                return Ok(None);
            }
            if let Some(header) = ctx {
                if Some(current) == self.loops[&header].exit {
                    out.push(Stmt::Break(Condition::TRUE));
                    return Ok(None);
                }
                if current == header {
                    return Err(not_implemented!(
                        "Loop continue at {:#x} outside the latch",
                        self.cfg.blocks[current].begin
                    ));
                }
            }

            let next = if self.loops.contains_key(&current) {
                self.loop_stmt(current, out)?
            } else {
                self.block_stmts(current, ctx, out)?
            };
            match next {
                Next::Goto(target) => current = target,
                Next::End => return Ok(None),
                Next::Continue(cond) => return Ok(Some(cond)),
            }
        }
    }

    fn loop_stmt(&mut self, header: FlowId, out: &mut Vec<Stmt>) -> Result<Next, CompileError> {
        let mut body = Vec::new();
        let repeat = match self.block_stmts(header, Some(header), &mut body)? {
            Next::Goto(next) => self.region(next, None, Some(header), &mut body)?,
            Next::End => None,
            Next::Continue(cond) => Some(cond),
        };
        out.push(Stmt::Loop {
            body,
            repeat: repeat.unwrap_or(!Condition::TRUE),
        });

        Ok(match self.loops[&header].exit {
            Some(exit) => Next::Goto(exit),
            None => Next::End,
        })
    }

    fn block_stmts(
        &mut self,
        current: FlowId,
        ctx: Option<FlowId>,
        out: &mut Vec<Stmt>,
    ) -> Result<Next, CompileError> {
        if self.budget == 0 {
            return Err(not_implemented!("Control flow requires too much code duplication"));
        }
        self.budget -= 1;

        let cfg = self.cfg;
        let block = &cfg.blocks[current];
        if block.cond.is_true() {
            out.push(Stmt::Code(current));
        } else {
            out.push(Stmt::If {
                cond: block.cond,
                then: vec![Stmt::Code(current)],
                otherwise: Vec::new(),
            });
        }

        match block.term {
            Terminator::Exit => {
                out.push(Stmt::Return);
                Ok(Next::End)
            }
            Terminator::CondExit { cond, not_taken } => {
                push_if(out, cond, vec![Stmt::Return], Vec::new());
                Ok(edge(not_taken, ctx))
            }
            Terminator::Branch(target) => Ok(edge(target, ctx)),
            Terminator::CondBranch {
                cond,
                taken,
                not_taken,
            } => {
                if taken == not_taken {
                    return Ok(edge(taken, ctx));
                }
                if let Some(header) = ctx {
                    let NaturalLoop { latch, exit, .. } = self.loops[&header];
                    if taken == header || not_taken == header {
                        if current != latch {
                            return Err(logic_error!(
                                "Back edge from {:#x} is not the loop latch",
                                block.begin
                            ));
                        }
                        let (other, repeat) = if taken == header {
                            (not_taken, cond)
                        } else {
                            (taken, !cond)
                        };
                        if Some(other) != exit {
                            return Err(not_implemented!(
                                "Loop latch at {:#x} does not exit the loop",
                                block.begin
                            ));
                        }
                        return Ok(Next::Continue(repeat));
                    }
                }

                let merge = self.immediate_post_dominator(current, ctx);
                let mut then = Vec::new();
                let mut otherwise = Vec::new();
                let then_repeat = self.region(taken, merge, ctx, &mut then)?;
                let else_repeat = self.region(not_taken, merge, ctx, &mut otherwise)?;
                push_if(out, cond, then, otherwise);

                Ok(match (then_repeat.or(else_repeat), merge) {
                    (Some(repeat), _) => Next::Continue(repeat),
                    (None, Some(merge)) => Next::Goto(merge),
                    (None, None) => Next::End,
                })
            }
        }
    }

    fn immediate_post_dominator(&mut self, node: FlowId, ctx: Option<FlowId>) -> Option<FlowId> {
        let sink = self.cfg.blocks.len();
        if !self.post_dominators.contains_key(&ctx) {
            let idoms = self.region_post_dominators(ctx);
            self.post_dominators.insert(ctx, idoms);
        }
        self.post_dominators[&ctx][node].filter(|n| *n != sink)
    }

    fn region_post_dominators(&self, ctx: Option<FlowId>) -> Vec<Option<usize>> {
        // Edges leaving the region and back edges to the loop header go to a virtual sink.
        let n = self.cfg.blocks.len();
        let sink = n;
        let in_region = |v: FlowId| match ctx {
            Some(header) => self.loops[&header].body[v],
            None => true,
        };

        let mut reverse = vec![Vec::new(); n + 1];
        for (v, block) in self.cfg.blocks.iter().enumerate() {
            if !in_region(v) {
                continue;
            }
            if matches!(block.term, Terminator::Exit | Terminator::CondExit { .. }) {
                reverse[sink].push(v);
            }
            for s in block.term.successors() {
                if Some(s) == ctx || !in_region(s) {
                    reverse[sink].push(v);
                } else {
                    reverse[s].push(v);
                }
            }
        }
        immediate_dominators(&reverse, sink)
    }
}

fn edge(target: FlowId, ctx: Option<FlowId>) -> Next {
    if Some(target) == ctx {
        Next::Continue(Condition::TRUE)
    } else {
        Next::Goto(target)
    }
}

fn push_if(out: &mut Vec<Stmt>, cond: Condition, mut then: Vec<Stmt>, mut otherwise: Vec<Stmt>) {
    // A branch that never falls through lets the other branch continue unconditionally.
    if then.last().is_some_and(Stmt::is_terminal) && !otherwise.is_empty() {
        push_if(out, cond, then, Vec::new());
        out.append(&mut otherwise);
        return;
    }
    if otherwise.last().is_some_and(Stmt::is_terminal) && !then.is_empty() {
        push_if(out, !cond, otherwise, Vec::new());
        out.append(&mut then);
        return;
    }

    if then.is_empty() {
        std::mem::swap(&mut then, &mut otherwise);
        return push_if_then(out, !cond, then, otherwise);
    }
    push_if_then(out, cond, then, otherwise)
}

fn push_if_then(out: &mut Vec<Stmt>, cond: Condition, then: Vec<Stmt>, otherwise: Vec<Stmt>) {
    match then.as_slice() {
        [] => (),
        [Stmt::Break(c)] if c.is_true() && otherwise.is_empty() => out.push(Stmt::Break(cond)),
        _ => out.push(Stmt::If {
            cond,
            then,
            otherwise,
        }),
    }
}

/// Immediate dominators for the graph with successor lists `succs` using the
/// algorithm from "A Simple, Fast Dominance Algorithm" by Cooper, Harvey and Kennedy.
/// The entry dominates itself and unreachable nodes have no dominator.
fn immediate_dominators(succs: &[Vec<usize>], entry: usize) -> Vec<Option<usize>> {
    let n = succs.len();
    let order = reverse_post_order(succs, entry);
    let mut rpo_index = vec![usize::MAX; n];
    for (i, v) in order.iter().enumerate() {
        rpo_index[*v] = i;
    }

    let mut preds = vec![Vec::new(); n];
    for v in &order {
        for s in &succs[*v] {
            preds[*s].push(*v);
        }
    }

    let mut idom = vec![None; n];
    idom[entry] = Some(entry);

    let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| {
        while a != b {
            while rpo_index[a] > rpo_index[b] {
                a = idom[a].unwrap_or(entry);
            }
            while rpo_index[b] > rpo_index[a] {
                b = idom[b].unwrap_or(entry);
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for v in order.iter().skip(1) {
            let mut new_idom = None;
            for p in &preds[*v] {
                if idom[*p].is_some() {
                    new_idom = Some(match new_idom {
                        Some(q) => intersect(&idom, *p, q),
                        None => *p,
                    });
                }
            }
            if new_idom != idom[*v] {
                idom[*v] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

fn reverse_post_order(succs: &[Vec<usize>], entry: usize) -> Vec<usize> {
    let mut visited = vec![false; succs.len()];
    let mut order = Vec::new();
    let mut stack = vec![(entry, 0)];
    visited[entry] = true;
    while let Some((node, child)) = stack.last().copied() {
        if let Some(next) = succs[node].get(child) {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if !visited[*next] {
                visited[*next] = true;
                stack.push((*next, 0));
            }
        } else {
            order.push(node);
            stack.pop();
        }
    }
    order.reverse();
    order
}

fn dominates(idom: &[Option<usize>], a: usize, mut b: usize) -> bool {
    loop {
        if a == b {
            return true;
        }
        match idom[b] {
            Some(parent) if parent != b => b = parent,
            _ => return false,
        }
    }
}

fn find_loops(cfg: &Cfg) -> Result<BTreeMap<FlowId, NaturalLoop>, CompileError> {
    let n = cfg.blocks.len();
    let succs: Vec<_> = cfg.blocks.iter().map(|b| b.term.successors()).collect();
    let idom = immediate_dominators(&succs, 0);

    // Back edges target a block on the depth first search stack.
    let mut back_edges: BTreeMap<FlowId, Vec<FlowId>> = BTreeMap::new();
    let mut on_stack = vec![false; n];
    let mut visited = vec![false; n];
    let mut stack = vec![(0, 0)];
    visited[0] = true;
    on_stack[0] = true;
    while let Some((node, child)) = stack.last().copied() {
        if let Some(next) = succs[node].get(child).copied() {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if on_stack[next] {
                if !dominates(&idom, next, node) {
                    return Err(not_implemented!(
                        "Irreducible control flow at {:#x}",
                        cfg.blocks[next].begin
                    ));
                }
                back_edges.entry(next).or_default().push(node);
            } else if !visited[next] {
                visited[next] = true;
                on_stack[next] = true;
                stack.push((next, 0));
            }
        } else {
            on_stack[node] = false;
            stack.pop();
        }
    }

    let mut preds = vec![Vec::new(); n];
    for (v, s) in succs.iter().enumerate() {
        for s in s {
            preds[*s].push(v);
        }
    }

    back_edges
        .into_iter()
        .map(|(header, latches)| {
            let [latch] = latches[..] else {
                return Err(not_implemented!(
                    "Loop at {:#x} with {} back edges",
                    cfg.blocks[header].begin,
                    latches.len()
                ));
            };

            let mut body = vec![false; n];
            body[header] = true;
            let mut pending = vec![latch];
            while let Some(v) = pending.pop() {
                if !body[v] {
                    body[v] = true;
                    pending.extend(preds[v].iter().copied());
                }
            }

            let mut exits: Vec<_> = (0..n)
                .filter(|v| body[*v])
                .flat_map(|v| succs[v].iter().copied())
                .filter(|s| !body[*s])
                .collect();
            exits.sort();
            exits.dedup();
            if exits.len() > 1 {
                return Err(not_implemented!(
                    "Loop at {:#x} with {} exits",
                    cfg.blocks[header].begin,
                    exits.len()
                ));
            }

            Ok((
                header,
                NaturalLoop {
                    latch,
                    body,
                    exit: exits.first().copied(),
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::control_flow::FlowBlock;
    use crate::ir::Pred;
    use pretty_assertions::assert_eq;

    const P0: Condition = Condition {
        pred: Pred(0),
        negate: false,
    };

    fn cfg(terms: &[Terminator]) -> Cfg {
        Cfg {
            blocks: terms
                .iter()
                .enumerate()
                .map(|(i, term)| FlowBlock {
                    begin: i as u32 * 8 + 8,
                    end: i as u32 * 8 + 16,
                    cond: Condition::TRUE,
                    term: *term,
                })
                .collect(),
            start_address: 0,
        }
    }

    #[test]
    fn if_else() {
        let cfg = cfg(&[
            Terminator::CondBranch {
                cond: P0,
                taken: 1,
                not_taken: 2,
            },
            Terminator::Branch(3),
            Terminator::Branch(3),
            Terminator::Exit,
        ]);
        assert_eq!(
            vec![
                Stmt::Code(0),
                Stmt::If {
                    cond: P0,
                    then: vec![Stmt::Code(1)],
                    otherwise: vec![Stmt::Code(2)]
                },
                Stmt::Code(3),
                Stmt::Return
            ],
            structurize(&cfg).unwrap()
        );
    }

    #[test]
    fn if_without_else() {
        let cfg = cfg(&[
            Terminator::CondBranch {
                cond: P0,
                taken: 2,
                not_taken: 1,
            },
            Terminator::Branch(2),
            Terminator::Exit,
        ]);
        assert_eq!(
            vec![
                Stmt::Code(0),
                Stmt::If {
                    cond: !P0,
                    then: vec![Stmt::Code(1)],
                    otherwise: Vec::new()
                },
                Stmt::Code(2),
                Stmt::Return
            ],
            structurize(&cfg).unwrap()
        );
    }

    #[test]
    fn self_loop() {
        let cfg = cfg(&[
            Terminator::Branch(1),
            Terminator::CondBranch {
                cond: P0,
                taken: 1,
                not_taken: 2,
            },
            Terminator::Exit,
        ]);
        assert_eq!(
            vec![
                Stmt::Code(0),
                Stmt::Loop {
                    body: vec![Stmt::Code(1)],
                    repeat: P0
                },
                Stmt::Code(2),
                Stmt::Return
            ],
            structurize(&cfg).unwrap()
        );
    }

    #[test]
    fn loop_with_break() {
        let cfg = cfg(&[
            Terminator::Branch(1),
            Terminator::CondBranch {
                cond: P0,
                taken: 3,
                not_taken: 2,
            },
            Terminator::Branch(1),
            Terminator::Exit,
        ]);
        assert_eq!(
            vec![
                Stmt::Code(0),
                Stmt::Loop {
                    body: vec![Stmt::Code(1), Stmt::Break(P0), Stmt::Code(2)],
                    repeat: Condition::TRUE
                },
                Stmt::Code(3),
                Stmt::Return
            ],
            structurize(&cfg).unwrap()
        );
    }

    #[test]
    fn conditional_exit() {
        let cfg = cfg(&[
            Terminator::CondExit {
                cond: P0,
                not_taken: 1,
            },
            Terminator::Exit,
        ]);
        assert_eq!(
            vec![
                Stmt::Code(0),
                Stmt::If {
                    cond: P0,
                    then: vec![Stmt::Return],
                    otherwise: Vec::new()
                },
                Stmt::Code(1),
                Stmt::Return
            ],
            structurize(&cfg).unwrap()
        );
    }

    #[test]
    fn irreducible_loop() {
        let cfg = cfg(&[
            Terminator::CondBranch {
                cond: P0,
                taken: 1,
                not_taken: 2,
            },
            Terminator::Branch(2),
            Terminator::Branch(1),
        ]);
        assert!(matches!(
            structurize(&cfg),
            Err(CompileError::NotImplemented(_))
        ));
    }

    #[test]
    fn dominator_tree() {
        // 0 -> 1 -> 3, 0 -> 2 -> 3
        let succs = vec![vec![1, 2], vec![3], vec![3], vec![]];
        assert_eq!(
            vec![Some(0), Some(0), Some(0), Some(0)],
            immediate_dominators(&succs, 0)
        );
        let succs = vec![vec![1], vec![2], vec![], vec![2]];
        assert_eq!(
            vec![Some(0), Some(0), Some(1), None],
            immediate_dominators(&succs, 0)
        );
    }
}
