use super::value::Value;
use super::BlockId;

/// A node in the structured control flow of a [Program](super::Program).
///
/// Nodes appear in the order backends emit them.
/// The block containing the instructions for a node always precedes it in the list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntaxNode {
    /// The instructions of a block.
    Block(BlockId),
    /// Execute `body` if `cond` is true and continue at `merge`.
    If {
        cond: Value,
        body: BlockId,
        merge: BlockId,
    },
    /// The end of the body for the most recent [SyntaxNode::If].
    EndIf { merge: BlockId },
    /// A loop starting at `body` that evaluates its [SyntaxNode::Repeat] in `continue_block`.
    Loop {
        body: BlockId,
        continue_block: BlockId,
        merge: BlockId,
    },
    /// Jump back to `loop_header` if `cond` is true and exit the loop to `merge` otherwise.
    Repeat {
        cond: Value,
        loop_header: BlockId,
        merge: BlockId,
    },
    /// Exit the innermost loop to `merge` if `cond` is true and continue at `skip` otherwise.
    Break {
        cond: Value,
        merge: BlockId,
        skip: BlockId,
    },
    Return,
    Unreachable,
}

impl SyntaxNode {
    /// The condition value for conditional nodes.
    pub fn cond(&self) -> Option<Value> {
        match self {
            SyntaxNode::If { cond, .. }
            | SyntaxNode::Repeat { cond, .. }
            | SyntaxNode::Break { cond, .. } => Some(*cond),
            _ => None,
        }
    }

    pub(crate) fn cond_mut(&mut self) -> Option<&mut Value> {
        match self {
            SyntaxNode::If { cond, .. }
            | SyntaxNode::Repeat { cond, .. }
            | SyntaxNode::Break { cond, .. } => Some(cond),
            _ => None,
        }
    }

    /// Apply `f` to every block referenced by this node.
    pub(crate) fn map_blocks(&mut self, f: impl Fn(BlockId) -> BlockId) {
        match self {
            SyntaxNode::Block(b) => *b = f(*b),
            SyntaxNode::If { body, merge, .. } => {
                *body = f(*body);
                *merge = f(*merge);
            }
            SyntaxNode::EndIf { merge } => *merge = f(*merge),
            SyntaxNode::Loop {
                body,
                continue_block,
                merge,
            } => {
                *body = f(*body);
                *continue_block = f(*continue_block);
                *merge = f(*merge);
            }
            SyntaxNode::Repeat {
                loop_header, merge, ..
            } => {
                *loop_header = f(*loop_header);
                *merge = f(*merge);
            }
            SyntaxNode::Break { merge, skip, .. } => {
                *merge = f(*merge);
                *skip = f(*skip);
            }
            SyntaxNode::Return | SyntaxNode::Unreachable => (),
        }
    }
}
