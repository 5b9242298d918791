use super::{BlockId, ObjectPool};

/// The blocks reachable from `entry` in post order.
/// Successors are visited in the order they were added.
pub fn post_order(pool: &ObjectPool, entry: BlockId) -> Vec<BlockId> {
    let mut visited = vec![false; pool.num_blocks()];
    let mut order = Vec::new();

    // Each stack entry tracks the next successor to visit.
    let mut stack = vec![(entry, 0usize)];
    visited[entry.index()] = true;

    while let Some(&(block, next)) = stack.last() {
        match pool.block(block).imm_successors().get(next).copied() {
            Some(succ) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            }
            None => {
                order.push(block);
                stack.pop();
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn diamond_post_order() {
        let mut pool = ObjectPool::new();
        let a = pool.new_block();
        let b = pool.new_block();
        let c = pool.new_block();
        let d = pool.new_block();
        let unreachable = pool.new_block();
        pool.add_branch(a, b).unwrap();
        pool.add_branch(a, c).unwrap();
        pool.add_branch(b, d).unwrap();
        pool.add_branch(c, d).unwrap();
        pool.add_branch(unreachable, d).unwrap();

        assert_eq!(vec![d, b, c, a], post_order(&pool, a));
    }

    #[test]
    fn loop_post_order() {
        let mut pool = ObjectPool::new();
        let header = pool.new_block();
        let body = pool.new_block();
        let merge = pool.new_block();
        pool.add_branch(header, body).unwrap();
        pool.add_branch(body, header).unwrap();
        pool.add_branch(body, merge).unwrap();

        assert_eq!(vec![merge, body, header], post_order(&pool, header));
    }
}
