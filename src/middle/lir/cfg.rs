//! Control flow graph queries over a function's blocks: predecessors,
//! reachability, and the dominator tree.

use hashbrown::{HashMap, HashSet};

use crate::middle::lir::{BlockId, FunctionDefinition};

/// Predecessors of every block in layout order, without duplicates
pub fn predecessors(function: &FunctionDefinition) -> HashMap<BlockId, Vec<BlockId>> {
    let mut predecessors: HashMap<BlockId, Vec<BlockId>> = function
        .layout
        .iter()
        .map(|id| (*id, Vec::new()))
        .collect();

    for block in function.ordered_blocks() {
        for successor in block.successors() {
            let entry = predecessors.entry(successor).or_default();

            if !entry.contains(&block.id) {
                entry.push(block.id);
            }
        }
    }

    predecessors
}

/// Blocks reachable from the entry in reverse postorder
pub fn reverse_postorder(function: &FunctionDefinition) -> Vec<BlockId> {
    let Some(entry) = function.entry() else {
        return vec![];
    };

    let mut visited = HashSet::new();
    let mut postorder = Vec::new();
    // (block, whether its successors were already pushed)
    let mut stack = vec![(entry, false)];

    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }

        if !visited.insert(block) {
            continue;
        }

        stack.push((block, true));

        let successors = function
            .blocks
            .get(&block)
            .map(|b| b.successors())
            .unwrap_or_default();

        // Reversed so the first successor is visited first
        for successor in successors.into_iter().rev() {
            if !visited.contains(&successor) && function.blocks.contains_key(&successor) {
                stack.push((successor, false));
            }
        }
    }

    postorder.reverse();
    postorder
}

pub fn reachable(function: &FunctionDefinition) -> HashSet<BlockId> {
    reverse_postorder(function).into_iter().collect()
}

/// Dominator tree of the reachable blocks, computed with the iterative
/// algorithm of Cooper, Harvey and Kennedy
#[derive(Debug)]
pub struct DominatorTree {
    entry: Option<BlockId>,
    /// Reachable blocks in reverse postorder
    order: Vec<BlockId>,
    immediate_dominators: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
}

impl DominatorTree {
    pub fn compute(function: &FunctionDefinition) -> Self {
        let order = reverse_postorder(function);
        let entry = order.first().copied();

        let position: HashMap<BlockId, usize> =
            order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let predecessors = predecessors(function);

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();

        if let Some(entry) = entry {
            idom.insert(entry, entry);
        }

        let intersect = |idom: &HashMap<BlockId, BlockId>, mut a: BlockId, mut b: BlockId| {
            while a != b {
                while position[&a] > position[&b] {
                    a = idom[&a];
                }
                while position[&b] > position[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;

            for block in order.iter().skip(1) {
                let mut new_idom = None;

                for predecessor in predecessors.get(block).into_iter().flatten() {
                    if !idom.contains_key(predecessor) {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => *predecessor,
                        Some(current) => intersect(&idom, *predecessor, current),
                    });
                }

                if let Some(new_idom) = new_idom {
                    if idom.get(block) != Some(&new_idom) {
                        idom.insert(*block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in &order {
            if let Some(parent) = idom.get(block).filter(|parent| *parent != block) {
                children.entry(*parent).or_default().push(*block);
            }
        }

        Self {
            entry,
            order,
            immediate_dominators: idom,
            children,
        }
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// Reachable blocks in reverse postorder
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.order
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.immediate_dominators.contains_key(&block)
    }

    /// `None` for the entry and for unreachable blocks
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        self.immediate_dominators
            .get(&block)
            .copied()
            .filter(|idom| *idom != block)
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether every path from the entry to `b` goes through `a`. A block
    /// dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }

        let mut current = b;
        loop {
            if current == a {
                return true;
            }

            match self.immediate_dominator(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Dominance frontier of every reachable block
    pub fn dominance_frontiers(
        &self,
        function: &FunctionDefinition,
    ) -> HashMap<BlockId, HashSet<BlockId>> {
        let predecessors = predecessors(function);
        let mut frontiers: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();

        for block in &self.order {
            let block_predecessors = predecessors
                .get(block)
                .map(|predecessors| {
                    predecessors
                        .iter()
                        .filter(|p| self.is_reachable(**p))
                        .copied()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if block_predecessors.len() < 2 {
                continue;
            }

            let Some(idom) = self.immediate_dominator(*block) else {
                continue;
            };

            for predecessor in block_predecessors {
                let mut runner = predecessor;

                while runner != idom {
                    frontiers.entry(runner).or_default().insert(*block);

                    match self.immediate_dominator(runner) {
                        Some(parent) => runner = parent,
                        None => break,
                    }
                }
            }
        }

        frontiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        middle::lir::{Signature, Type, builder::FunctionBuilder},
    };

    /// entry -> (then | else) -> merge, plus an unreachable block
    fn diamond() -> (FunctionDefinition, [BlockId; 5]) {
        let mut builder = FunctionBuilder::new(
            InternedSymbol::new("diamond"),
            Signature {
                parameters: vec![Type::BOOL],
                return_type: Type::Void,
            },
        );

        let entry = builder.append_new_block("entry");
        let then = builder.append_new_block("then");
        let otherwise = builder.append_new_block("else");
        let merge = builder.append_new_block("merge");
        let dead = builder.append_new_block("dead");

        let condition = builder.argument(0).unwrap().into();

        builder.position_at_end(entry);
        builder.branch(condition, then, otherwise);
        builder.position_at_end(then);
        builder.jump(merge);
        builder.position_at_end(otherwise);
        builder.jump(merge);
        builder.position_at_end(merge);
        builder.ret(None);
        builder.position_at_end(dead);
        builder.jump(merge);

        (builder.finish(), [entry, then, otherwise, merge, dead])
    }

    #[test]
    fn predecessors_include_unreachable_blocks() {
        let (function, [entry, then, otherwise, merge, dead]) = diamond();
        let predecessors = predecessors(&function);

        assert_eq!(predecessors[&then], vec![entry]);
        assert_eq!(predecessors[&merge], vec![then, otherwise, dead]);
        assert!(predecessors[&entry].is_empty());
    }

    #[test]
    fn reverse_postorder_skips_unreachable_blocks() {
        let (function, [entry, _, _, merge, dead]) = diamond();
        let order = reverse_postorder(&function);

        assert_eq!(order.first(), Some(&entry));
        assert_eq!(order.last(), Some(&merge));
        assert!(!order.contains(&dead));
    }

    #[test]
    fn diamond_dominators_and_frontiers() {
        let (function, [entry, then, otherwise, merge, dead]) = diamond();
        let tree = DominatorTree::compute(&function);

        assert_eq!(tree.immediate_dominator(merge), Some(entry));
        assert_eq!(tree.immediate_dominator(then), Some(entry));
        assert!(tree.dominates(entry, merge));
        assert!(!tree.dominates(then, merge));
        assert!(!tree.is_reachable(dead));

        let frontiers = tree.dominance_frontiers(&function);
        assert_eq!(frontiers[&then], HashSet::from([merge]));
        assert_eq!(frontiers[&otherwise], HashSet::from([merge]));
        assert!(!frontiers.contains_key(&entry));
    }
}
