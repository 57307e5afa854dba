//! Dominator trees via the Lengauer-Tarjan algorithm
//!
//! The builder is parameterized by neighbor accessors over raw vertex keys,
//! so the same routine serves dominator trees (forward neighbors) and
//! post-dominator trees (swap the accessors). Nodes carry preorder/postorder
//! counters assigned after construction so that dominance queries answer in
//! O(1): `a` dominates `b` iff `a.pre <= b.pre && a.post >= b.post`.

use std::collections::HashMap;

const NONE: u32 = u32::MAX;

/// Node in a dominator tree
#[derive(Debug, Clone)]
pub struct DomNode {
    /// Vertex key in the originating graph
    pub vertex: u32,
    /// Parent node index (immediate dominator); `None` for the root
    pub parent: Option<u32>,
    /// Child node indices
    pub children: Vec<u32>,
    /// Preorder entry counter
    pub pre: u32,
    /// Postorder exit counter
    pub post: u32,
}

/// A dominator (or post-dominator) tree with O(1) dominance queries
#[derive(Debug, Clone)]
pub struct DomTree {
    nodes: Vec<DomNode>,
    lookup: HashMap<u32, u32>,
}

impl DomTree {
    /// Number of nodes (reachable vertices)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node index for a vertex key, if the vertex was reachable
    pub fn node_index(&self, vertex: u32) -> Option<u32> {
        self.lookup.get(&vertex).copied()
    }

    /// Node by index
    pub fn node(&self, index: u32) -> &DomNode {
        &self.nodes[index as usize]
    }

    /// Immediate dominator of a vertex, as a vertex key
    pub fn idom(&self, vertex: u32) -> Option<u32> {
        let idx = self.node_index(vertex)?;
        let parent = self.nodes[idx as usize].parent?;
        Some(self.nodes[parent as usize].vertex)
    }

    /// Whether `a` dominates `b`.
    ///
    /// Vertices outside the tree (unreachable from the root) dominate
    /// nothing and are dominated by nothing.
    pub fn dominates(&self, a: u32, b: u32, strict: bool) -> bool {
        let (na, nb) = match (self.node_index(a), self.node_index(b)) {
            (Some(na), Some(nb)) => (na, nb),
            _ => return false,
        };
        if na == nb {
            return !strict;
        }
        let a = &self.nodes[na as usize];
        let b = &self.nodes[nb as usize];
        a.pre <= b.pre && a.post >= b.post
    }
}

/// Builder state for one Lengauer-Tarjan run
struct DomBuilder {
    /// Vertex key by DFS number
    vertex: Vec<u32>,
    /// DFS number by vertex key
    index: HashMap<u32, u32>,
    parent: Vec<u32>,
    semi: Vec<u32>,
    idom: Vec<u32>,
    bucket: Vec<Vec<u32>>,
    // Path-compression forest with balanced linking
    ancestor: Vec<u32>,
    label: Vec<u32>,
    size: Vec<u32>,
    child: Vec<u32>,
}

/// Build a dominator tree rooted at `root`.
///
/// `succs` enumerates forward neighbors and `preds` backward neighbors; pass
/// them swapped to obtain a post-dominator tree. Returns `None` when at most
/// one vertex is reachable (a trivial graph has no useful dominance
/// structure; the caller decides how to proceed).
pub fn build_dominator_tree<S, P>(root: u32, succs: S, preds: P) -> Option<DomTree>
where
    S: Fn(u32) -> Vec<u32>,
    P: Fn(u32) -> Vec<u32>,
{
    let mut builder = DomBuilder::enumerate(root, &succs);
    if builder.vertex.len() <= 1 {
        tracing::warn!("graph is trivial, no dominator tree to build");
        return None;
    }
    builder.compute_idoms(&preds);
    Some(builder.into_tree())
}

impl DomBuilder {
    /// Depth-first enumerate reachable vertices, recording DFS tree parents.
    fn enumerate<S>(root: u32, succs: &S) -> Self
    where
        S: Fn(u32) -> Vec<u32>,
    {
        let mut vertex = Vec::new();
        let mut index: HashMap<u32, u32> = HashMap::new();
        let mut parent = Vec::new();

        // Stack entries carry the DFS number of the discovering vertex
        let mut stack: Vec<(u32, u32)> = vec![(root, NONE)];
        while let Some((v, from)) = stack.pop() {
            if index.contains_key(&v) {
                continue;
            }
            let num = vertex.len() as u32;
            index.insert(v, num);
            vertex.push(v);
            parent.push(from);
            let next = succs(v);
            for &s in next.iter().rev() {
                if !index.contains_key(&s) {
                    stack.push((s, num));
                }
            }
        }

        let n = vertex.len();
        // Parents recorded above are vertex discovery origins in DFS numbers
        // already, except they refer to the pusher at push time; the pusher
        // of the winning (first-popped) entry is the DFS tree parent.
        DomBuilder {
            vertex,
            index,
            parent,
            semi: (0..n as u32).collect(),
            idom: vec![NONE; n],
            bucket: vec![Vec::new(); n],
            ancestor: vec![NONE; n],
            label: (0..n as u32).collect(),
            size: vec![1; n],
            child: vec![NONE; n],
        }
    }

    /// Steps 2-4 of the algorithm: semi-dominators, implicit immediate
    /// dominators via buckets, then the relative-idom fixup pass.
    fn compute_idoms<P>(&mut self, preds: &P)
    where
        P: Fn(u32) -> Vec<u32>,
    {
        let n = self.vertex.len();
        for w in (1..n as u32).rev() {
            let p = self.parent[w as usize];
            for pv in preds(self.vertex[w as usize]) {
                // Predecessors outside the reachable set contribute nothing
                let v = match self.index.get(&pv) {
                    Some(&v) => v,
                    None => continue,
                };
                let u = self.eval(v);
                if self.semi[u as usize] < self.semi[w as usize] {
                    self.semi[w as usize] = self.semi[u as usize];
                }
            }
            self.bucket[self.semi[w as usize] as usize].push(w);
            self.link(p, w);

            let drained = std::mem::take(&mut self.bucket[p as usize]);
            for v in drained {
                let u = self.eval(v);
                self.idom[v as usize] = if self.semi[u as usize] < self.semi[v as usize] {
                    u
                } else {
                    p
                };
            }
        }

        // Ascending order: idom entries below `w` are already final, and the
        // root's self-loop keeps relatives of root-dominated vertices stable
        self.idom[0] = 0;
        for w in 1..n as u32 {
            if self.idom[w as usize] != self.semi[w as usize] {
                self.idom[w as usize] = self.idom[self.idom[w as usize] as usize];
            }
        }
    }

    fn eval(&mut self, v: u32) -> u32 {
        if self.ancestor[v as usize] == NONE {
            return self.label[v as usize];
        }
        self.compress(v);
        let a = self.ancestor[v as usize];
        let (lv, la) = (self.label[v as usize], self.label[a as usize]);
        if self.semi[la as usize] < self.semi[lv as usize] {
            la
        } else {
            lv
        }
    }

    fn compress(&mut self, v: u32) {
        // Unrolled recursion: walk up while the grandparent exists, then
        // apply label updates from the top of the chain downwards.
        let mut chain = Vec::new();
        let mut x = v;
        while self.ancestor[self.ancestor[x as usize] as usize] != NONE {
            chain.push(x);
            x = self.ancestor[x as usize];
        }
        while let Some(x) = chain.pop() {
            let a = self.ancestor[x as usize];
            let (lx, la) = (self.label[x as usize], self.label[a as usize]);
            if self.semi[la as usize] < self.semi[lx as usize] {
                self.label[x as usize] = la;
            }
            self.ancestor[x as usize] = self.ancestor[a as usize];
        }
    }

    fn size_of(&self, x: u32) -> u32 {
        if x == NONE {
            0
        } else {
            self.size[x as usize]
        }
    }

    /// Add edge `(v, w)` to the forest, balancing by subtree size.
    fn link(&mut self, v: u32, w: u32) {
        let mut s = w;
        while self.child[s as usize] != NONE
            && self.semi[self.label[w as usize] as usize]
                < self.semi[self.label[self.child[s as usize] as usize] as usize]
        {
            let cs = self.child[s as usize];
            let ccs = self.child[cs as usize];
            if self.size[s as usize] + self.size_of(ccs) >= 2 * self.size[cs as usize] {
                self.ancestor[cs as usize] = s;
                self.child[s as usize] = ccs;
            } else {
                self.size[cs as usize] = self.size[s as usize];
                self.ancestor[s as usize] = cs;
                s = cs;
            }
        }
        self.label[s as usize] = self.label[w as usize];
        self.size[v as usize] += self.size[w as usize];
        if self.size[v as usize] < 2 * self.size[w as usize] {
            std::mem::swap(&mut s, &mut self.child[v as usize]);
        }
        while s != NONE {
            self.ancestor[s as usize] = v;
            s = self.child[s as usize];
        }
    }

    /// Step 5: materialize tree nodes and number them.
    fn into_tree(self) -> DomTree {
        let n = self.vertex.len();
        let mut nodes: Vec<DomNode> = (0..n)
            .map(|i| DomNode {
                vertex: self.vertex[i],
                parent: if i == 0 { None } else { Some(self.idom[i]) },
                children: Vec::new(),
                pre: 0,
                post: 0,
            })
            .collect();
        for w in 1..n {
            let p = self.idom[w];
            nodes[p as usize].children.push(w as u32);
        }

        // One walk assigns both counters: `pre` on entry, `post` on exit.
        let mut pre = 0u32;
        let mut post = 0u32;
        let mut stack: Vec<(u32, bool)> = vec![(0, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                nodes[node as usize].post = post;
                post += 1;
                continue;
            }
            nodes[node as usize].pre = pre;
            pre += 1;
            stack.push((node, true));
            let children = nodes[node as usize].children.clone();
            for &c in children.iter().rev() {
                stack.push((c, false));
            }
        }

        let lookup = self
            .index
            .iter()
            .map(|(&vertex, &idx)| (vertex, idx))
            .collect();
        DomTree { nodes, lookup }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_for(edges: &[(u32, u32)], n: u32, root: u32) -> Option<DomTree> {
        let succs = move |v: u32| -> Vec<u32> {
            edges
                .iter()
                .filter(|&&(s, _)| s == v)
                .map(|&(_, t)| t)
                .collect()
        };
        let preds = move |v: u32| -> Vec<u32> {
            edges
                .iter()
                .filter(|&&(_, t)| t == v)
                .map(|&(s, _)| s)
                .collect()
        };
        let _ = n;
        build_dominator_tree(root, succs, preds)
    }

    #[test]
    fn test_trivial_graph_has_no_tree() {
        assert!(tree_for(&[], 1, 0).is_none());
    }

    #[test]
    fn test_chain_dominators() {
        // 0 -> 1 -> 2 -> 3
        let tree = tree_for(&[(0, 1), (1, 2), (2, 3)], 4, 0).unwrap();
        assert_eq!(tree.idom(1), Some(0));
        assert_eq!(tree.idom(2), Some(1));
        assert_eq!(tree.idom(3), Some(2));
        assert!(tree.dominates(0, 3, false));
        assert!(tree.dominates(1, 3, true));
        assert!(!tree.dominates(3, 1, false));
    }

    #[test]
    fn test_diamond_dominators() {
        // 0 -> {1, 2} -> 3
        let tree = tree_for(&[(0, 1), (0, 2), (1, 3), (2, 3)], 4, 0).unwrap();
        assert_eq!(tree.idom(1), Some(0));
        assert_eq!(tree.idom(2), Some(0));
        // Neither branch dominates the join
        assert_eq!(tree.idom(3), Some(0));
        assert!(!tree.dominates(1, 3, false));
        assert!(!tree.dominates(2, 3, false));
        assert!(tree.dominates(0, 3, false));
    }

    #[test]
    fn test_dominance_is_reflexive_and_antisymmetric() {
        let tree = tree_for(&[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)], 5, 0).unwrap();
        for v in 0..5 {
            assert!(tree.dominates(v, v, false));
            assert!(!tree.dominates(v, v, true));
        }
        for a in 0..5u32 {
            for b in 0..5u32 {
                if a != b {
                    assert!(
                        !(tree.dominates(a, b, false) && tree.dominates(b, a, false)),
                        "{a} and {b} dominate each other"
                    );
                }
            }
        }
    }

    #[test]
    fn test_dominance_transitivity() {
        let tree = tree_for(&[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 5)], 6, 0).unwrap();
        for a in 0..6u32 {
            for b in 0..6u32 {
                for c in 0..6u32 {
                    if tree.dominates(a, b, false) && tree.dominates(b, c, false) {
                        assert!(tree.dominates(a, c, false), "{a} -> {b} -> {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_post_dominators_by_swapped_accessors() {
        // Diamond again, but built from the exit over predecessors
        let edges = [(0u32, 1u32), (0, 2), (1, 3), (2, 3)];
        let succs = |v: u32| -> Vec<u32> {
            edges
                .iter()
                .filter(|&&(s, _)| s == v)
                .map(|&(_, t)| t)
                .collect()
        };
        let preds = |v: u32| -> Vec<u32> {
            edges
                .iter()
                .filter(|&&(_, t)| t == v)
                .map(|&(s, _)| s)
                .collect()
        };
        let post = build_dominator_tree(3, preds, succs).unwrap();
        // The join post-dominates every vertex
        for v in 0..4 {
            assert!(post.dominates(3, v, false));
        }
        assert!(!post.dominates(1, 0, false));
    }

    #[test]
    fn test_unreachable_vertex_is_not_dominated() {
        // Vertex 9 exists in the key space but is unreachable
        let tree = tree_for(&[(0, 1), (1, 2)], 3, 0).unwrap();
        assert!(!tree.dominates(0, 9, false));
        assert!(!tree.dominates(9, 0, false));
        assert!(tree.node_index(9).is_none());
    }

    #[test]
    fn test_irreducible_shape() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3, 2 -> 4, 3 -> 5, 4 -> 5
        // idom(5) must be 0 through either reconvergence chain
        let tree = tree_for(
            &[(0, 1), (0, 2), (1, 3), (2, 3), (2, 4), (3, 5), (4, 5)],
            6,
            0,
        )
        .unwrap();
        assert_eq!(tree.idom(3), Some(0));
        assert_eq!(tree.idom(5), Some(0));
        assert_eq!(tree.idom(4), Some(2));
    }
}
