//! # Label dependency graph
//!
//! Declarative structure of a label model: `v` latent labels `Y_0..Y_{v-1}`,
//! `m` observed weak signals `λ_0..λ_{m-1}`, and three kinds of undirected
//! edges between them.
//!
//! ## Key Components
//!
//! - **Node / EdgeKind / Edge**: a single tagged representation covering every
//!   structural variation (no per-graph-type dispatch).
//! - **AnchorPlan**: for each latent `Y_k`, the connected components of the
//!   graph with `Y_k` removed. Observed nodes in distinct components are
//!   conditionally independent given `Y_k`.
//! - **Triplet / Bridge**: cached, nearest-first triplets consumed by the
//!   moment estimator. Computed once at construction.
//!
//! ## Invariants enforced by [`LabelGraph::new`]
//!
//! - every index is in range, no self loops, no duplicate edges
//! - every weak signal has exactly one `λ–Y` edge (its target)
//! - every latent is the target of at least one weak signal
//! - every latent separates at least three groups of weak signals, so every
//!   node participates in at least one conditionally-independent triplet
//!
//! Node indices are laid out latent-first: `Y_i` is node `i`, `λ_j` is node
//! `v + j`.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::engine::batcher::{chain_y_edges, frame_major_lambda_y_edges};
use crate::engine::errors::{LabelModelError, Result};

/// Maximum number of triplets cached per estimated correlation.
pub const MAX_CACHED_TRIPLETS: usize = 32;

/// Inline capacity for per-node adjacency lists.
const INLINE_ADJACENCY: usize = 8;

/// Marker for an observed node unreachable from an anchor once the anchor is
/// removed.
const NO_COMPONENT: u32 = u32::MAX;

/// A variable of the label model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Node {
    /// Unobserved true label `Y_i` at window position `i`.
    Latent(usize),
    /// Weak signal `λ_j`.
    Observed(usize),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Latent(i) => write!(f, "Y_{}", i),
            Node::Observed(j) => write!(f, "lambda_{}", j),
        }
    }
}

/// The three categories of pairwise dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EdgeKind {
    /// `Y–Y`: dependency between two latent labels.
    LatentLatent,
    /// `λ–Y`: a weak signal and the latent label it votes on.
    ObservedLatent,
    /// `λ–λ`: two weak signals correlated beyond their latent targets.
    ObservedObserved,
}

/// An undirected edge.
///
/// Endpoints are stored in declaration order; for `ObservedLatent` edges `a`
/// is always the weak signal and `b` the latent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Edge {
    pub kind: EdgeKind,
    pub a: Node,
    pub b: Node,
}

/// Three observed nodes that are mutually independent given `anchor`.
///
/// `members[0]` is the node whose correlation with the anchor is being
/// recovered; the other two are its partners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: usize,
    pub members: [usize; 3],
}

/// Path for recovering a `Y–Y` correlation through one weak signal.
///
/// `signal` targets `far`; its correlation with `near` is recovered from a
/// triplet anchored at `near`, then `ρ(Y_near, Y_far) = ρ(λ, Y_near) / ρ(λ, Y_far)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub signal: usize,
    pub near: usize,
    pub far: usize,
    pub triplets: Vec<Triplet>,
}

/// Separation structure of the graph around one latent anchor.
#[derive(Debug, Clone)]
pub(crate) struct AnchorPlan {
    /// Component id of each observed node once the anchor is removed.
    component_of: Vec<u32>,
    /// Hop distance from the anchor for each observed node.
    distance: Vec<u32>,
    /// Number of components that contain at least one observed node.
    informative_components: usize,
}

impl AnchorPlan {
    /// Component of an observed node, `None` if unreachable from the anchor.
    pub(crate) fn component(&self, signal: usize) -> Option<u32> {
        match self.component_of[signal] {
            NO_COMPONENT => None,
            c => Some(c),
        }
    }

    /// Whether two observed nodes are conditionally independent given the anchor.
    pub(crate) fn separated(&self, a: usize, b: usize) -> bool {
        match (self.component(a), self.component(b)) {
            (Some(ca), Some(cb)) => ca != cb,
            _ => false,
        }
    }
}

/// Validated, immutable structure of a label model.
#[derive(Debug, Clone)]
pub struct LabelGraph {
    num_signals: usize,
    num_latents: usize,
    edges: Vec<Edge>,
    adjacency: Vec<SmallVec<[usize; INLINE_ADJACENCY]>>,
    target: Vec<usize>,
    /// Edge index of each signal's `λ–Y` edge.
    signal_edge: Vec<usize>,
    signals_of: Vec<SmallVec<[usize; INLINE_ADJACENCY]>>,
    latent_component: Vec<usize>,
    component_count: usize,
    anchors: Vec<AnchorPlan>,
    signal_triplets: Vec<Vec<Triplet>>,
    latent_triplets: Vec<Vec<Triplet>>,
    /// Bridges per edge index; empty for non-latent edges.
    bridges: Vec<Vec<Bridge>>,
}

impl LabelGraph {
    /// Builds and validates a graph.
    ///
    /// * `m` - number of weak signals (columns of the label matrix)
    /// * `v` - number of latent labels per row (sequence window length)
    /// * `y_edges` - latent pairs `(p, q)` in `[0, v)`
    /// * `lambda_y_edges` - `(signal, latent)` pairs; must cover every signal once
    /// * `lambda_edges` - optional signal pairs in `[0, m)`
    pub fn new(
        m: usize,
        v: usize,
        y_edges: &[(usize, usize)],
        lambda_y_edges: &[(usize, usize)],
        lambda_edges: &[(usize, usize)],
    ) -> Result<Self> {
        if m == 0 {
            return Err(LabelModelError::Structural(
                "graph needs at least one weak signal".into(),
            ));
        }
        if v == 0 {
            return Err(LabelModelError::Structural(
                "graph needs at least one latent variable".into(),
            ));
        }

        let mut edges = Vec::with_capacity(y_edges.len() + lambda_y_edges.len() + lambda_edges.len());
        for &(p, q) in y_edges {
            check_index("y_edges", p, v, "latent")?;
            check_index("y_edges", q, v, "latent")?;
            edges.push(Edge {
                kind: EdgeKind::LatentLatent,
                a: Node::Latent(p),
                b: Node::Latent(q),
            });
        }
        for &(j, i) in lambda_y_edges {
            check_index("lambda_y_edges", j, m, "observed")?;
            check_index("lambda_y_edges", i, v, "latent")?;
            edges.push(Edge {
                kind: EdgeKind::ObservedLatent,
                a: Node::Observed(j),
                b: Node::Latent(i),
            });
        }
        for &(a, b) in lambda_edges {
            check_index("lambda_edges", a, m, "observed")?;
            check_index("lambda_edges", b, m, "observed")?;
            edges.push(Edge {
                kind: EdgeKind::ObservedObserved,
                a: Node::Observed(a),
                b: Node::Observed(b),
            });
        }

        let mut seen = FxHashSet::default();
        for edge in &edges {
            if edge.a == edge.b {
                return Err(LabelModelError::Structural(format!(
                    "self loop on {}",
                    edge.a
                )));
            }
            let key = if edge.a < edge.b {
                (edge.a, edge.b)
            } else {
                (edge.b, edge.a)
            };
            if !seen.insert(key) {
                return Err(LabelModelError::Structural(format!(
                    "duplicate edge {} - {}",
                    key.0, key.1
                )));
            }
        }

        let mut target: Vec<Option<usize>> = vec![None; m];
        for &(j, i) in lambda_y_edges {
            if let Some(previous) = target[j] {
                return Err(LabelModelError::Structural(format!(
                    "weak signal {} has more than one target latent (Y_{} and Y_{})",
                    j, previous, i
                )));
            }
            target[j] = Some(i);
        }
        let target = target
            .into_iter()
            .enumerate()
            .map(|(j, t)| {
                t.ok_or_else(|| {
                    LabelModelError::Structural(format!(
                        "weak signal {} has no lambda_y edge to a target latent",
                        j
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut signal_edge = vec![0; m];
        for (idx, edge) in edges.iter().enumerate() {
            if let (EdgeKind::ObservedLatent, Node::Observed(j)) = (edge.kind, edge.a) {
                signal_edge[j] = idx;
            }
        }

        let mut signals_of: Vec<SmallVec<[usize; INLINE_ADJACENCY]>> = vec![SmallVec::new(); v];
        for (j, &i) in target.iter().enumerate() {
            signals_of[i].push(j);
        }
        if let Some(orphan) = signals_of.iter().position(|s| s.is_empty()) {
            return Err(LabelModelError::Structural(format!(
                "latent Y_{} is not the target of any weak signal",
                orphan
            )));
        }

        let mut adjacency: Vec<SmallVec<[usize; INLINE_ADJACENCY]>> =
            vec![SmallVec::new(); v + m];
        for edge in &edges {
            let a = node_index(edge.a, v);
            let b = node_index(edge.b, v);
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        for adjacent in &mut adjacency {
            adjacent.sort_unstable();
        }

        let (latent_component, component_count) = latent_components(v, &edges);

        let mut graph = Self {
            num_signals: m,
            num_latents: v,
            edges,
            adjacency,
            target,
            signal_edge,
            signals_of,
            latent_component,
            component_count,
            anchors: Vec::with_capacity(v),
            signal_triplets: Vec::new(),
            latent_triplets: Vec::new(),
            bridges: Vec::new(),
        };

        for k in 0..v {
            let plan = graph.build_anchor_plan(k);
            if plan.informative_components < 3 {
                return Err(LabelModelError::Structural(format!(
                    "Y_{} separates only {} group(s) of weak signals; \
                     at least 3 conditionally independent groups are needed for a triplet",
                    k, plan.informative_components
                )));
            }
            graph.anchors.push(plan);
        }

        let mut signal_triplets = Vec::with_capacity(m);
        for j in 0..m {
            let triplets = graph.anchor_triplets(graph.target[j], j);
            if triplets.is_empty() {
                return Err(LabelModelError::Structural(format!(
                    "weak signal {} has no conditionally independent triplet at Y_{}",
                    j, graph.target[j]
                )));
            }
            signal_triplets.push(triplets);
        }

        let latent_triplets = (0..v)
            .map(|k| {
                graph.signals_of[k]
                    .iter()
                    .filter_map(|&j| signal_triplets[j].first().copied())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut bridges = vec![Vec::new(); graph.edges.len()];
        for (idx, edge) in graph.edges.iter().enumerate() {
            let (Node::Latent(p), Node::Latent(q)) = (edge.a, edge.b) else {
                continue;
            };
            let mut found = Vec::new();
            for (near, far) in [(p, q), (q, p)] {
                for &signal in &graph.signals_of[far] {
                    let triplets = graph.anchor_triplets(near, signal);
                    if !triplets.is_empty() {
                        found.push(Bridge {
                            signal,
                            near,
                            far,
                            triplets,
                        });
                    }
                }
            }
            if found.is_empty() {
                return Err(LabelModelError::Structural(format!(
                    "latent edge Y_{} - Y_{} has no weak signal bridging it into a triplet",
                    p, q
                )));
            }
            bridges[idx] = found;
        }

        graph.signal_triplets = signal_triplets;
        graph.latent_triplets = latent_triplets;
        graph.bridges = bridges;
        Ok(graph)
    }

    /// Non-sequential model: one latent, every signal votes on it.
    pub fn independent(m: usize) -> Result<Self> {
        let lambda_y: Vec<(usize, usize)> = (0..m).map(|j| (j, 0)).collect();
        Self::new(m, 1, &[], &lambda_y, &[])
    }

    /// Chain over `v` frames with `m_per_frame` signals each, wired frame-major.
    pub fn sequence(m_per_frame: usize, v: usize) -> Result<Self> {
        let y_edges = chain_y_edges(v);
        let lambda_y = frame_major_lambda_y_edges(m_per_frame, v);
        Self::new(m_per_frame * v, v, &y_edges, &lambda_y, &[])
    }

    pub fn num_signals(&self) -> usize {
        self.num_signals
    }

    pub fn num_latents(&self) -> usize {
        self.num_latents
    }

    /// Total node count `v + m`.
    pub fn num_nodes(&self) -> usize {
        self.num_latents + self.num_signals
    }

    /// All nodes, latents first.
    pub fn nodes(&self) -> impl Iterator<Item = Node> + '_ {
        let v = self.num_latents;
        (0..self.num_nodes()).map(move |idx| index_node(idx, v))
    }

    /// Edges in declaration order: `Y–Y`, then `λ–Y`, then `λ–λ`.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Neighbours of a node; empty for a node outside the graph.
    pub fn neighbors(&self, node: Node) -> impl Iterator<Item = Node> + '_ {
        let v = self.num_latents;
        let slot = match node {
            Node::Latent(k) if k < v => self.adjacency.get(k),
            Node::Latent(_) => None,
            Node::Observed(j) => v.checked_add(j).and_then(|idx| self.adjacency.get(idx)),
        };
        slot.into_iter()
            .flatten()
            .map(move |&idx| index_node(idx, v))
    }

    /// Target latent of weak signal `j`, or `None` past the last signal.
    pub fn target(&self, signal: usize) -> Option<usize> {
        self.target.get(signal).copied()
    }

    /// Target latent of every weak signal, in signal order.
    pub fn targets(&self) -> &[usize] {
        &self.target
    }

    /// Index into [`Self::edges`] of weak signal `j`'s `λ–Y` edge.
    ///
    /// Panics if `signal >= num_signals()`.
    pub fn signal_edge(&self, signal: usize) -> usize {
        self.signal_edge[signal]
    }

    /// Weak signals targeting latent `k`, ascending.
    ///
    /// Panics if `latent >= num_latents()`.
    pub fn signals_of(&self, latent: usize) -> &[usize] {
        &self.signals_of[latent]
    }

    /// `(edge index, p, q)` for every `Y–Y` edge.
    pub fn latent_edges(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(idx, edge)| match (edge.a, edge.b) {
                (Node::Latent(p), Node::Latent(q)) => Some((idx, p, q)),
                _ => None,
            })
    }

    /// Connected component (over `Y–Y` edges) of latent `k`.
    ///
    /// Panics if `latent >= num_latents()`.
    pub fn latent_component(&self, latent: usize) -> usize {
        self.latent_component[latent]
    }

    /// Number of connected components among latents.
    pub fn component_count(&self) -> usize {
        self.component_count
    }

    /// Latents of component `c`, ascending.
    pub fn component_latents(&self, component: usize) -> Vec<usize> {
        (0..self.num_latents)
            .filter(|&k| self.latent_component[k] == component)
            .collect()
    }

    /// Whether the `Y–Y` edges form a forest (exact tree message passing applies).
    pub fn is_latent_forest(&self) -> bool {
        self.latent_edges().count() + self.component_count == self.num_latents
    }

    /// Cached triplets for a node, nearest-first.
    ///
    /// For `λ_j` these are anchored at its target and start with `λ_j`; for
    /// `Y_k` they are the leading triplet of each signal targeting `Y_k`.
    pub fn triplets_for(&self, node: Node) -> &[Triplet] {
        match node {
            Node::Observed(j) => &self.signal_triplets[j],
            Node::Latent(k) => &self.latent_triplets[k],
        }
    }

    /// Bridges for the `Y–Y` edge at `edge_index` (empty for other kinds).
    pub fn bridges(&self, edge_index: usize) -> &[Bridge] {
        self.bridges
            .get(edge_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn anchor(&self, latent: usize) -> &AnchorPlan {
        &self.anchors[latent]
    }

    fn build_anchor_plan(&self, anchor: usize) -> AnchorPlan {
        let v = self.num_latents;
        let total = self.num_nodes();
        let mut component = vec![NO_COMPONENT; total];
        let mut informative = FxHashSet::default();
        let mut queue = VecDeque::new();
        let mut next_component = 0u32;

        for &start in &self.adjacency[anchor] {
            if component[start] != NO_COMPONENT {
                continue;
            }
            component[start] = next_component;
            queue.push_back(start);
            while let Some(node) = queue.pop_front() {
                if node >= v {
                    informative.insert(next_component);
                }
                for &next in &self.adjacency[node] {
                    if next != anchor && component[next] == NO_COMPONENT {
                        component[next] = next_component;
                        queue.push_back(next);
                    }
                }
            }
            next_component += 1;
        }

        let mut distance = vec![u32::MAX; total];
        distance[anchor] = 0;
        queue.push_back(anchor);
        while let Some(node) = queue.pop_front() {
            for &next in &self.adjacency[node] {
                if distance[next] == u32::MAX {
                    distance[next] = distance[node] + 1;
                    queue.push_back(next);
                }
            }
        }

        AnchorPlan {
            component_of: component[v..].to_vec(),
            distance: distance[v..].to_vec(),
            informative_components: informative.len(),
        }
    }

    /// Nearest-first triplets anchored at `anchor` that start with `member`.
    fn anchor_triplets(&self, anchor: usize, member: usize) -> Vec<Triplet> {
        let plan = &self.anchors[anchor];
        let Some(own) = plan.component(member) else {
            return Vec::new();
        };

        let mut partners: Vec<usize> = (0..self.num_signals)
            .filter(|&x| x != member && plan.component(x).is_some_and(|c| c != own))
            .collect();
        partners.sort_by_key(|&x| (plan.distance[x], x));

        let mut triplets = Vec::new();
        'outer: for (i, &b) in partners.iter().enumerate() {
            for &c in &partners[i + 1..] {
                if plan.separated(b, c) {
                    triplets.push(Triplet {
                        anchor,
                        members: [member, b, c],
                    });
                    if triplets.len() == MAX_CACHED_TRIPLETS {
                        break 'outer;
                    }
                }
            }
        }
        triplets
    }
}

#[inline]
pub(crate) fn node_index(node: Node, num_latents: usize) -> usize {
    match node {
        Node::Latent(i) => i,
        Node::Observed(j) => num_latents + j,
    }
}

#[inline]
fn index_node(idx: usize, num_latents: usize) -> Node {
    if idx < num_latents {
        Node::Latent(idx)
    } else {
        Node::Observed(idx - num_latents)
    }
}

fn check_index(list: &str, idx: usize, bound: usize, kind: &str) -> Result<()> {
    if idx >= bound {
        return Err(LabelModelError::Structural(format!(
            "{}: {} index {} out of range [0, {})",
            list, kind, idx, bound
        )));
    }
    Ok(())
}

fn latent_components(v: usize, edges: &[Edge]) -> (Vec<usize>, usize) {
    let mut parent: Vec<usize> = (0..v).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for edge in edges {
        if let (Node::Latent(p), Node::Latent(q)) = (edge.a, edge.b) {
            let rp = find(&mut parent, p);
            let rq = find(&mut parent, q);
            if rp != rq {
                parent[rp.max(rq)] = rp.min(rq);
            }
        }
    }

    // Relabel roots densely in order of first appearance.
    let mut label = vec![usize::MAX; v];
    let mut component = vec![0; v];
    let mut count = 0;
    for k in 0..v {
        let root = find(&mut parent, k);
        if label[root] == usize::MAX {
            label[root] = count;
            count += 1;
        }
        component[k] = label[root];
    }
    (component, count)
}
