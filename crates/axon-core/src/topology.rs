//! Directional topology graph reconstructed from neighbor claims
//!
//! Every module periodically reports which module it sees in each of its
//! four directions. A claim alone is not an edge: A-right->B only becomes
//! a resolved edge once B also claims A on its left. Until both sides
//! agree the edge stays pending, so a half-delivered or stale claim never
//! produces a phantom link.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

use crate::module::{Direction, ModuleDescriptor, ModuleId, ModuleKind};

/// Claim-based adjacency graph with a completeness predicate
#[derive(Debug, Default)]
pub struct TopologyGraph {
    /// Latest neighbor claims per module, by direction
    claims: HashMap<ModuleId, [Option<ModuleId>; 4]>,
    /// When the most recent edge became mutually confirmed
    last_resolution: Option<DateTime<Utc>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one module's neighbor claims into edge resolution.
    ///
    /// Conflicting claims (a different id in a previously claimed slot)
    /// are replaced last-writer-wins and logged; redelivering identical
    /// claims is a no-op and does not disturb the quiet period.
    pub fn apply_claims(
        &mut self,
        id: ModuleId,
        neighbors: [Option<ModuleId>; 4],
        at: DateTime<Utc>,
    ) {
        if self.claims.get(&id) == Some(&neighbors) {
            return;
        }
        if let Some(old) = self.claims.get(&id) {
            for dir in Direction::ALL {
                let (prev, next) = (old[dir.index()], neighbors[dir.index()]);
                if let (Some(a), Some(b)) = (prev, next) {
                    if a != b {
                        warn!(
                            module = %id, ?dir, was = %a, now = %b,
                            "conflicting neighbor claim, keeping the newer one"
                        );
                    }
                }
            }
        }

        let before = self.resolved_pairs().len();
        self.claims.insert(id, neighbors);
        let after = self.resolved_pairs().len();
        if after > before {
            debug!(module = %id, edges = after, "topology edge resolved");
            self.last_resolution = Some(at);
        }
    }

    /// Mutually confirmed neighbors of one module
    pub fn resolved_neighbors(&self, id: ModuleId) -> Vec<(Direction, ModuleId)> {
        let Some(claims) = self.claims.get(&id) else {
            return Vec::new();
        };
        Direction::ALL
            .into_iter()
            .filter_map(|dir| {
                let other = claims[dir.index()]?;
                let reciprocal = self.claims.get(&other)?[dir.opposite().index()];
                (reciprocal == Some(id)).then_some((dir, other))
            })
            .collect()
    }

    /// All resolved edges as normalized id pairs
    pub fn resolved_pairs(&self) -> BTreeSet<(ModuleId, ModuleId)> {
        let mut pairs = BTreeSet::new();
        for &id in self.claims.keys() {
            for (_, other) in self.resolved_neighbors(id) {
                pairs.insert((id.min(other), id.max(other)));
            }
        }
        pairs
    }

    /// Breadth-first traversal over resolved edges, in visit order
    pub fn visit_from(&self, root: ModuleId) -> Vec<ModuleId> {
        let mut visited = vec![root];
        let mut seen: HashSet<ModuleId> = visited.iter().copied().collect();
        let mut queue: VecDeque<ModuleId> = VecDeque::from([root]);
        while let Some(id) = queue.pop_front() {
            for (_, other) in self.resolved_neighbors(id) {
                if seen.insert(other) {
                    visited.push(other);
                    queue.push_back(other);
                }
            }
        }
        visited
    }

    /// Completeness: a traversal from the root reaches every known id and
    /// no new edge has resolved within the quiet period (the total module
    /// count is not known upfront, so a settling window stands in for it).
    pub fn is_complete(
        &self,
        root: Option<ModuleId>,
        known_ids: &[ModuleId],
        quiet_ms: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(root) = root else {
            return false;
        };
        let visited: HashSet<ModuleId> = self.visit_from(root).into_iter().collect();
        if !known_ids.iter().all(|id| visited.contains(id)) {
            return false;
        }
        self.last_resolution
            .map_or(true, |at| (now - at).num_milliseconds() >= quiet_ms)
    }

    /// Forget every claim, used on facade-driven full reset
    pub fn clear(&mut self) {
        self.claims.clear();
        self.last_resolution = None;
    }
}

/// Render an ASCII map of the modules, laid out from the network root by
/// physical direction. Only mutually confirmed links place a module.
pub fn render_module_map(modules: &[ModuleDescriptor], include_ids: bool) -> String {
    let mut graph = TopologyGraph::new();
    let at = Utc::now();
    for module in modules {
        graph.apply_claims(module.id, module.neighbors, at);
    }

    let Some(root) = modules
        .iter()
        .filter(|m| m.kind == Some(ModuleKind::Network))
        .map(|m| m.id)
        .min()
    else {
        return String::from("(no network module)\n");
    };

    // Walk outward from the root, assigning grid coordinates by direction
    let mut coords: HashMap<ModuleId, (i32, i32)> = HashMap::from([(root, (0, 0))]);
    let mut queue: VecDeque<ModuleId> = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        let (x, y) = coords[&id];
        for (dir, other) in graph.resolved_neighbors(id) {
            let pos = match dir {
                Direction::Right => (x + 1, y),
                Direction::Top => (x, y + 1),
                Direction::Left => (x - 1, y),
                Direction::Bottom => (x, y - 1),
            };
            if !coords.contains_key(&other) {
                coords.insert(other, pos);
                queue.push_back(other);
            }
        }
    }

    let labels: HashMap<ModuleId, String> = modules
        .iter()
        .map(|m| {
            let name = m.kind.map(|k| k.label()).unwrap_or("?");
            let label = if include_ids {
                format!("{name}:{}", m.id)
            } else {
                name.to_string()
            };
            (m.id, label)
        })
        .collect();

    let cell = labels.values().map(|l| l.len()).max().unwrap_or(1) + 2;
    let min_x = coords.values().map(|&(x, _)| x).min().unwrap_or(0);
    let max_x = coords.values().map(|&(x, _)| x).max().unwrap_or(0);
    let min_y = coords.values().map(|&(_, y)| y).min().unwrap_or(0);
    let max_y = coords.values().map(|&(_, y)| y).max().unwrap_or(0);

    let mut out = String::new();
    for y in (min_y..=max_y).rev() {
        for x in min_x..=max_x {
            let label = coords
                .iter()
                .find(|&(_, &pos)| pos == (x, y))
                .and_then(|(id, _)| labels.get(id).cloned())
                .unwrap_or_default();
            out.push_str(&format!("{label:<cell$}"));
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out.push('\n');
    }

    let unplaced: Vec<String> = modules
        .iter()
        .filter(|m| !coords.contains_key(&m.id))
        .map(|m| labels[&m.id].clone())
        .collect();
    if !unplaced.is_empty() {
        out.push_str(&format!("unlinked: {}\n", unplaced.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleDescriptor;
    use chrono::Duration;

    fn claims(
        right: Option<u16>,
        top: Option<u16>,
        left: Option<u16>,
        bottom: Option<u16>,
    ) -> [Option<ModuleId>; 4] {
        [right.map(ModuleId), top.map(ModuleId), left.map(ModuleId), bottom.map(ModuleId)]
    }

    /// ids {0: Network, 1: Button, 2: Led} with mutual claims
    /// 0 -right-> 1, 1 -bottom-> 2
    fn chain_of_three(at: DateTime<Utc>) -> TopologyGraph {
        let mut graph = TopologyGraph::new();
        graph.apply_claims(ModuleId(0), claims(Some(1), None, None, None), at);
        graph.apply_claims(ModuleId(1), claims(None, None, Some(0), Some(2)), at);
        graph.apply_claims(ModuleId(2), claims(None, Some(1), None, None), at);
        graph
    }

    #[test]
    fn test_completeness_for_a_three_module_chain() {
        let t0 = Utc::now();
        let graph = chain_of_three(t0);
        let known = [ModuleId(0), ModuleId(1), ModuleId(2)];

        let visited = graph.visit_from(ModuleId(0));
        assert_eq!(visited, vec![ModuleId(0), ModuleId(1), ModuleId(2)]);

        let settled = t0 + Duration::milliseconds(600);
        assert!(graph.is_complete(Some(ModuleId(0)), &known, 500, settled));
        // Within the quiet period the graph may still be growing
        assert!(!graph.is_complete(Some(ModuleId(0)), &known, 500, t0));
    }

    #[test]
    fn test_one_sided_claim_is_not_an_edge() {
        let t0 = Utc::now();
        let mut graph = TopologyGraph::new();
        graph.apply_claims(ModuleId(0), claims(Some(1), None, None, None), t0);
        assert!(graph.resolved_neighbors(ModuleId(0)).is_empty());

        // Agreement in the wrong direction does not count either
        graph.apply_claims(ModuleId(1), claims(Some(0), None, None, None), t0);
        assert!(graph.resolved_neighbors(ModuleId(0)).is_empty());

        // Only the reciprocal slot resolves the edge
        graph.apply_claims(ModuleId(1), claims(None, None, Some(0), None), t0);
        assert_eq!(
            graph.resolved_neighbors(ModuleId(0)),
            vec![(Direction::Right, ModuleId(1))]
        );
    }

    #[test]
    fn test_completeness_is_monotonic_and_idempotent() {
        let t0 = Utc::now();
        let mut graph = chain_of_three(t0);
        let known = [ModuleId(0), ModuleId(1), ModuleId(2)];
        let settled = t0 + Duration::milliseconds(600);
        assert!(graph.is_complete(Some(ModuleId(0)), &known, 500, settled));

        // Redelivering any already-seen claims keeps it complete
        graph.apply_claims(ModuleId(1), claims(None, None, Some(0), Some(2)), settled);
        graph.apply_claims(ModuleId(0), claims(Some(1), None, None, None), settled);
        assert!(graph.is_complete(Some(ModuleId(0)), &known, 500, settled));
    }

    #[test]
    fn test_conflicting_claim_last_writer_wins() {
        let t0 = Utc::now();
        let mut graph = TopologyGraph::new();
        graph.apply_claims(ModuleId(0), claims(Some(1), None, None, None), t0);
        graph.apply_claims(ModuleId(1), claims(None, None, Some(0), None), t0);
        assert_eq!(graph.resolved_pairs().len(), 1);

        // Module 0 now claims a different right-hand neighbor
        let t1 = t0 + Duration::milliseconds(10);
        graph.apply_claims(ModuleId(0), claims(Some(2), None, None, None), t1);
        assert!(graph.resolved_neighbors(ModuleId(0)).is_empty());
        graph.apply_claims(ModuleId(2), claims(None, None, Some(0), None), t1);
        assert_eq!(
            graph.resolved_neighbors(ModuleId(0)),
            vec![(Direction::Right, ModuleId(2))]
        );
    }

    #[test]
    fn test_unreached_module_blocks_completeness() {
        let t0 = Utc::now();
        let graph = chain_of_three(t0);
        let known = [ModuleId(0), ModuleId(1), ModuleId(2), ModuleId(9)];
        let settled = t0 + Duration::milliseconds(600);
        assert!(!graph.is_complete(Some(ModuleId(0)), &known, 500, settled));
        assert!(!graph.is_complete(None, &known, 500, settled));
    }

    #[test]
    fn test_render_map_places_modules_by_direction() {
        let t0 = Utc::now();
        let mut network = ModuleDescriptor::announced(ModuleId(0), ModuleKind::Network, 0, t0);
        network.neighbors = claims(Some(1), None, None, None);
        let mut button = ModuleDescriptor::announced(ModuleId(1), ModuleKind::Button, 0, t0);
        button.neighbors = claims(None, None, Some(0), Some(2));
        let mut led = ModuleDescriptor::announced(ModuleId(2), ModuleKind::Led, 0, t0);
        led.neighbors = claims(None, Some(1), None, None);

        let map = render_module_map(&[network, button, led], true);
        let lines: Vec<&str> = map.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Network:0"));
        assert!(lines[0].contains("Button:1"));
        assert!(lines[1].contains("Led:2"));
        assert!(!map.contains("unlinked"));
    }
}
