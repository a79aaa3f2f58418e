use crate::util::Stats;

use super::{Bvh4, ChildSource, Node4, Node4Mb, NodeKind, NodeRef};

impl<P> Bvh4<P> {
    pub fn print_tree(&self) {
        self.print_recursive(0, self.root());
    }

    pub fn print_statistics(&self) {
        let depth = self.depth_statistics(self.root());
        println!("Depth: {} - {}; avg {:.1}", depth.min, depth.max, depth.avg);
        println!("Inner node child count: {}", self.child_fill_statistics());
        println!("Leaf sizes: {}", self.leaf_fill_statistics());
    }

    fn depth_statistics(&self, node: NodeRef) -> Stats {
        let children: &[NodeRef] = match node.decode() {
            NodeKind::Node { index } => &self.nodes[index].children,
            NodeKind::NodeMb { index } => &self.mb_nodes[index].children,
            _ => return Stats::new_single(1),
        };

        let mut ret = children
            .iter()
            .take_while(|child| !child.is_empty())
            .map(|child| self.depth_statistics(*child))
            .reduce(|a, b| a.merge(&b))
            .unwrap_or_else(|| Stats::new_single(0));

        ret.min += 1;
        ret.max += 1;
        ret.avg += 1.0;

        ret
    }

    fn child_fill_statistics(&self) -> Stats {
        let mut stats = Stats::default();
        let fill = |children: &[NodeRef; 4]| {
            children.iter().take_while(|c| !c.is_empty()).count()
        };

        stats.add_samples(self.nodes.iter().map(|n| fill(&n.children)));
        stats.add_samples(self.mb_nodes.iter().map(|n| fill(&n.children)));

        stats
    }

    fn leaf_fill_statistics(&self) -> Stats {
        let mut stats = Stats::default();
        let mut to_visit = vec![self.root()];

        while let Some(node) = to_visit.pop() {
            let children: &[NodeRef] = match node.decode() {
                NodeKind::Node { index } => &self.nodes[index].children,
                NodeKind::NodeMb { index } => &self.mb_nodes[index].children,
                NodeKind::Leaf { prims } => {
                    stats.add_sample(prims.len());
                    continue;
                }
                _ => continue,
            };
            to_visit.extend(children.iter().take_while(|c| !c.is_empty()));
        }

        stats
    }

    fn print_recursive(&self, indent: usize, node: NodeRef) {
        let pad = "  ".repeat(indent);
        match node.decode() {
            NodeKind::Empty => println!("{pad}- <EMPTY>"),
            NodeKind::Sentinel => println!("{pad}- <SENTINEL>"),
            NodeKind::Leaf { prims } => {
                println!("{pad}- L{}: {} items", prims.first.raw(), prims.len())
            }
            NodeKind::Node { index } => {
                println!("{pad}- I{}", index.raw());
                self.print_children(indent, &self.nodes[index]);
            }
            NodeKind::NodeMb { index } => {
                println!("{pad}- M{}", index.raw());
                self.print_children_mb(indent, &self.mb_nodes[index]);
            }
        }
    }

    fn print_children(&self, indent: usize, node: &Node4) {
        for (i, child) in node.children.iter().enumerate() {
            if child.is_empty() {
                break;
            }
            let b = node.child_bounds(i);
            println!("{}  {:?}-{:?}", "  ".repeat(indent), b.min, b.max);
            self.print_recursive(indent + 1, *child);
        }
    }

    fn print_children_mb(&self, indent: usize, node: &Node4Mb) {
        for i in 0..4 {
            let child = node.child(i);
            if child.is_empty() {
                break;
            }
            self.print_recursive(indent + 1, child);
        }
    }
}
