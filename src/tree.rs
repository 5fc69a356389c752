use std::collections::{BTreeMap, HashMap};

use crate::models::{DiffEntry, Entry};

/// Parent path of a `/`-separated relative path; `""` for root-level items.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Every strict ancestor of `path`, nearest first.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let mut cur = path;
    std::iter::from_fn(move || {
        let parent = parent_path(cur);
        if parent.is_empty() {
            return None;
        }
        cur = parent;
        Some(parent)
    })
}

/// Anything the assembler can place in a tree.
pub trait TreeItem {
    fn path(&self) -> &str;
    fn is_dir(&self) -> bool;

    fn name(&self) -> &str {
        let path = self.path();
        match path.rfind('/') {
            Some(i) => &path[i + 1..],
            None => path,
        }
    }
}

impl TreeItem for Entry {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl TreeItem for DiffEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_dir(&self) -> bool {
        DiffEntry::is_dir(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<T> {
    pub item: T,
    pub children: Vec<Node<T>>,
}

impl<T: TreeItem> Node<T> {
    /// Number of nodes in this subtree, itself included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(Node::subtree_size).sum::<usize>()
    }

    /// Depth-first visit, parents before children.
    pub fn walk<'a>(&'a self, depth: usize, f: &mut impl FnMut(&'a Node<T>, usize)) {
        f(self, depth);
        for child in &self.children {
            child.walk(depth + 1, f);
        }
    }
}

fn sort_nodes<T: TreeItem>(nodes: &mut [Node<T>]) {
    nodes.sort_by(|a, b| {
        b.item
            .is_dir()
            .cmp(&a.item.is_dir())
            .then_with(|| a.item.name().cmp(b.item.name()))
            .then_with(|| a.item.path().cmp(b.item.path()))
    });
}

/// Rebuilds the parent/child forest from a flat path-keyed set.
///
/// Items whose parent path is not itself in the input become roots, so a
/// missing intermediate directory never drops its descendants. The result
/// does not depend on input order.
pub fn assemble<T, I>(items: I) -> Vec<Node<T>>
where
    T: TreeItem,
    I: IntoIterator<Item = T>,
{
    // First pass: one slot per distinct path.
    let mut slots: BTreeMap<String, T> = BTreeMap::new();
    for item in items {
        slots.insert(item.path().to_string(), item);
    }

    // Second pass: group each path under its parent, if the parent exists.
    let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots = Vec::new();
    for path in slots.keys() {
        let parent = parent_path(path);
        if !parent.is_empty() && slots.contains_key(parent) {
            children_of
                .entry(parent.to_string())
                .or_default()
                .push(path.clone());
        } else {
            roots.push(path.clone());
        }
    }

    fn build<T: TreeItem>(
        path: &str,
        slots: &mut BTreeMap<String, T>,
        children_of: &mut HashMap<String, Vec<String>>,
    ) -> Option<Node<T>> {
        let item = slots.remove(path)?;
        let mut children: Vec<Node<T>> = children_of
            .remove(path)
            .unwrap_or_default()
            .iter()
            .filter_map(|c| build(c, slots, children_of))
            .collect();
        sort_nodes(&mut children);
        Some(Node { item, children })
    }

    let mut forest: Vec<Node<T>> = roots
        .iter()
        .filter_map(|p| build(p, &mut slots, &mut children_of))
        .collect();
    sort_nodes(&mut forest);
    forest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, is_dir: bool) -> Entry {
        Entry {
            path: path.into(),
            name: path.rsplit('/').next().unwrap().into(),
            is_dir,
            size: 0,
            modified: 0,
            digest: None,
        }
    }

    fn shape(nodes: &[Node<Entry>]) -> Vec<String> {
        let mut out = Vec::new();
        for n in nodes {
            n.walk(0, &mut |node, depth| {
                out.push(format!("{}{}", "  ".repeat(depth), node.item.name))
            });
        }
        out
    }

    #[test]
    fn parent_and_ancestors() {
        assert_eq!(parent_path("a/b/c.txt"), "a/b");
        assert_eq!(parent_path("c.txt"), "");
        let all: Vec<&str> = ancestors("a/b/c.txt").collect();
        assert_eq!(all, vec!["a/b", "a"]);
        assert_eq!(ancestors("top").count(), 0);
    }

    #[test]
    fn rebuilds_nested_shape() {
        let forest = assemble(vec![
            entry("z.txt", false),
            entry("a", true),
            entry("a/b", true),
            entry("a/b/c.txt", false),
            entry("a/x.txt", false),
        ]);
        assert_eq!(
            shape(&forest),
            vec!["a", "  b", "    c.txt", "  x.txt", "z.txt"]
        );
        assert_eq!(forest.iter().map(Node::subtree_size).sum::<usize>(), 5);
    }

    #[test]
    fn independent_of_input_order() {
        let items = vec![
            entry("a/b/c.txt", false),
            entry("a/x.txt", false),
            entry("a", true),
            entry("a/b", true),
            entry("z.txt", false),
        ];
        let mut reversed = items.clone();
        reversed.reverse();
        assert_eq!(assemble(items), assemble(reversed));
    }

    #[test]
    fn orphans_are_promoted_to_roots() {
        let forest = assemble(vec![entry("a/b/c.txt", false), entry("a/b/d", true)]);
        assert_eq!(shape(&forest), vec!["d", "c.txt"]);
    }

    #[test]
    fn empty_input_empty_forest() {
        assert!(assemble(Vec::<Entry>::new()).is_empty());
    }
}
