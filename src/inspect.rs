//! Read-only queries over a compiled tree.

use crate::ast::Node;

impl<'a> Node<'a> {
    /// Direct children of `Multi` and section nodes.
    pub fn children(&self) -> &[Node<'a>] {
        match self {
            Node::Multi(nodes) => nodes,
            Node::Section(section) | Node::InvertedSection(section) => &section.body,
            _ => &[],
        }
    }

    /// Names of every interpolated value, in first-seen order.
    pub fn tags(&self) -> Vec<String> {
        self.collect_names(&mut |node| match node {
            Node::Interpolation { callee, .. } => Some(callee.to_string()),
            _ => None,
        })
    }

    /// Names of every section and inverted section, in first-seen order.
    pub fn sections(&self) -> Vec<String> {
        self.collect_names(&mut |node| match node {
            Node::Section(section) | Node::InvertedSection(section) => {
                Some(section.callee.to_string())
            }
            _ => None,
        })
    }

    /// Names of every referenced partial, in first-seen order.
    pub fn partials(&self) -> Vec<String> {
        self.collect_names(&mut |node| match node {
            Node::Partial { name, .. } => Some(name.to_string()),
            _ => None,
        })
    }

    /// Whether any interpolation in the tree takes arguments.
    pub fn has_arguments(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if let Node::Interpolation { args, .. } = node {
                found |= !args.is_empty();
            }
        });
        found
    }

    /// Visit this node and all of its descendants depth-first.
    pub fn walk(&self, visit: &mut impl FnMut(&Node<'a>)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    fn collect_names(&self, name_of: &mut impl FnMut(&Node<'a>) -> Option<String>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.walk(&mut |node| {
            if let Some(name) = name_of(node) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        });
        names
    }
}
