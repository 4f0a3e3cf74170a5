//! Directory tree text for the top of a bundle.

use std::collections::BTreeMap;

use crate::scan::ScanResult;

#[derive(Default)]
struct Node {
    children: BTreeMap<String, Node>,
    is_file: bool,
}

/// Draw the scanned files as a tree rooted at `name`.
///
/// ```text
/// proj/
/// ├── src/
/// │   └── lib.rs
/// └── README.md
/// ```
pub fn render_tree(name: &str, scan: &ScanResult) -> String {
    let mut root = Node::default();
    for file in scan.files() {
        let mut node = &mut root;
        for part in file.relative_path.split('/') {
            node = node.children.entry(part.to_string()).or_default();
        }
        node.is_file = true;
    }

    let mut out = format!("{}/\n", name);
    draw(&root, "", &mut out);
    out
}

fn draw(node: &Node, prefix: &str, out: &mut String) {
    let count = node.children.len();
    for (i, (name, child)) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        let suffix = if child.is_file && child.children.is_empty() { "" } else { "/" };
        out.push_str(&format!("{}{}{}{}\n", prefix, branch, name, suffix));
        if !child.children.is_empty() {
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            draw(child, &next, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::FileRecord;
    use std::path::PathBuf;

    fn record(rel: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from("/proj").join(rel),
            relative_path: rel.to_string(),
            size: 1,
            extension: String::new(),
            binary: false,
        }
    }

    #[test]
    fn test_tree_layout() {
        let scan = ScanResult::new(
            PathBuf::from("/proj"),
            vec![record("README.md"), record("src/a/mod.rs"), record("src/lib.rs")],
        );
        let tree = render_tree("proj", &scan);
        let expected = concat!(
            "proj/\n",
            "├── README.md\n",
            "└── src/\n",
            "    ├── a/\n",
            "    │   └── mod.rs\n",
            "    └── lib.rs\n",
        );
        assert_eq!(tree, expected);
    }
}
