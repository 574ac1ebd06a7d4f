//! Which nodes an index files, and under which key.

use arbor_types::{NodeKind, NodeRecord, Path};

use crate::def::{IndexDef, IndexDefKind};
use crate::key::IndexKey;

/// Key under which `def` files `node`, or `None` if the index ignores it.
///
/// `path` is the node's structural path: its own path for named nodes and
/// the path of the enclosing named node for value nodes.
#[must_use]
pub fn entry_key(def: &IndexDef, node: &NodeRecord, path: &Path) -> Option<IndexKey> {
    match def.kind() {
        IndexDefKind::Cas {
            content_type,
            paths,
        } => {
            if !indexes_value(node.kind) || !admits(paths, path) {
                return None;
            }
            let value = node.value.as_ref()?;
            let key = match content_type {
                Some(ty) => value.cast(*ty)?,
                None => value.clone(),
            };
            Some(IndexKey::Value(key))
        }
        IndexDefKind::Path { paths } => {
            if !node.kind.has_name() || !admits(paths, path) {
                return None;
            }
            Some(IndexKey::Path(path.clone()))
        }
        IndexDefKind::Name { included, excluded } => {
            let name = node.name.as_ref().filter(|_| node.kind.has_name())?;
            if excluded.contains(name) || (!included.is_empty() && !included.contains(name)) {
                return None;
            }
            Some(IndexKey::Name(name.clone()))
        }
    }
}

/// Kinds whose value a content-and-structure index files. Comments carry no
/// content in the structural sense.
const fn indexes_value(kind: NodeKind) -> bool {
    kind.has_value() && !matches!(kind, NodeKind::Comment)
}

fn admits(patterns: &[Path], path: &Path) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.matches(path))
}

#[cfg(test)]
mod tests {
    use arbor_types::{AtomicType, AtomicValue, NodeKey, QName};

    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn text(value: &str) -> NodeRecord {
        NodeRecord::new(NodeKey::new(7), NodeKind::Text).with_value(AtomicValue::from(value))
    }

    fn element(name: &str) -> NodeRecord {
        NodeRecord::new(NodeKey::new(3), NodeKind::Element).with_name(QName::local(name))
    }

    #[test]
    fn cas_casts_to_declared_type() {
        let def = IndexDef::cas(Some(AtomicType::Numeric), [p("/a/b")]);
        assert_eq!(
            entry_key(&def, &text("42"), &p("/a/b")),
            Some(IndexKey::Value(AtomicValue::Int(42)))
        );
        assert_eq!(entry_key(&def, &text("forty"), &p("/a/b")), None);
        assert_eq!(entry_key(&def, &text("42"), &p("/a/c")), None);
    }

    #[test]
    fn cas_without_type_keeps_value() {
        let def = IndexDef::cas(None, Vec::new());
        assert_eq!(
            entry_key(&def, &text("x"), &p("/any")),
            Some(IndexKey::Value(AtomicValue::from("x")))
        );
        let comment = NodeRecord::new(NodeKey::new(1), NodeKind::Comment)
            .with_value(AtomicValue::from("x"));
        assert_eq!(entry_key(&def, &comment, &p("/any")), None);
    }

    #[test]
    fn path_index_files_named_nodes() {
        let def = IndexDef::path([p("//b")]);
        assert_eq!(
            entry_key(&def, &element("b"), &p("/a/b")),
            Some(IndexKey::Path(p("/a/b")))
        );
        assert_eq!(entry_key(&def, &text("v"), &p("/a/b")), None);
    }

    #[test]
    fn name_index_include_exclude() {
        let all_but_c = IndexDef::name(Vec::new(), [QName::local("c")]);
        assert!(entry_key(&all_but_c, &element("b"), &p("/b")).is_some());
        assert!(entry_key(&all_but_c, &element("c"), &p("/c")).is_none());
        let only_b = IndexDef::name([QName::local("b")], Vec::new());
        assert!(entry_key(&only_b, &element("b"), &p("/b")).is_some());
        assert!(entry_key(&only_b, &element("d"), &p("/d")).is_none());
    }
}
