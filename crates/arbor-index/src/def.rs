//! Index definitions and the per-resource index catalog.

use std::fmt;

use arbor_error::{ArborError, Result};
use arbor_types::encoding::{ByteReader, ByteWriter};
use arbor_types::{AtomicType, IndexId, IndexType, Path, QName};

/// What an index covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum IndexDefKind {
    /// Content-and-structure index over node values, optionally cast to
    /// `content_type`, restricted to `paths` (all paths when empty).
    Cas {
        content_type: Option<AtomicType>,
        paths: Vec<Path>,
    },
    /// Structural path index restricted to `paths` (all paths when empty).
    Path { paths: Vec<Path> },
    /// Name index. An empty `included` set admits every name not excluded.
    Name {
        included: Vec<QName>,
        excluded: Vec<QName>,
    },
}

impl IndexDefKind {
    #[must_use]
    pub const fn index_type(&self) -> IndexType {
        match self {
            Self::Cas { .. } => IndexType::Cas,
            Self::Path { .. } => IndexType::Path,
            Self::Name { .. } => IndexType::Name,
        }
    }

    /// Path restriction, empty for name indexes.
    #[must_use]
    pub fn paths(&self) -> &[Path] {
        match self {
            Self::Cas { paths, .. } | Self::Path { paths } => paths,
            Self::Name { .. } => &[],
        }
    }
}

fn normalize_paths(mut paths: Vec<Path>) -> Vec<Path> {
    paths.sort_by_cached_key(ToString::to_string);
    paths.dedup();
    paths
}

fn normalize_names(mut names: Vec<QName>) -> Vec<QName> {
    names.sort();
    names.dedup();
    names
}

/// A secondary index definition.
///
/// Definitions built with [`IndexDef::cas`], [`IndexDef::path`] or
/// [`IndexDef::name`] carry a placeholder id until added to an
/// [`IndexDefs`] catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexDef {
    id: IndexId,
    kind: IndexDefKind,
}

impl IndexDef {
    #[must_use]
    pub fn cas(content_type: Option<AtomicType>, paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            id: IndexId::new(0),
            kind: IndexDefKind::Cas {
                content_type,
                paths: normalize_paths(paths.into_iter().collect()),
            },
        }
    }

    #[must_use]
    pub fn path(paths: impl IntoIterator<Item = Path>) -> Self {
        Self {
            id: IndexId::new(0),
            kind: IndexDefKind::Path {
                paths: normalize_paths(paths.into_iter().collect()),
            },
        }
    }

    #[must_use]
    pub fn name(
        included: impl IntoIterator<Item = QName>,
        excluded: impl IntoIterator<Item = QName>,
    ) -> Self {
        Self {
            id: IndexId::new(0),
            kind: IndexDefKind::Name {
                included: normalize_names(included.into_iter().collect()),
                excluded: normalize_names(excluded.into_iter().collect()),
            },
        }
    }

    #[must_use]
    pub const fn id(&self) -> IndexId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> &IndexDefKind {
        &self.kind
    }

    #[must_use]
    pub const fn index_type(&self) -> IndexType {
        self.kind.index_type()
    }

    /// Declared value type of a content-and-structure index.
    #[must_use]
    pub const fn content_type(&self) -> Option<AtomicType> {
        match &self.kind {
            IndexDefKind::Cas { content_type, .. } => *content_type,
            _ => None,
        }
    }

    #[must_use]
    pub fn paths(&self) -> &[Path] {
        self.kind.paths()
    }

    /// Whether `other` describes the same index ignoring ids.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.kind == other.kind
    }

    /// Whether the path restriction admits lookups at `path`.
    #[must_use]
    pub fn covers_path(&self, path: &Path) -> bool {
        let paths = self.paths();
        paths.is_empty() || paths.iter().any(|p| p == path || p.matches(path))
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.put_u8(self.index_type().to_byte());
        w.put_u32(self.id.get());
        match &self.kind {
            IndexDefKind::Cas {
                content_type,
                paths,
            } => {
                w.put_u8(content_type.map_or(0, AtomicType::to_byte));
                put_paths(w, paths);
            }
            IndexDefKind::Path { paths } => put_paths(w, paths),
            IndexDefKind::Name { included, excluded } => {
                put_names(w, included);
                put_names(w, excluded);
            }
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let ty = r.get_u8()?;
        let index_type = IndexType::from_byte(ty)
            .ok_or_else(|| ArborError::corrupt(format!("unknown index type {ty}")))?;
        let id = IndexId::new(r.get_u32()?);
        let kind = match index_type {
            IndexType::Cas => {
                let raw = r.get_u8()?;
                let content_type = match raw {
                    0 => None,
                    b => Some(AtomicType::from_byte(b).ok_or_else(|| {
                        ArborError::corrupt(format!("unknown atomic type {b}"))
                    })?),
                };
                IndexDefKind::Cas {
                    content_type,
                    paths: get_paths(r)?,
                }
            }
            IndexType::Path => IndexDefKind::Path {
                paths: get_paths(r)?,
            },
            IndexType::Name => IndexDefKind::Name {
                included: get_names(r)?,
                excluded: get_names(r)?,
            },
        };
        Ok(Self { id, kind })
    }
}

impl fmt::Display for IndexDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index_type(), self.id.get())?;
        if let Some(ty) = self.content_type() {
            write!(f, " as {ty}")?;
        }
        for p in self.paths() {
            write!(f, " {p}")?;
        }
        Ok(())
    }
}

fn put_paths(w: &mut ByteWriter, paths: &[Path]) {
    w.put_varint(paths.len() as u64);
    for p in paths {
        p.encode(w);
    }
}

fn get_paths(r: &mut ByteReader<'_>) -> Result<Vec<Path>> {
    let n = r.get_varint()?;
    let mut out = Vec::new();
    for _ in 0..n {
        out.push(Path::decode(r)?);
    }
    Ok(out)
}

fn put_names(w: &mut ByteWriter, names: &[QName]) {
    w.put_varint(names.len() as u64);
    for n in names {
        n.encode(w);
    }
}

fn get_names(r: &mut ByteReader<'_>) -> Result<Vec<QName>> {
    let n = r.get_varint()?;
    let mut out = Vec::new();
    for _ in 0..n {
        out.push(QName::decode(r)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

const CATALOG_FORMAT: u8 = 1;

/// All index definitions of one resource revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDefs {
    defs: Vec<IndexDef>,
}

impl IndexDefs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexDef> {
        self.defs.iter()
    }

    #[must_use]
    pub fn count_with_type(&self, index_type: IndexType) -> usize {
        self.defs
            .iter()
            .filter(|d| d.index_type() == index_type)
            .count()
    }

    #[must_use]
    pub fn get(&self, index_type: IndexType, id: IndexId) -> Option<&IndexDef> {
        self.defs
            .iter()
            .find(|d| d.index_type() == index_type && d.id == id)
    }

    /// Add `def`, assigning the next id of its type. A structurally identical
    /// definition is returned as is; the flag reports whether one was added.
    pub fn add(&mut self, def: IndexDef) -> Result<(IndexDef, bool)> {
        if let Some(existing) = self.defs.iter().find(|d| d.same_structure(&def)) {
            return Ok((existing.clone(), false));
        }
        let next = u32::try_from(self.count_with_type(def.index_type()))
            .map_err(|_| ArborError::internal("index id space exhausted"))?;
        let assigned = IndexDef {
            id: IndexId::new(next),
            kind: def.kind,
        };
        self.defs.push(assigned.clone());
        Ok((assigned, true))
    }

    /// First index of `index_type` whose path restriction covers `path`, or
    /// the first index of that type when `path` is `None`.
    #[must_use]
    pub fn find_index(&self, index_type: IndexType, path: Option<&Path>) -> Option<&IndexDef> {
        self.defs
            .iter()
            .filter(|d| d.index_type() == index_type)
            .find(|d| path.is_none_or(|p| d.covers_path(p)))
    }

    /// First content-and-structure index covering `path`, preferring one
    /// declared with `content_type`.
    #[must_use]
    pub fn find_cas_index(
        &self,
        path: &Path,
        content_type: Option<AtomicType>,
    ) -> Option<&IndexDef> {
        let mut candidates = self
            .defs
            .iter()
            .filter(|d| d.index_type() == IndexType::Cas && d.covers_path(path));
        match content_type {
            Some(ty) => {
                let all: Vec<_> = candidates.collect();
                all.iter()
                    .find(|d| d.content_type() == Some(ty))
                    .or_else(|| all.first())
                    .copied()
            }
            None => candidates.next(),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u8(CATALOG_FORMAT);
        w.put_varint(self.defs.len() as u64);
        for d in &self.defs {
            d.encode(&mut w);
        }
        w.into_vec()
    }

    /// Decode a catalog. Empty input is the empty catalog.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let mut r = ByteReader::new(bytes);
        let format = r.get_u8()?;
        if format != CATALOG_FORMAT {
            return Err(ArborError::corrupt(format!(
                "unsupported index catalog format {format}"
            )));
        }
        let n = r.get_varint()?;
        let mut defs = Vec::new();
        for _ in 0..n {
            defs.push(IndexDef::decode(&mut r)?);
        }
        if !r.is_exhausted() {
            return Err(ArborError::corrupt("trailing bytes after index catalog"));
        }
        Ok(Self { defs })
    }
}

impl<'a> IntoIterator for &'a IndexDefs {
    type Item = &'a IndexDef;
    type IntoIter = std::slice::Iter<'a, IndexDef>;

    fn into_iter(self) -> Self::IntoIter {
        self.defs.iter()
    }
}
