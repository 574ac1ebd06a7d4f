//! Versioned documents shared by integration tests.
//!
//! Fixtures commit through the public transaction API and hand back the node
//! keys they created, so tests can navigate without searching.

use arbor_core::{
    Database, DatabaseConfig, InsertPosition, NewNode, NodeCursor, ResourceConfig, ResourceManager,
};
use arbor_error::{ArborError, Result};
use arbor_types::{NodeKey, NodeRecord, Revision};
use arbor_vfs::{MemoryVfs, Vfs};

/// Prices of the books in [`bookstore`], in document order.
pub const PRICES: [i64; 3] = [12, 30, 7];

/// Database at `/db` on a fresh [`MemoryVfs`] with one resource `name`.
pub fn memory_resource(
    name: &str,
    config: ResourceConfig,
) -> Result<(Database<MemoryVfs>, ResourceManager)> {
    resource_on(MemoryVfs::new(), name, config)
}

/// Database at `/db` on `vfs` with one new resource `name`.
pub fn resource_on<V: Vfs>(
    vfs: V,
    name: &str,
    config: ResourceConfig,
) -> Result<(Database<V>, ResourceManager)> {
    let db = Database::open(vfs, DatabaseConfig::new("/db"))?;
    let rm = db.create_resource(name, config)?;
    Ok((db, rm))
}

/// Keys of the [`bookstore`] document.
#[derive(Debug, Clone)]
pub struct Bookstore {
    pub revision: Revision,
    pub store: NodeKey,
    pub books: Vec<NodeKey>,
    /// Text node under each book's `price` element.
    pub prices: Vec<NodeKey>,
}

/// Commit one revision holding
/// `<store><book id="bN"><title>Book N</title><price>P</price></book>...</store>`
/// with one book per entry of [`PRICES`].
pub fn bookstore(rm: &ResourceManager) -> Result<Bookstore> {
    let mut w = rm.begin_node_trx()?;
    let store = w.insert(InsertPosition::FirstChild, NewNode::element("store"))?;
    let mut books = Vec::with_capacity(PRICES.len());
    let mut prices = Vec::with_capacity(PRICES.len());
    for (i, price) in PRICES.iter().enumerate() {
        w.move_to(store)?;
        let book = w.insert(InsertPosition::LastChild, NewNode::element("book"))?;
        w.insert_attribute("id", format!("b{i}"))?;
        w.move_to(book)?;
        w.insert(InsertPosition::FirstChild, NewNode::element("title"))?;
        w.insert(InsertPosition::FirstChild, NewNode::text(format!("Book {i}")))?;
        w.move_to(book)?;
        w.insert(InsertPosition::LastChild, NewNode::element("price"))?;
        prices.push(w.insert(InsertPosition::FirstChild, NewNode::text(price.to_string()))?);
        books.push(book);
    }
    let revision = w.commit_with_message("bookstore")?;
    Ok(Bookstore {
        revision,
        store,
        books,
        prices,
    })
}

/// Keys of a [`linear_history`].
#[derive(Debug, Clone)]
pub struct History {
    pub log: NodeKey,
    /// `entries[i]` was inserted by `revisions[i]`, committed at
    /// `timestamps[i]`.
    pub entries: Vec<NodeKey>,
    pub revisions: Vec<Revision>,
    pub timestamps: Vec<u64>,
}

/// Commit `revisions` revisions, each appending one `entry` element with a
/// text child `"i"` under a shared `log` element. Commit clocks are pinned
/// one second apart, starting one second after the current latest revision.
pub fn linear_history(rm: &ResourceManager, revisions: usize) -> Result<History> {
    let mut clock = rm.revision_info(rm.most_recent_revision())?.timestamp_ms;
    let mut log = None;
    let mut entries = Vec::with_capacity(revisions);
    let mut committed = Vec::with_capacity(revisions);
    let mut timestamps = Vec::with_capacity(revisions);
    for i in 0..revisions {
        clock += 1000;
        let mut w = rm.begin_node_trx()?;
        w.cx().set_unix_millis_for_testing(clock);
        let parent = match log {
            Some(key) => key,
            None => {
                let key = w.insert(InsertPosition::FirstChild, NewNode::element("log"))?;
                log = Some(key);
                key
            }
        };
        w.move_to(parent)?;
        let entry = w.insert(InsertPosition::LastChild, NewNode::element("entry"))?;
        w.insert(InsertPosition::FirstChild, NewNode::text(i.to_string()))?;
        entries.push(entry);
        committed.push(w.commit()?);
        timestamps.push(clock);
    }
    Ok(History {
        log: log.unwrap_or(NodeKey::DOCUMENT_ROOT),
        entries,
        revisions: committed,
        timestamps,
    })
}

/// Every node reachable from the document root in document order, each
/// element followed by its attributes. Leaves the cursor on the last
/// visited node.
pub fn snapshot<C: NodeCursor>(cursor: &mut C) -> Result<Vec<NodeRecord>> {
    let mut out = Vec::new();
    let mut stack = vec![NodeKey::DOCUMENT_ROOT];
    while let Some(key) = stack.pop() {
        if !cursor.move_to(key)? {
            return Err(ArborError::NodeNotFound { key: key.get() });
        }
        let node = cursor.node().clone();
        stack.extend(cursor.children()?.into_iter().rev());
        let attributes = node.attributes.clone();
        out.push(node);
        for key in attributes {
            let attribute = cursor
                .get_node(key)?
                .ok_or(ArborError::NodeNotFound { key: key.get() })?;
            out.push(attribute);
        }
    }
    Ok(out)
}
