//! Conversion between in-memory chains and their flat persisted rows

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::error::PersistenceError;
use crate::models::{ChainNode, ChainRow};

/// Key-value storage of chain rows, scoped by owner
pub trait ChainStore {
    /// Rows of one chain in saved order. Empty when the chain doesn't exist.
    fn read_rows(&self, owner_id: i64, chain_id: i64) -> Result<Vec<ChainRow>, PersistenceError>;

    /// Persist rows given parents-first. Rows with a provisional (negative) id
    /// are assigned a new one; the persisted id of every row is returned in order.
    fn write_rows(&mut self, owner_id: i64, rows: &[ChainRow]) -> Result<Vec<i64>, PersistenceError>;
}

/// Save a chain and stamp the assigned ids back onto its nodes.
///
/// Returns the chain id, which is the id of the root node.
pub fn save_chain(store: &mut impl ChainStore, chain: &mut ChainNode) -> Result<i64, PersistenceError> {
    let rows = flatten(chain);
    let ids = store.write_rows(chain.owner_id, &rows)?;
    if ids.len() != rows.len() {
        return Err(PersistenceError::WriteFailure(format!(
            "store returned {} ids for {} rows",
            ids.len(),
            rows.len()
        )));
    }

    let mut assigned = ids.into_iter();
    chain.for_each_mut(&mut |node| node.id = assigned.next());

    let chain_id = chain
        .id
        .ok_or_else(|| PersistenceError::WriteFailure("root was not assigned an id".to_string()))?;
    info!(chain_id, owner_id = chain.owner_id, nodes = rows.len(), "saved production chain");
    Ok(chain_id)
}

pub fn load_chain(
    store: &impl ChainStore,
    owner_id: i64,
    chain_id: i64,
) -> Result<ChainNode, PersistenceError> {
    let rows = store.read_rows(owner_id, chain_id)?;
    if rows.is_empty() {
        return Err(PersistenceError::NotFound { owner_id, chain_id });
    }
    debug!(chain_id, owner_id, rows = rows.len(), "loaded production chain rows");
    reconstruct(rows)
}

/// Flatten a chain into rows in pre-order.
///
/// Unsaved nodes get provisional ids -1, -2, ... so children can reference them.
pub fn flatten(chain: &ChainNode) -> Vec<ChainRow> {
    let mut rows = Vec::with_capacity(chain.node_count());
    let mut provisional = 0;
    flatten_into(chain, None, &mut provisional, &mut rows);
    rows
}

fn flatten_into(node: &ChainNode, parent_id: Option<i64>, provisional: &mut i64, rows: &mut Vec<ChainRow>) {
    let id = node.id.unwrap_or_else(|| {
        *provisional -= 1;
        *provisional
    });
    rows.push(ChainRow {
        id,
        owner_id: node.owner_id,
        parent_id,
        type_id: node.type_id,
        quantity: node.quantity,
        kind: node.kind,
        market_price: node.market_price,
        market_region_id: node.market_region_id,
        material_efficiency: node.material_efficiency,
        batch_size: node.batch_size,
    });
    for child in &node.materials {
        flatten_into(child, Some(id), provisional, rows);
    }
}

/// Rebuild a chain from its rows, grouping children by parent id.
///
/// Sibling order follows row order. Fails on rows whose parent is missing or
/// unreachable from the root, and on anything but exactly one root.
pub fn reconstruct(rows: Vec<ChainRow>) -> Result<ChainNode, PersistenceError> {
    let ids: HashSet<i64> = rows.iter().map(|row| row.id).collect();
    let mut roots = Vec::new();
    let mut children: HashMap<i64, Vec<ChainRow>> = HashMap::new();

    for row in rows {
        match row.parent_id {
            None => roots.push(row),
            Some(parent_id) if !ids.contains(&parent_id) => {
                return Err(PersistenceError::OrphanedNode { id: row.id, parent_id });
            }
            Some(parent_id) => children.entry(parent_id).or_default().push(row),
        }
    }

    if roots.len() != 1 {
        return Err(PersistenceError::MultipleRoots(roots.len()));
    }
    let root = roots.remove(0);
    let chain = attach(root, &mut children);

    // Anything left over sits on a parent cycle that never reaches the root.
    if let Some(stray) = children.values().flatten().min_by_key(|row| row.id) {
        return Err(PersistenceError::OrphanedNode {
            id: stray.id,
            parent_id: stray.parent_id.unwrap_or_default(),
        });
    }
    Ok(chain)
}

fn attach(row: ChainRow, children: &mut HashMap<i64, Vec<ChainRow>>) -> ChainNode {
    let materials = children
        .remove(&row.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| attach(child, children))
        .collect();

    ChainNode {
        id: Some(row.id),
        owner_id: row.owner_id,
        type_id: row.type_id,
        quantity: row.quantity,
        kind: row.kind,
        market_price: row.market_price,
        market_region_id: row.market_region_id,
        material_efficiency: row.material_efficiency,
        batch_size: row.batch_size,
        materials,
    }
}
