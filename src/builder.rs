//! Production chain construction from the item catalog

use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::models::{ChainNode, ItemType};

/// Read-only source of item names and bills of materials
pub trait ItemCatalog {
    /// Resolve a type, failing with [`CatalogError::NotFound`] for unknown IDs
    fn item_type(&self, type_id: i64) -> Result<ItemType, CatalogError>;
}

/// A type that reappeared on its own expansion path and was kept as a leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicBillOfMaterials {
    pub type_id: i64,
    /// Type IDs from the root down to the node that referenced `type_id` again
    pub path: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct BuiltChain {
    pub chain: ChainNode,
    pub warnings: Vec<CyclicBillOfMaterials>,
}

/// Build the full material tree for `root_type_id`.
///
/// Every node starts out as `Buy` with batch size 1 and no material
/// efficiency. A lookup failure anywhere aborts the whole build.
pub fn build_chain(
    catalog: &impl ItemCatalog,
    owner_id: i64,
    root_type_id: i64,
    quantity: u64,
) -> Result<BuiltChain, CatalogError> {
    let root = catalog.item_type(root_type_id)?;
    debug!(type_id = root_type_id, name = %root.name, "building production chain");

    let mut path = vec![root_type_id];
    let mut warnings = Vec::new();
    let mut chain = ChainNode::new(owner_id, root_type_id, quantity);
    chain.materials = build_materials(catalog, owner_id, &root, &mut path, &mut warnings)?;

    debug!(nodes = chain.node_count(), cycles = warnings.len(), "production chain built");
    Ok(BuiltChain { chain, warnings })
}

fn build_materials(
    catalog: &impl ItemCatalog,
    owner_id: i64,
    item: &ItemType,
    path: &mut Vec<i64>,
    warnings: &mut Vec<CyclicBillOfMaterials>,
) -> Result<Vec<ChainNode>, CatalogError> {
    let mut materials = Vec::with_capacity(item.materials.len());

    for material in &item.materials {
        let mut node = ChainNode::new(owner_id, material.type_id, material.quantity);

        if path.contains(&material.type_id) {
            warn!(
                type_id = material.type_id,
                path = ?path,
                "bill of materials references itself, treating as raw material"
            );
            warnings.push(CyclicBillOfMaterials {
                type_id: material.type_id,
                path: path.clone(),
            });
            materials.push(node);
            continue;
        }

        let child = catalog.item_type(material.type_id)?;
        if !child.materials.is_empty() {
            path.push(material.type_id);
            node.materials = build_materials(catalog, owner_id, &child, path, warnings)?;
            path.pop();
        }
        materials.push(node);
    }

    Ok(materials)
}
