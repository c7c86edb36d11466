//! Data models for production chains and the item catalog

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::ChainError;

/// Where a node's unit cost comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductKind {
    /// Cost is the node's market price
    #[default]
    Buy,
    /// Cost is the rollup of the node's materials
    Build,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Buy => "buy",
            ProductKind::Build => "build",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductKind {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(ProductKind::Buy),
            "build" => Ok(ProductKind::Build),
            other => Err(ChainError::UnknownKind(other.to_string())),
        }
    }
}

/// One item in a production chain.
///
/// Children are owned directly in `materials`; the parent link only exists in
/// the persisted [`ChainRow`] form.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
    /// Unset until the chain has been saved
    pub id: Option<i64>,
    pub owner_id: i64,
    pub type_id: i64,
    /// Units required per production run of the parent (units desired for the root)
    pub quantity: u64,
    pub kind: ProductKind,
    pub market_price: Decimal,
    pub market_region_id: i64,
    /// Fractional reduction of material requirements, 0 <= me < 1
    pub material_efficiency: Decimal,
    /// Output units yielded by one production run of this node
    pub batch_size: u32,
    pub materials: Vec<ChainNode>,
}

impl ChainNode {
    pub fn new(owner_id: i64, type_id: i64, quantity: u64) -> Self {
        ChainNode {
            id: None,
            owner_id,
            type_id,
            quantity,
            kind: ProductKind::Buy,
            market_price: Decimal::ZERO,
            market_region_id: 0,
            material_efficiency: Decimal::ZERO,
            batch_size: 1,
            materials: Vec::new(),
        }
    }

    pub fn set_kind(&mut self, kind: ProductKind) {
        self.kind = kind;
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ChainError> {
        check_batch_size(batch_size)?;
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_material_efficiency(&mut self, me: Decimal) -> Result<(), ChainError> {
        check_material_efficiency(me)?;
        self.material_efficiency = me;
        Ok(())
    }

    pub fn set_market_price(&mut self, price: Decimal) -> Result<(), ChainError> {
        check_market_price(price)?;
        self.market_price = price;
        Ok(())
    }

    /// Check the numeric invariants of this node and every descendant
    pub fn validate(&self) -> Result<(), ChainError> {
        check_batch_size(self.batch_size)?;
        check_material_efficiency(self.material_efficiency)?;
        check_market_price(self.market_price)?;
        self.materials.iter().try_for_each(ChainNode::validate)
    }

    /// Every node with its depth, in pre-order. Index 0 is `self`.
    pub fn walk(&self) -> Vec<(usize, &ChainNode)> {
        let mut out = Vec::new();
        collect_preorder(self, 0, &mut out);
        out
    }

    /// The node at the given pre-order line, where line 0 is `self`
    pub fn line_mut(&mut self, line: usize) -> Option<&mut ChainNode> {
        let mut remaining = line;
        find_line_mut(self, &mut remaining)
    }

    pub fn for_each_mut(&mut self, f: &mut impl FnMut(&mut ChainNode)) {
        f(self);
        for child in &mut self.materials {
            child.for_each_mut(f);
        }
    }

    /// Distinct type IDs across the whole subtree
    pub fn type_ids(&self) -> BTreeSet<i64> {
        self.walk().into_iter().map(|(_, node)| node.type_id).collect()
    }

    pub fn node_count(&self) -> usize {
        1 + self.materials.iter().map(ChainNode::node_count).sum::<usize>()
    }
}

fn collect_preorder<'a>(node: &'a ChainNode, depth: usize, out: &mut Vec<(usize, &'a ChainNode)>) {
    out.push((depth, node));
    for child in &node.materials {
        collect_preorder(child, depth + 1, out);
    }
}

fn find_line_mut<'a>(node: &'a mut ChainNode, remaining: &mut usize) -> Option<&'a mut ChainNode> {
    if *remaining == 0 {
        return Some(node);
    }
    *remaining -= 1;
    for child in &mut node.materials {
        if let Some(found) = find_line_mut(child, remaining) {
            return Some(found);
        }
    }
    None
}

fn check_batch_size(batch_size: u32) -> Result<(), ChainError> {
    if batch_size == 0 {
        return Err(ChainError::InvalidBatchSize);
    }
    Ok(())
}

fn check_material_efficiency(me: Decimal) -> Result<(), ChainError> {
    if me < Decimal::ZERO || me >= Decimal::ONE {
        return Err(ChainError::InvalidMaterialEfficiency(me));
    }
    Ok(())
}

fn check_market_price(price: Decimal) -> Result<(), ChainError> {
    if price < Decimal::ZERO {
        return Err(ChainError::NegativePrice(price));
    }
    Ok(())
}

/// Flat persisted form of a chain node.
///
/// Nodes that were never saved carry a provisional negative `id`; the store
/// replaces it with a real one on write.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRow {
    pub id: i64,
    pub owner_id: i64,
    pub parent_id: Option<i64>,
    pub type_id: i64,
    pub quantity: u64,
    pub kind: ProductKind,
    pub market_price: Decimal,
    pub market_region_id: i64,
    pub material_efficiency: Decimal,
    pub batch_size: u32,
}

impl ChainRow {
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}

/// Catalog entry: an item and its bill of materials
#[derive(Debug, Clone, PartialEq)]
pub struct ItemType {
    pub type_id: i64,
    pub name: String,
    /// Empty when the item is not manufacturable
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Material {
    pub type_id: i64,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketPrice {
    pub type_id: i64,
    pub average: Decimal,
    pub base: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub region_id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> ChainNode {
        let mut root = ChainNode::new(0, 1, 1);
        let mut component = ChainNode::new(0, 2, 4);
        component.materials.push(ChainNode::new(0, 34, 100));
        component.materials.push(ChainNode::new(0, 35, 20));
        root.materials.push(component);
        root.materials.push(ChainNode::new(0, 34, 50));
        root
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("Build".parse::<ProductKind>(), Ok(ProductKind::Build));
        assert_eq!(" buy ".parse::<ProductKind>(), Ok(ProductKind::Buy));
        assert_eq!(
            "manufacture".parse::<ProductKind>(),
            Err(ChainError::UnknownKind("manufacture".to_string()))
        );
    }

    #[test]
    fn walk_is_preorder_with_depths() {
        let root = sample_tree();
        let order: Vec<(usize, i64)> = root.walk().into_iter().map(|(d, n)| (d, n.type_id)).collect();
        assert_eq!(order, vec![(0, 1), (1, 2), (2, 34), (2, 35), (1, 34)]);
        assert_eq!(root.node_count(), 5);
    }

    #[test]
    fn line_mut_addresses_preorder_lines() {
        let mut root = sample_tree();
        assert_eq!(root.line_mut(0).map(|n| n.type_id), Some(1));
        assert_eq!(root.line_mut(3).map(|n| n.type_id), Some(35));
        assert_eq!(root.line_mut(4).map(|n| n.quantity), Some(50));
        assert!(root.line_mut(5).is_none());
    }

    #[test]
    fn type_ids_are_distinct() {
        let ids: Vec<i64> = sample_tree().type_ids().into_iter().collect();
        assert_eq!(ids, vec![1, 2, 34, 35]);
    }

    #[test]
    fn setters_reject_out_of_range_values() {
        let mut node = ChainNode::new(0, 34, 1);
        assert_eq!(node.set_batch_size(0), Err(ChainError::InvalidBatchSize));
        assert!(node.set_material_efficiency(Decimal::ONE).is_err());
        assert!(node.set_material_efficiency(Decimal::new(-1, 2)).is_err());
        assert!(node.set_market_price(Decimal::new(-1, 0)).is_err());

        node.set_batch_size(10).unwrap();
        node.set_material_efficiency(Decimal::new(1, 1)).unwrap();
        node.set_market_price(Decimal::new(500, 2)).unwrap();
        assert_eq!(node.batch_size, 10);
        assert_eq!(node.material_efficiency, Decimal::new(1, 1));
        assert_eq!(node.market_price, Decimal::new(5, 0));
    }

    #[test]
    fn validate_checks_descendants() {
        let mut root = sample_tree();
        assert!(root.validate().is_ok());
        root.materials[0].materials[1].batch_size = 0;
        assert_eq!(root.validate(), Err(ChainError::InvalidBatchSize));
    }
}
