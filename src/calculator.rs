//! Production chain cost rollup and reporting

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::builder::ItemCatalog;
use crate::models::{ChainNode, ProductKind};

/// Unit cost of `node`.
///
/// `Buy` nodes cost their market price. `Build` nodes cost the materials of
/// one production run divided by the units that run yields. Nothing is
/// cached, so edits to the tree are reflected on the next call.
pub fn cost(node: &ChainNode) -> Decimal {
    match node.kind {
        ProductKind::Buy => node.market_price,
        ProductKind::Build => {
            if node.materials.is_empty() {
                return Decimal::ZERO;
            }
            let run_cost: Decimal = node
                .materials
                .iter()
                .map(|material| cost(material) * required_quantity(material, node))
                .sum();
            run_cost / batch_size(node)
        }
    }
}

/// Units of `material` consumed by one production run of `parent`.
///
/// The raw requirement is scaled by the parent's batch size and divided by
/// `1 + ME`, then rounded to whole units with ties away from zero.
pub fn required_quantity(material: &ChainNode, parent: &ChainNode) -> Decimal {
    let raw = Decimal::from(material.quantity) * batch_size(parent)
        / (Decimal::ONE + parent.material_efficiency);
    raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn batch_size(node: &ChainNode) -> Decimal {
    Decimal::from(node.batch_size.max(1))
}

/// Revenue and profit figures for one batch of the root item
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSummary {
    pub unit_cost: Decimal,
    /// Units ordered times the root's batch size
    pub batch_quantity: Decimal,
    pub revenue: Decimal,
    pub cost: Decimal,
    pub profit: Decimal,
    /// Zero when there is no revenue
    pub margin_percent: Decimal,
    pub material_efficiency: Decimal,
}

/// Derive revenue, cost, profit and margin for the root of a chain.
///
/// Revenue uses the root's market price as the desired sale price.
pub fn summarize_chain(root: &ChainNode) -> ChainSummary {
    let unit_cost = cost(root);
    let batch_quantity = Decimal::from(root.quantity) * batch_size(root);
    let revenue = root.market_price * batch_quantity;
    let total_cost = unit_cost * batch_quantity;
    let profit = revenue - total_cost;
    let margin_percent = if revenue.is_zero() {
        Decimal::ZERO
    } else {
        profit / revenue * Decimal::ONE_HUNDRED
    };

    ChainSummary {
        unit_cost,
        batch_quantity,
        revenue,
        cost: total_cost,
        profit,
        margin_percent,
        material_efficiency: root.material_efficiency,
    }
}

/// Name of a type for display, or a placeholder if the catalog can't resolve it
pub fn item_name(catalog: &impl ItemCatalog, type_id: i64) -> String {
    match catalog.item_type(type_id) {
        Ok(item) => item.name,
        Err(e) => {
            debug!(type_id, error = %e, "unable to get item name");
            "[Error]".to_string()
        }
    }
}

/// Format a production chain as a numbered report.
///
/// Line numbers follow pre-order with the root as line 0, matching
/// [`ChainNode::line_mut`].
pub fn format_production_chain(
    root: &ChainNode,
    catalog: &impl ItemCatalog,
    region_name: &str,
) -> String {
    let summary = summarize_chain(root);
    let mut output = String::new();

    output.push_str(&format!("{}\n", item_name(catalog, root.type_id)));
    output.push_str(&format!("{}\n\n", region_name));
    output.push_str(&format!(
        " #   {:<30}{:>2}{:>15}{:>12}{:>19}\n",
        "Material Name", "", "Cost/ea", "Qty Req", "Cost/run"
    ));

    let mut line = 0;
    format_materials(&mut output, root, 0, &mut line, catalog);

    output.push('\n');
    output.push_str(&summary.to_string());
    output.push_str("\n* 'M' indicates the component will be produced in-house.\n");
    output
}

fn format_materials(
    output: &mut String,
    parent: &ChainNode,
    depth: usize,
    line: &mut usize,
    catalog: &impl ItemCatalog,
) {
    for material in &parent.materials {
        *line += 1;
        let unit_cost = cost(material);
        let qty = required_quantity(material, parent);
        let marker = if material.kind == ProductKind::Build { "M" } else { "" };
        let name = format!("{}{}", "  ".repeat(depth), item_name(catalog, material.type_id));

        output.push_str(&format!(
            "{:>3}  {:<30}{:>2}{:>15}{:>12}{:>19}\n",
            line,
            truncate(&name, 30),
            marker,
            unit_cost.round_dp(2),
            qty,
            (unit_cost * qty).round_dp(2)
        ));

        format_materials(output, material, depth + 1, line, catalog);
    }
}

fn truncate(s: &str, width: usize) -> String {
    s.chars().take(width).collect()
}

impl std::fmt::Display for ChainSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let me_percent = (self.material_efficiency * Decimal::ONE_HUNDRED).round_dp(0);
        writeln!(f, "=== Per {} units ({}% ME) ===", self.batch_quantity, me_percent)?;
        writeln!(f, "  Revenue: {:>19}", self.revenue.round_dp(2))?;
        writeln!(f, "  Cost:    {:>19}", self.cost.round_dp(2))?;
        writeln!(f, "  Profit:  {:>19}", self.profit.round_dp(2))?;
        writeln!(f, "  Margin:  {:>18}%", self.margin_percent.round_dp(2))?;
        Ok(())
    }
}
