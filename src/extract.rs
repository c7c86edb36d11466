//! Static data export import
//!
//! Walks a directory of CSV dumps (item types, industry activities, regions
//! and market prices) and loads them into the catalog tables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db;
use crate::models::{MarketPrice, Region};

/// Industry activity ID for manufacturing
const MANUFACTURING: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DumpKind {
    Types,
    ActivityMaterials,
    ActivityProducts,
    Regions,
    MarketPrices,
}

impl DumpKind {
    fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "invTypes.csv" => Some(DumpKind::Types),
            "industryActivityMaterials.csv" => Some(DumpKind::ActivityMaterials),
            "industryActivityProducts.csv" => Some(DumpKind::ActivityProducts),
            "mapRegions.csv" => Some(DumpKind::Regions),
            "marketPrices.csv" => Some(DumpKind::MarketPrices),
            _ => None,
        }
    }
}

/// Find all recognised dump files below `dump_dir`
pub fn find_dump_files(dump_dir: &Path) -> Result<Vec<(DumpKind, PathBuf)>> {
    let mut dumps = Vec::new();

    for entry in WalkDir::new(dump_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if let Some(kind) = DumpKind::from_file_name(filename) {
            dumps.push((kind, path.to_path_buf()));
        }
    }

    dumps.sort();
    Ok(dumps)
}

/// A parsed CSV file: header column positions plus data rows with line numbers
struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<(usize, Vec<String>)>,
}

impl Table {
    fn column(&self, name: &str) -> Result<usize> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("missing column {}", name))
    }
}

fn csv_field_regex() -> Result<Regex> {
    // A quoted field (with "" escapes) or a run of non-commas
    Ok(Regex::new(r#"(?:^|,)(?:"((?:[^"]|"")*)"|([^,]*))"#)?)
}

fn split_csv_line(re: &Regex, line: &str) -> Vec<String> {
    re.captures_iter(line)
        .map(|cap| match (cap.get(1), cap.get(2)) {
            (Some(quoted), _) => quoted.as_str().replace("\"\"", "\""),
            (None, Some(bare)) => bare.as_str().trim().to_string(),
            (None, None) => String::new(),
        })
        .collect()
}

fn read_table(re: &Regex, filepath: &Path) -> Result<Table> {
    let content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read {}", filepath.display()))?;
    let mut lines = content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| anyhow!("{} is empty", filepath.display()))?;
    let columns = split_csv_line(re, header.trim_start_matches('\u{feff}'))
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    let rows = lines
        .map(|(number, line)| (number + 1, split_csv_line(re, line)))
        .collect();
    Ok(Table { columns, rows })
}

fn field<T: FromStr>(row: &[String], idx: usize) -> Option<T> {
    row.get(idx).and_then(|value| value.parse().ok())
}

/// Import every dump file found under `dump_dir`
pub fn import_to_database(conn: &Connection, dump_dir: &Path) -> Result<ImportStats> {
    let mut stats = ImportStats::default();
    let re = csv_field_regex()?;

    info!(dir = %dump_dir.display(), "scanning for data dumps");
    let dumps = find_dump_files(dump_dir)?;
    info!(files = dumps.len(), "found data dumps");

    let tx = conn.unchecked_transaction()?;
    let mut blueprint_materials: HashMap<i64, Vec<(i64, u64)>> = HashMap::new();
    let mut blueprint_products: Vec<(i64, i64)> = Vec::new();

    for (kind, filepath) in &dumps {
        let table = match read_table(&re, filepath) {
            Ok(table) => table,
            Err(e) => {
                warn!(file = %filepath.display(), error = %e, "unable to read dump");
                stats.errors += 1;
                continue;
            }
        };

        let result = match kind {
            DumpKind::Types => import_types(&tx, &table, &mut stats),
            DumpKind::Regions => import_regions(&tx, &table, &mut stats),
            DumpKind::MarketPrices => import_prices(&tx, &table, &mut stats),
            DumpKind::ActivityMaterials => {
                collect_materials(&table, &mut blueprint_materials, &mut stats)
            }
            DumpKind::ActivityProducts => {
                collect_products(&table, &mut blueprint_products, &mut stats)
            }
        };

        match result {
            Ok(()) => info!(file = %filepath.display(), rows = table.rows.len(), "imported dump"),
            Err(e) => {
                warn!(file = %filepath.display(), error = %e, "unable to import dump");
                stats.errors += 1;
            }
        }
    }

    for (blueprint_id, product_id) in blueprint_products {
        let Some(materials) = blueprint_materials.get(&blueprint_id) else {
            continue;
        };
        for (position, &(material_type_id, quantity)) in materials.iter().enumerate() {
            db::upsert_material(&tx, product_id, material_type_id, quantity, position)?;
            stats.materials += 1;
        }
        stats.products += 1;
    }

    tx.commit()?;
    Ok(stats)
}

fn import_types(conn: &Connection, table: &Table, stats: &mut ImportStats) -> Result<()> {
    let type_col = table.column("typeID")?;
    let name_col = table.column("typeName")?;
    let group_col = table.columns.get("groupID").copied();

    for (line, row) in &table.rows {
        let (Some(type_id), Some(name)) = (field::<i64>(row, type_col), row.get(name_col)) else {
            debug!(line, "skipping malformed type row");
            stats.skipped += 1;
            continue;
        };
        let group_id = group_col.and_then(|col| field::<i64>(row, col));
        db::upsert_item_type(conn, type_id, name, group_id)?;
        stats.types += 1;
    }
    Ok(())
}

fn import_regions(conn: &Connection, table: &Table, stats: &mut ImportStats) -> Result<()> {
    let id_col = table.column("regionID")?;
    let name_col = table.column("regionName")?;

    for (line, row) in &table.rows {
        let (Some(region_id), Some(name)) = (field::<i64>(row, id_col), row.get(name_col)) else {
            debug!(line, "skipping malformed region row");
            stats.skipped += 1;
            continue;
        };
        db::upsert_region(conn, &Region { region_id, name: name.clone() })?;
        stats.regions += 1;
    }
    Ok(())
}

fn import_prices(conn: &Connection, table: &Table, stats: &mut ImportStats) -> Result<()> {
    let region_col = table.column("regionID")?;
    let type_col = table.column("typeID")?;
    let average_col = table.column("average")?;
    let base_col = table.columns.get("base").copied();

    for (line, row) in &table.rows {
        let parsed = (
            field::<i64>(row, region_col),
            field::<i64>(row, type_col),
            field::<Decimal>(row, average_col),
        );
        let (Some(region_id), Some(type_id), Some(average)) = parsed else {
            debug!(line, "skipping malformed price row");
            stats.skipped += 1;
            continue;
        };
        if average < Decimal::ZERO {
            debug!(line, "skipping negative price");
            stats.skipped += 1;
            continue;
        }
        let base = base_col.and_then(|col| field::<Decimal>(row, col)).unwrap_or(average);
        db::upsert_market_price(conn, region_id, &MarketPrice { type_id, average, base })?;
        stats.prices += 1;
    }
    Ok(())
}

fn collect_materials(
    table: &Table,
    materials: &mut HashMap<i64, Vec<(i64, u64)>>,
    stats: &mut ImportStats,
) -> Result<()> {
    let blueprint_col = table.column("typeID")?;
    let activity_col = table.column("activityID")?;
    let material_col = table.column("materialTypeID")?;
    let quantity_col = table.column("quantity")?;

    for (line, row) in &table.rows {
        let parsed = (
            field::<i64>(row, blueprint_col),
            field::<i64>(row, activity_col),
            field::<i64>(row, material_col),
            field::<u64>(row, quantity_col),
        );
        let (Some(blueprint_id), Some(activity_id), Some(material_type_id), Some(quantity)) = parsed else {
            debug!(line, "skipping malformed material row");
            stats.skipped += 1;
            continue;
        };
        if activity_id == MANUFACTURING {
            materials
                .entry(blueprint_id)
                .or_default()
                .push((material_type_id, quantity));
        }
    }
    Ok(())
}

fn collect_products(table: &Table, products: &mut Vec<(i64, i64)>, stats: &mut ImportStats) -> Result<()> {
    let blueprint_col = table.column("typeID")?;
    let activity_col = table.column("activityID")?;
    let product_col = table.column("productTypeID")?;

    for (line, row) in &table.rows {
        let parsed = (
            field::<i64>(row, blueprint_col),
            field::<i64>(row, activity_col),
            field::<i64>(row, product_col),
        );
        let (Some(blueprint_id), Some(activity_id), Some(product_id)) = parsed else {
            debug!(line, "skipping malformed product row");
            stats.skipped += 1;
            continue;
        };
        if activity_id == MANUFACTURING {
            products.push((blueprint_id, product_id));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub types: usize,
    pub products: usize,
    pub materials: usize,
    pub regions: usize,
    pub prices: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported {} types, {} manufacturable products ({} materials), {} regions, {} prices. Skipped: {}, Errors: {}",
            self.types, self.products, self.materials, self.regions, self.prices, self.skipped, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ItemCatalog;
    use crate::pricing::PriceService;
    use std::collections::BTreeSet;

    #[test]
    fn csv_fields_honour_quotes() {
        let re = csv_field_regex().unwrap();
        assert_eq!(
            split_csv_line(&re, r#"34,18,"Tritanium, ""Compressed""",,0.01"#),
            vec!["34", "18", "Tritanium, \"Compressed\"", "", "0.01"]
        );
        assert_eq!(split_csv_line(&re, "10000043,35,12.5,"), vec!["10000043", "35", "12.5", ""]);
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn imports_nested_dumps() {
        let tmp = tempfile::tempdir().unwrap();
        let sde = tmp.path().join("sde").join("csv");
        write(
            &sde,
            "invTypes.csv",
            "typeID,groupID,typeName,volume\n\
             34,18,Tritanium,0.01\n\
             35,18,Pyerite,0.01\n\
             587,25,\"Rifter, Mk I\",27289\n\
             686,105,Rifter Blueprint,0.01\n\
             not-a-number,1,Broken,0\n",
        );
        write(
            &sde,
            "industryActivityMaterials.csv",
            "typeID,activityID,materialTypeID,quantity\n\
             686,1,35,700\n\
             686,1,34,28000\n\
             686,8,34,5\n",
        );
        write(
            &sde,
            "industryActivityProducts.csv",
            "typeID,activityID,productTypeID,quantity\n686,1,587,1\n",
        );
        write(&tmp.path().join("universe"), "mapRegions.csv", "regionID,regionName,x\n10000043,Domain,0\n");
        write(
            tmp.path(),
            "marketPrices.csv",
            "regionID,typeID,average,base\n10000043,34,4.95,5.01\n10000043,35,12.5,\n",
        );
        write(tmp.path(), "notes.txt", "ignored");

        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let stats = import_to_database(&conn, tmp.path()).unwrap();

        assert_eq!(stats.types, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.products, 1);
        assert_eq!(stats.materials, 2);
        assert_eq!(stats.regions, 1);
        assert_eq!(stats.prices, 2);
        assert_eq!(stats.errors, 0);

        let rifter = conn.item_type(587).unwrap();
        assert_eq!(rifter.name, "Rifter, Mk I");
        let bom: Vec<(i64, u64)> = rifter.materials.iter().map(|m| (m.type_id, m.quantity)).collect();
        assert_eq!(bom, vec![(35, 700), (34, 28000)]);

        let prices = conn.prices(10000043, &BTreeSet::from([34, 35])).unwrap();
        assert_eq!(prices[&34].average, Decimal::new(495, 2));
        assert_eq!(prices[&34].base, Decimal::new(501, 2));
        assert_eq!(prices[&35].base, Decimal::new(125, 1));
        assert_eq!(db::region_name(&conn, 10000043).unwrap().as_deref(), Some("Domain"));
    }

    #[test]
    fn missing_columns_count_as_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "mapRegions.csv", "id,name\n1,Somewhere\n");
        write(tmp.path(), "invTypes.csv", "");

        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let stats = import_to_database(&conn, tmp.path()).unwrap();
        assert_eq!(stats.errors, 2);
        assert_eq!(stats.regions, 0);
    }
}
