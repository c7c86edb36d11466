//! Database schema and operations

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use rust_decimal::Decimal;

use crate::builder::ItemCatalog;
use crate::error::{CatalogError, PersistenceError, PriceServiceError};
use crate::models::{ChainRow, ItemType, MarketPrice, Material, ProductKind, Region};
use crate::pricing::PriceService;
use crate::repository::ChainStore;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Static item data
        CREATE TABLE IF NOT EXISTS item_types (
            type_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            group_id INTEGER
        );

        -- Manufacturing materials per product, in catalog order
        CREATE TABLE IF NOT EXISTS bill_of_materials (
            type_id INTEGER NOT NULL,
            material_type_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (type_id, material_type_id)
        );

        CREATE TABLE IF NOT EXISTS regions (
            region_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        -- Prices are decimal strings so they round-trip exactly
        CREATE TABLE IF NOT EXISTS market_prices (
            region_id INTEGER NOT NULL,
            type_id INTEGER NOT NULL,
            average TEXT NOT NULL,
            base TEXT NOT NULL,
            PRIMARY KEY (region_id, type_id)
        );

        -- Production chain nodes; chain_id is the product_id of the root
        CREATE TABLE IF NOT EXISTS products (
            product_id INTEGER PRIMARY KEY AUTOINCREMENT,
            chain_id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL,
            parent_id INTEGER,
            position INTEGER NOT NULL,
            type_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL,
            kind TEXT NOT NULL,
            market_price TEXT NOT NULL,
            market_region_id INTEGER NOT NULL,
            material_efficiency TEXT NOT NULL,
            batch_size INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_bill_of_materials_type ON bill_of_materials(type_id);
        CREATE INDEX IF NOT EXISTS idx_products_chain ON products(owner_id, chain_id);
        CREATE INDEX IF NOT EXISTS idx_products_root_type ON products(owner_id, type_id) WHERE parent_id IS NULL;
        "#,
    )?;
    Ok(())
}

/// Insert or replace an item type
pub fn upsert_item_type(conn: &Connection, type_id: i64, name: &str, group_id: Option<i64>) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO item_types (type_id, name, group_id) VALUES (?1, ?2, ?3)",
        params![type_id, name, group_id],
    )?;
    Ok(())
}

/// Insert or replace one line of a product's bill of materials
pub fn upsert_material(
    conn: &Connection,
    type_id: i64,
    material_type_id: i64,
    quantity: u64,
    position: usize,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO bill_of_materials (type_id, material_type_id, quantity, position)
         VALUES (?1, ?2, ?3, ?4)",
        params![type_id, material_type_id, i64::try_from(quantity)?, i64::try_from(position)?],
    )?;
    Ok(())
}

pub fn upsert_region(conn: &Connection, region: &Region) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO regions (region_id, name) VALUES (?1, ?2)",
        params![region.region_id, region.name],
    )?;
    Ok(())
}

pub fn upsert_market_price(conn: &Connection, region_id: i64, price: &MarketPrice) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO market_prices (region_id, type_id, average, base) VALUES (?1, ?2, ?3, ?4)",
        params![region_id, price.type_id, price.average.to_string(), price.base.to_string()],
    )?;
    Ok(())
}

/// Clear all imported catalog and price data (saved chains are kept)
pub fn clear_catalog_data(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM market_prices;
        DELETE FROM regions;
        DELETE FROM bill_of_materials;
        DELETE FROM item_types;
        "#,
    )?;
    Ok(())
}

pub fn region_name(conn: &Connection, region_id: i64) -> Result<Option<String>> {
    let name = conn
        .query_row("SELECT name FROM regions WHERE region_id = ?1", [region_id], |row| row.get(0))
        .optional()?;
    Ok(name)
}

/// Root rows of every chain belonging to an owner
pub fn list_chains(conn: &Connection, owner_id: i64) -> Result<Vec<ChainRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHAIN_COLUMNS} FROM products
         WHERE owner_id = ?1 AND parent_id IS NULL
         ORDER BY product_id"
    ))?;

    let rows = stmt.query_map([owner_id], chain_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// The owner's existing chain for a root type, if any
pub fn find_chain_for_type(conn: &Connection, owner_id: i64, type_id: i64) -> Result<Option<i64>> {
    let chain_id = conn
        .query_row(
            "SELECT chain_id FROM products
             WHERE owner_id = ?1 AND type_id = ?2 AND parent_id IS NULL
             ORDER BY product_id LIMIT 1",
            [owner_id, type_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(chain_id)
}

const CHAIN_COLUMNS: &str = "product_id, owner_id, parent_id, type_id, quantity, kind, \
     market_price, market_region_id, material_efficiency, batch_size";

fn chain_row(row: &Row) -> rusqlite::Result<ChainRow> {
    let kind: String = row.get(5)?;
    Ok(ChainRow {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        parent_id: row.get(2)?,
        type_id: row.get(3)?,
        quantity: unsigned_column(row, 4)?,
        kind: ProductKind::from_str(&kind)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        market_price: decimal_column(row, 6)?,
        market_region_id: row.get(7)?,
        material_efficiency: decimal_column(row, 8)?,
        batch_size: row.get(9)?,
    })
}

fn decimal_column(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn unsigned_column(row: &Row, idx: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(idx)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

impl ItemCatalog for Connection {
    fn item_type(&self, type_id: i64) -> Result<ItemType, CatalogError> {
        let name: String = self
            .query_row("SELECT name FROM item_types WHERE type_id = ?1", [type_id], |row| row.get(0))
            .optional()?
            .ok_or(CatalogError::NotFound(type_id))?;

        let mut stmt = self.prepare(
            "SELECT material_type_id, quantity FROM bill_of_materials
             WHERE type_id = ?1
             ORDER BY position",
        )?;
        let rows = stmt.query_map([type_id], |row| {
            Ok(Material {
                type_id: row.get(0)?,
                quantity: unsigned_column(row, 1)?,
            })
        })?;

        let mut materials = Vec::new();
        for row in rows {
            materials.push(row?);
        }
        Ok(ItemType { type_id, name, materials })
    }
}

impl PriceService for Connection {
    fn prices(
        &self,
        region_id: i64,
        type_ids: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, MarketPrice>, PriceServiceError> {
        let failure = |e: rusqlite::Error| PriceServiceError {
            region_id,
            reason: e.to_string(),
        };
        if type_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; type_ids.len()].join(", ");
        let mut stmt = self
            .prepare(&format!(
                "SELECT type_id, average, base FROM market_prices
                 WHERE region_id = ? AND type_id IN ({placeholders})"
            ))
            .map_err(failure)?;

        let params = std::iter::once(region_id).chain(type_ids.iter().copied());
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(MarketPrice {
                    type_id: row.get(0)?,
                    average: decimal_column(row, 1)?,
                    base: decimal_column(row, 2)?,
                })
            })
            .map_err(failure)?;

        let mut prices = HashMap::new();
        for row in rows {
            let price = row.map_err(failure)?;
            prices.insert(price.type_id, price);
        }
        Ok(prices)
    }
}

impl ChainStore for Connection {
    fn read_rows(&self, owner_id: i64, chain_id: i64) -> Result<Vec<ChainRow>, PersistenceError> {
        let mut stmt = self.prepare(&format!(
            "SELECT {CHAIN_COLUMNS} FROM products
             WHERE owner_id = ?1 AND chain_id = ?2
             ORDER BY position"
        ))?;
        let rows = stmt.query_map([owner_id, chain_id], chain_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn write_rows(&mut self, owner_id: i64, rows: &[ChainRow]) -> Result<Vec<i64>, PersistenceError> {
        let Some(root) = rows.first() else {
            return Err(PersistenceError::WriteFailure("no rows to write".to_string()));
        };

        let tx = self.transaction()?;
        if root.is_persisted() {
            // Rewrite the whole chain in place
            tx.execute(
                "DELETE FROM products WHERE owner_id = ?1 AND chain_id = ?2",
                [owner_id, root.id],
            )?;
        }

        let mut assigned: HashMap<i64, i64> = HashMap::new();
        let mut ids = Vec::with_capacity(rows.len());
        let mut chain_id = root.is_persisted().then_some(root.id);

        for (position, row) in rows.iter().enumerate() {
            let parent_id = match row.parent_id {
                None => None,
                Some(parent) => Some(*assigned.get(&parent).ok_or_else(|| {
                    PersistenceError::WriteFailure(format!("row {} precedes its parent {}", row.id, parent))
                })?),
            };
            let quantity = i64::try_from(row.quantity)
                .map_err(|_| PersistenceError::WriteFailure(format!("quantity {} out of range", row.quantity)))?;

            tx.execute(
                "INSERT INTO products (product_id, chain_id, owner_id, parent_id, position, type_id, quantity,
                                       kind, market_price, market_region_id, material_efficiency, batch_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    row.is_persisted().then_some(row.id),
                    chain_id.unwrap_or(0),
                    owner_id,
                    parent_id,
                    position as i64,
                    row.type_id,
                    quantity,
                    row.kind.as_str(),
                    row.market_price.to_string(),
                    row.market_region_id,
                    row.material_efficiency.to_string(),
                    row.batch_size,
                ],
            )?;
            let id = tx.last_insert_rowid();

            if chain_id.is_none() {
                tx.execute("UPDATE products SET chain_id = ?1 WHERE product_id = ?1", [id])?;
                chain_id = Some(id);
            }
            assigned.insert(row.id, id);
            ids.push(id);
        }

        tx.commit()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_chain;
    use crate::calculator::cost;
    use crate::pricing::sync_prices;
    use crate::repository::{load_chain, save_chain};

    const DOMAIN: i64 = 10000043;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        upsert_item_type(&conn, 34, "Tritanium", Some(18)).unwrap();
        upsert_item_type(&conn, 35, "Pyerite", Some(18)).unwrap();
        upsert_item_type(&conn, 11530, "Plasma Thruster", Some(334)).unwrap();
        upsert_item_type(&conn, 587, "Rifter", Some(25)).unwrap();
        upsert_material(&conn, 11530, 35, 40, 0).unwrap();
        upsert_material(&conn, 11530, 34, 200, 1).unwrap();
        upsert_material(&conn, 587, 34, 28000, 0).unwrap();
        upsert_material(&conn, 587, 11530, 2, 1).unwrap();
        upsert_region(&conn, &Region { region_id: DOMAIN, name: "Domain".into() }).unwrap();
        for (type_id, cents) in [(34, 500), (35, 1000), (11530, 125_000)] {
            let price = Decimal::new(cents, 2);
            let row = MarketPrice { type_id, average: price, base: price };
            upsert_market_price(&conn, DOMAIN, &row).unwrap();
        }
        conn
    }

    #[test]
    fn catalog_returns_materials_in_order() {
        let conn = seeded();
        let item = conn.item_type(11530).unwrap();
        assert_eq!(item.name, "Plasma Thruster");
        let ids: Vec<i64> = item.materials.iter().map(|m| m.type_id).collect();
        assert_eq!(ids, vec![35, 34]);
        assert!(conn.item_type(34).unwrap().materials.is_empty());
        assert!(matches!(conn.item_type(1), Err(CatalogError::NotFound(1))));
    }

    #[test]
    fn prices_are_batched_and_gaps_absent() {
        let conn = seeded();
        let prices = conn.prices(DOMAIN, &BTreeSet::from([34, 587, 11530])).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[&34].average, Decimal::new(5, 0));
        assert!(!prices.contains_key(&587));
        assert!(conn.prices(DOMAIN, &BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn chain_store_round_trip() {
        let mut conn = seeded();
        let mut chain = build_chain(&conn, 0, 587, 1).unwrap().chain;
        chain.kind = ProductKind::Build;
        chain.material_efficiency = Decimal::new(1, 1);
        chain.batch_size = 10;
        sync_prices(&mut chain, &conn, DOMAIN).unwrap();

        let chain_id = save_chain(&mut conn, &mut chain).unwrap();
        let loaded = load_chain(&conn, 0, chain_id).unwrap();
        assert_eq!(loaded, chain);
        assert_eq!(cost(&loaded), cost(&chain));
        assert_eq!(loaded.material_efficiency.to_string(), "0.1");
    }

    #[test]
    fn resave_rewrites_chain_in_place() {
        let mut conn = seeded();
        let mut chain = build_chain(&conn, 0, 587, 1).unwrap().chain;
        let chain_id = save_chain(&mut conn, &mut chain).unwrap();

        chain.materials[1].kind = ProductKind::Build;
        chain.materials[1].batch_size = 5;
        assert_eq!(save_chain(&mut conn, &mut chain).unwrap(), chain_id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 5);
        let loaded = load_chain(&conn, 0, chain_id).unwrap();
        assert_eq!(loaded.materials[1].batch_size, 5);
        assert_eq!(loaded, chain);
    }

    #[test]
    fn chains_are_scoped_by_owner() {
        let mut conn = seeded();
        let mut mine = build_chain(&conn, 0, 587, 1).unwrap().chain;
        let mut theirs = build_chain(&conn, 9, 11530, 1).unwrap().chain;
        let mine_id = save_chain(&mut conn, &mut mine).unwrap();
        let theirs_id = save_chain(&mut conn, &mut theirs).unwrap();

        let listed: Vec<i64> = list_chains(&conn, 0).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![mine_id]);
        assert_eq!(find_chain_for_type(&conn, 0, 587).unwrap(), Some(mine_id));
        assert_eq!(find_chain_for_type(&conn, 0, 11530).unwrap(), None);
        assert!(matches!(
            load_chain(&conn, 0, theirs_id),
            Err(PersistenceError::NotFound { .. })
        ));
    }

    #[test]
    fn region_names() {
        let conn = seeded();
        assert_eq!(region_name(&conn, DOMAIN).unwrap().as_deref(), Some("Domain"));
        assert_eq!(region_name(&conn, 1).unwrap(), None);
    }

    #[test]
    fn clearing_catalog_keeps_chains() {
        let mut conn = seeded();
        let mut chain = build_chain(&conn, 0, 34, 1).unwrap().chain;
        let chain_id = save_chain(&mut conn, &mut chain).unwrap();
        clear_catalog_data(&conn).unwrap();
        assert!(conn.item_type(34).is_err());
        assert!(load_chain(&conn, 0, chain_id).is_ok());
    }
}
