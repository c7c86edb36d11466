//! Market price synchronization for production chains

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::PriceServiceError;
use crate::models::{ChainNode, MarketPrice};

/// Batched market price lookups for one region
pub trait PriceService {
    /// Prices for the requested types. Types without market data are absent from the map.
    fn prices(
        &self,
        region_id: i64,
        type_ids: &BTreeSet<i64>,
    ) -> Result<HashMap<i64, MarketPrice>, PriceServiceError>;
}

/// A type with no market data in the requested region; its nodes were priced at zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPrice {
    pub type_id: i64,
    pub region_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub region_id: i64,
    /// Distinct types that received a price
    pub priced: usize,
    pub missing: Vec<MissingPrice>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Stamp every node in `chain` with the average price for `region_id`.
///
/// All distinct types, regardless of kind, go out in a single request. If the
/// request fails the chain is left untouched.
pub fn sync_prices(
    chain: &mut ChainNode,
    service: &impl PriceService,
    region_id: i64,
) -> Result<SyncReport, PriceServiceError> {
    let type_ids = chain.type_ids();
    debug!(region_id, types = type_ids.len(), "fetching market prices");
    let prices = service.prices(region_id, &type_ids)?;

    let missing: Vec<MissingPrice> = type_ids
        .iter()
        .filter(|type_id| !prices.contains_key(*type_id))
        .map(|&type_id| MissingPrice { type_id, region_id })
        .collect();
    for gap in &missing {
        warn!(type_id = gap.type_id, region_id, "no market data, pricing at zero");
    }

    chain.for_each_mut(&mut |node| {
        node.market_price = prices
            .get(&node.type_id)
            .map(|price| price.average.max(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO);
        node.market_region_id = region_id;
    });

    Ok(SyncReport {
        region_id,
        priced: type_ids.len() - missing.len(),
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::cost;
    use crate::models::ProductKind;
    use proptest::prelude::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct FakePrices {
        averages: HashMap<(i64, i64), Decimal>,
        requests: RefCell<Vec<(i64, BTreeSet<i64>)>>,
        offline: bool,
    }

    impl FakePrices {
        fn with(mut self, region_id: i64, type_id: i64, average: Decimal) -> Self {
            self.averages.insert((region_id, type_id), average);
            self
        }
    }

    impl PriceService for FakePrices {
        fn prices(
            &self,
            region_id: i64,
            type_ids: &BTreeSet<i64>,
        ) -> Result<HashMap<i64, MarketPrice>, PriceServiceError> {
            self.requests.borrow_mut().push((region_id, type_ids.clone()));
            if self.offline {
                return Err(PriceServiceError {
                    region_id,
                    reason: "connection refused".to_string(),
                });
            }
            Ok(type_ids
                .iter()
                .filter_map(|&type_id| {
                    self.averages.get(&(region_id, type_id)).map(|&average| {
                        (type_id, MarketPrice { type_id, average, base: average })
                    })
                })
                .collect())
        }
    }

    const DOMAIN: i64 = 10000043;
    const FORGE: i64 = 10000002;

    fn chain() -> ChainNode {
        let mut root = ChainNode::new(0, 587, 1);
        root.kind = ProductKind::Build;
        let mut thruster = ChainNode::new(0, 11530, 2);
        thruster.materials.push(ChainNode::new(0, 34, 200));
        root.materials.push(ChainNode::new(0, 34, 28000));
        root.materials.push(thruster);
        root.materials.push(ChainNode::new(0, 36, 500));
        root
    }

    fn market() -> FakePrices {
        FakePrices::default()
            .with(DOMAIN, 34, Decimal::new(500, 2))
            .with(DOMAIN, 36, Decimal::new(8000, 2))
            .with(DOMAIN, 11530, Decimal::new(125_000, 2))
            .with(DOMAIN, 587, Decimal::new(350_000, 0))
    }

    #[test]
    fn every_node_is_priced_in_one_request() {
        let service = market();
        let mut root = chain();
        let report = sync_prices(&mut root, &service, DOMAIN).unwrap();

        assert!(report.is_complete());
        assert_eq!(report.priced, 4);
        let requests = service.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, BTreeSet::from([34, 36, 587, 11530]));

        assert_eq!(root.market_price, Decimal::new(350_000, 0));
        assert_eq!(root.materials[1].materials[0].market_price, Decimal::new(5, 0));
        assert_eq!(root.materials[1].market_price, Decimal::new(1250, 0));
        assert!(root.walk().iter().all(|(_, n)| n.market_region_id == DOMAIN));
    }

    #[test]
    fn missing_type_is_zero_priced_with_warning() {
        let service = FakePrices::default()
            .with(FORGE, 34, Decimal::new(450, 2))
            .with(FORGE, 36, Decimal::new(7500, 2));
        let mut root = ChainNode::new(0, 11530, 1);
        root.market_price = Decimal::new(99, 0);
        root.materials.push(ChainNode::new(0, 34, 10));
        root.materials.push(ChainNode::new(0, 36, 10));

        let report = sync_prices(&mut root, &service, FORGE).unwrap();
        assert_eq!(
            report.missing,
            vec![MissingPrice { type_id: 11530, region_id: FORGE }]
        );
        assert_eq!(report.priced, 2);
        assert_eq!(root.market_price, Decimal::ZERO);
        assert_eq!(root.materials[0].market_price, Decimal::new(450, 2));
        assert_eq!(root.materials[1].market_price, Decimal::new(75, 0));
    }

    #[test]
    fn transport_failure_leaves_chain_untouched() {
        let service = FakePrices { offline: true, ..market() };
        let mut root = chain();
        sync_prices(&mut root, &market(), DOMAIN).unwrap();
        let before = root.clone();

        let err = sync_prices(&mut root, &service, FORGE).unwrap_err();
        assert_eq!(err.region_id, FORGE);
        assert_eq!(root, before);
    }

    #[test]
    fn synced_prices_feed_cost() {
        let mut root = chain();
        sync_prices(&mut root, &market(), DOMAIN).unwrap();
        // 28000 * 5 + 2 * 1250 + 500 * 80
        assert_eq!(cost(&root), Decimal::new(182_500, 0));
        root.materials[1].kind = ProductKind::Build;
        // thruster built from 200 tritanium: 1000 each
        assert_eq!(cost(&root), Decimal::new(182_000, 0));
    }

    proptest! {
        #[test]
        fn sync_is_idempotent(prices in prop::collection::vec(0i64..10_000_000, 4), drop_one in 0usize..5) {
            let ids = [34, 36, 587, 11530];
            let mut service = FakePrices::default();
            for (i, (&type_id, &cents)) in ids.iter().zip(&prices).enumerate() {
                if i != drop_one {
                    service = service.with(DOMAIN, type_id, Decimal::new(cents, 2));
                }
            }

            let mut once = chain();
            let first = sync_prices(&mut once, &service, DOMAIN).unwrap();
            let mut twice = once.clone();
            let second = sync_prices(&mut twice, &service, DOMAIN).unwrap();
            prop_assert_eq!(once, twice);
            prop_assert_eq!(first, second);
        }
    }
}
