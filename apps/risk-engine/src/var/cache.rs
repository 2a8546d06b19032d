//! TTL cache for VaR results.
//!
//! Keyed by (methodology, confidence, position set); engine-owned state with
//! a clear lifecycle: created at engine init, cleared wholesale on
//! `update_config` and `clear_cache`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::Portfolio;

use super::{VaRResult, VarMethodology};

/// Cache of recent VaR results with a fixed time-to-live.
#[derive(Debug)]
pub struct VarCache {
    ttl: Duration,
    entries: HashMap<String, (Instant, VaRResult)>,
}

impl VarCache {
    /// Empty cache with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Deterministic key over methodology, confidence, and the sorted
    /// position set (symbol and size both participate).
    #[must_use]
    pub fn key(methodology: VarMethodology, confidence: f64, portfolio: &Portfolio) -> String {
        let confidence_bps = (confidence * 10_000.0).round() as u64;
        let mut positions: Vec<String> = portfolio
            .positions
            .iter()
            .map(|p| format!("{}={}@{}", p.symbol, p.signed_size(), p.current_price))
            .collect();
        positions.sort();
        format!("{methodology}:{confidence_bps}:{}", positions.join(","))
    }

    /// Fresh entry for the key, if present and within TTL.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&VaRResult> {
        let (inserted, result) = self.entries.get(key)?;
        if inserted.elapsed() < self.ttl {
            Some(result)
        } else {
            None
        }
    }

    /// Store a result under the key.
    pub fn insert(&mut self, key: String, result: VaRResult) {
        self.entries.insert(key, (Instant::now(), result));
    }

    /// Drop every entry. Invoked on configuration change.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries (including expired but unevicted ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, PositionSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap as StdHashMap;

    fn sample_result() -> VaRResult {
        VaRResult {
            value: 100.0,
            percentage: 0.01,
            cvar: 120.0,
            methodology: VarMethodology::Parametric,
            confidence: 0.95,
            horizon_days: 1.0,
            component_var: StdHashMap::new(),
            marginal_var: StdHashMap::new(),
            calculated_at: Utc::now(),
        }
    }

    fn sample_portfolio() -> Portfolio {
        let mut portfolio = Portfolio::new("pf-1", dec!(1000));
        portfolio
            .positions
            .push(Position::new("BTC", PositionSide::Long, dec!(1), dec!(100)));
        portfolio.recompute_totals();
        portfolio
    }

    #[test]
    fn test_cache_hit_within_ttl() {
        let mut cache = VarCache::new(Duration::from_secs(60));
        let portfolio = sample_portfolio();
        let key = VarCache::key(VarMethodology::Parametric, 0.95, &portfolio);
        cache.insert(key.clone(), sample_result());
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_cache_miss_after_ttl() {
        let mut cache = VarCache::new(Duration::from_millis(0));
        let portfolio = sample_portfolio();
        let key = VarCache::key(VarMethodology::Parametric, 0.95, &portfolio);
        cache.insert(key.clone(), sample_result());
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_key_varies_with_position_set_and_confidence() {
        let mut portfolio = sample_portfolio();
        let base = VarCache::key(VarMethodology::Parametric, 0.95, &portfolio);
        assert_ne!(
            base,
            VarCache::key(VarMethodology::Parametric, 0.99, &portfolio)
        );
        assert_ne!(
            base,
            VarCache::key(VarMethodology::Historical, 0.95, &portfolio)
        );

        if let Some(p) = portfolio.position_mut("BTC") {
            p.size = dec!(2);
        }
        assert_ne!(
            base,
            VarCache::key(VarMethodology::Parametric, 0.95, &portfolio)
        );
    }

    #[test]
    fn test_clear_empties_cache() {
        let mut cache = VarCache::new(Duration::from_secs(60));
        cache.insert("k".to_string(), sample_result());
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }
}
