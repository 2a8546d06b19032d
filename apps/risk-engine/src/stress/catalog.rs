//! Hand-curated shock tables.
//!
//! Historical events carry fixed per-asset and per-sector shocks.
//! Worst-case templates are parameterized from the live portfolio's
//! composition at call time.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;

use crate::models::Portfolio;

use super::{StressScenario, sector_of};

/// The fixed historical event catalog.
#[must_use]
pub fn historical_scenarios() -> Vec<StressScenario> {
    let mut scenarios = Vec::new();

    let mut crisis_2008 = StressScenario::named(
        "2008 Financial Crisis",
        "Systemic deleveraging, all risk assets sold indiscriminately",
    );
    crisis_2008.asset_shocks.insert("BTC".to_string(), -0.50);
    crisis_2008.asset_shocks.insert("ETH".to_string(), -0.55);
    crisis_2008
        .sector_shocks
        .insert("altcoins".to_string(), -0.60);
    crisis_2008
        .sector_shocks
        .insert("stablecoins".to_string(), -0.02);
    crisis_2008.correlation_shift = 0.0;
    crisis_2008.duration_hours = 72.0;
    crisis_2008.probability = 0.01;
    scenarios.push(crisis_2008);

    let mut covid_2020 = StressScenario::named(
        "COVID-19 March 2020",
        "Global liquidity crunch, crypto halved in two days",
    );
    covid_2020.asset_shocks.insert("BTC".to_string(), -0.40);
    covid_2020.asset_shocks.insert("ETH".to_string(), -0.45);
    covid_2020
        .sector_shocks
        .insert("altcoins".to_string(), -0.55);
    covid_2020
        .sector_shocks
        .insert("stablecoins".to_string(), -0.01);
    covid_2020.duration_hours = 48.0;
    covid_2020.probability = 0.02;
    scenarios.push(covid_2020);

    let mut luna_2022 = StressScenario::named(
        "LUNA/UST Collapse May 2022",
        "Algorithmic stablecoin death spiral with altcoin contagion",
    );
    luna_2022.asset_shocks.insert("UST".to_string(), -0.95);
    luna_2022.asset_shocks.insert("BTC".to_string(), -0.25);
    luna_2022.asset_shocks.insert("ETH".to_string(), -0.30);
    luna_2022
        .sector_shocks
        .insert("altcoins".to_string(), -0.45);
    luna_2022.duration_hours = 120.0;
    luna_2022.probability = 0.02;
    scenarios.push(luna_2022);

    let mut ftx_2022 = StressScenario::named(
        "FTX Collapse November 2022",
        "Exchange insolvency, counterparty panic and withdrawal freeze",
    );
    ftx_2022.asset_shocks.insert("BTC".to_string(), -0.25);
    ftx_2022.asset_shocks.insert("ETH".to_string(), -0.30);
    ftx_2022
        .sector_shocks
        .insert("altcoins".to_string(), -0.40);
    ftx_2022.liquidity_reduction = 0.3;
    ftx_2022.duration_hours = 96.0;
    ftx_2022.probability = 0.03;
    scenarios.push(ftx_2022);

    let mut winter_2021 = StressScenario::named(
        "Crypto Winter May 2021",
        "Leverage washout after the 2021 top",
    );
    winter_2021.asset_shocks.insert("BTC".to_string(), -0.35);
    winter_2021.asset_shocks.insert("ETH".to_string(), -0.40);
    winter_2021
        .sector_shocks
        .insert("altcoins".to_string(), -0.50);
    winter_2021.duration_hours = 168.0;
    winter_2021.probability = 0.05;
    scenarios.push(winter_2021);

    scenarios
}

/// Five adversarial templates shaped by the current book.
#[must_use]
pub fn worst_case_scenarios(portfolio: &Portfolio) -> Vec<StressScenario> {
    let mut scenarios = Vec::new();

    let mut correlated_crash = StressScenario::named(
        "Correlated Crash",
        "Every holding drops together as correlations go to one",
    );
    for position in &portfolio.positions {
        correlated_crash
            .asset_shocks
            .insert(position.symbol.clone(), -0.30);
    }
    correlated_crash.correlation_shift = 0.5;
    correlated_crash.duration_hours = 24.0;
    correlated_crash.probability = 0.01;
    scenarios.push(correlated_crash);

    let mut flash_crash = StressScenario::named(
        "Flash Crash",
        "Largest holding gaps down hard, rest of the book follows",
    );
    let largest = portfolio
        .positions
        .iter()
        .max_by(|a, b| a.notional().cmp(&b.notional()));
    for position in &portfolio.positions {
        let shock = if largest.is_some_and(|l| l.symbol == position.symbol) {
            -0.40
        } else {
            -0.15
        };
        flash_crash
            .asset_shocks
            .insert(position.symbol.clone(), shock);
    }
    flash_crash.duration_hours = 1.0;
    flash_crash.probability = 0.02;
    scenarios.push(flash_crash);

    let mut sector_collapse = StressScenario::named(
        "Dominant Sector Collapse",
        "The book's heaviest sector loses nearly half its value",
    );
    if let Some(sector) = dominant_sector(portfolio) {
        sector_collapse.sector_shocks.insert(sector, -0.45);
    }
    for bucket in ["majors", "altcoins", "stablecoins"] {
        sector_collapse
            .sector_shocks
            .entry(bucket.to_string())
            .or_insert(-0.10);
    }
    sector_collapse.duration_hours = 48.0;
    sector_collapse.probability = 0.02;
    scenarios.push(sector_collapse);

    let mut regulatory = StressScenario::named(
        "Regulatory Shock",
        "Adverse ruling hits altcoins hardest, majors partially spared",
    );
    regulatory.sector_shocks.insert("majors".to_string(), -0.25);
    regulatory
        .sector_shocks
        .insert("altcoins".to_string(), -0.40);
    regulatory
        .sector_shocks
        .insert("stablecoins".to_string(), -0.05);
    regulatory.duration_hours = 72.0;
    regulatory.probability = 0.05;
    scenarios.push(regulatory);

    let mut infrastructure = StressScenario::named(
        "Infrastructure Failure",
        "Venue outage, positions marked down with no exit liquidity",
    );
    for position in &portfolio.positions {
        infrastructure
            .asset_shocks
            .insert(position.symbol.clone(), -0.20);
    }
    infrastructure.liquidity_reduction = 0.8;
    infrastructure.duration_hours = 12.0;
    infrastructure.probability = 0.03;
    scenarios.push(infrastructure);

    scenarios
}

/// Sector carrying the largest share of gross exposure.
fn dominant_sector(portfolio: &Portfolio) -> Option<String> {
    let mut exposure: HashMap<&'static str, f64> = HashMap::new();
    for position in &portfolio.positions {
        let notional = position.notional().to_f64().unwrap_or(0.0);
        *exposure.entry(sector_of(&position.symbol)).or_insert(0.0) += notional;
    }
    exposure
        .into_iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(sector, _)| sector.to_string())
}
