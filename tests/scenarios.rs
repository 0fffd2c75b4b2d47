//! End-to-end solves of small dispatch problems with the pure-Rust backend.

use std::collections::BTreeMap;

use aggregator_bidding::batch::BatchRunner;
use aggregator_bidding::domain::{
    BatteryParams, Configuration, EntityParameters, FcasPrices, TariffTable, TimeGrid, FCAS_MARKET_COUNT,
};
use aggregator_bidding::error::FailureKind;
use aggregator_bidding::optimizer::{EntityResult, Family, GoodLpSolver, SolveStatus};

const TOL: f64 = 1e-6;

fn solve(entity: &EntityParameters, grid: &TimeGrid, config: Configuration) -> EntityResult {
    BatchRunner::new(GoodLpSolver::default()).solve_one(entity, grid, &config.with_trajectories(true))
}

fn series<'a>(result: &'a EntityResult, family: Family) -> &'a [f64] {
    &result
        .trajectories
        .as_ref()
        .expect("trajectories requested")[&family]
}

fn column(values: &BTreeMap<Family, Vec<f64>>, family: Family) -> &[f64] {
    &values[&family]
}

fn assert_close(actual: f64, expected: f64, what: &str) {
    assert!(
        (actual - expected).abs() < TOL,
        "{what}: expected {expected}, got {actual}"
    );
}

#[test]
fn test_pure_load_is_bought_at_wholesale() {
    let grid = TimeGrid::new(1, 1.0).unwrap();
    let entity = EntityParameters::new("load-only", vec![10.0], vec![0.0], BatteryParams::none(), vec![0.30]);

    let result = solve(&entity, &grid, Configuration::aggregator(false));

    assert_eq!(result.status, SolveStatus::Optimal);
    assert!(result.proven_optimal);
    assert_close(series(&result, Family::NetEnergy)[0], 10.0, "E[0]");
    assert_close(result.costs.total_net_cost.unwrap(), 3.0, "total cost");
}

#[test]
fn test_battery_arbitrage_between_two_prices() {
    let grid = TimeGrid::new(2, 1.0).unwrap();
    let battery = BatteryParams::new(10.0, 20.0, 1.0);
    let entity = EntityParameters::new("arbitrage", vec![0.0; 2], vec![0.0; 2], battery, vec![0.10, 0.50]);

    let result = solve(&entity, &grid, Configuration::aggregator(false));

    assert_eq!(result.status, SolveStatus::Optimal);
    let total = result.costs.total_net_cost.unwrap();
    assert_close(total, -4.0, "total cost");
    assert!(total < 0.0);
    assert_close(series(&result, Family::Charge)[0], 10.0, "P_c[0]");
    assert_close(series(&result, Family::Discharge)[1], 10.0, "P_d[1]");
    assert_close(series(&result, Family::NetEnergy)[1], -10.0, "E[1]");
}

#[test]
fn test_zero_fcas_prices_contribute_nothing() {
    let grid = TimeGrid::new(3, 0.5).unwrap();
    let entity = EntityParameters::new(
        "fcas-free",
        vec![1.0, 2.0, 1.5],
        vec![0.0, 1.0, 2.0],
        BatteryParams::new(4.0, 8.0, 0.9),
        vec![0.2, 0.1, 0.4],
    )
    .with_fcas_prices(FcasPrices::flat(3, 0.0, 0.0));

    let result = solve(&entity, &grid, Configuration::aggregator(true));

    assert_eq!(result.status, SolveStatus::Optimal);
    assert_close(result.costs.fcas_net_cost.unwrap(), 0.0, "fcas cost");
    assert_close(
        result.costs.total_net_cost.unwrap(),
        result.costs.energy_net_cost.unwrap(),
        "total vs energy",
    );
}

#[test]
fn test_inverted_soc_bounds_never_look_optimal() {
    let grid = TimeGrid::new(2, 1.0).unwrap();
    let battery = BatteryParams::new(5.0, 5.0, 0.9).with_soc_bounds(10.0, 5.0);
    let entity = EntityParameters::new("inverted", vec![1.0; 2], vec![0.0; 2], battery, vec![0.2; 2]);

    let result = solve(&entity, &grid, Configuration::aggregator(false));

    assert_eq!(result.failure, Some(FailureKind::DataInconsistency));
    assert!(!result.costs.is_available());
    assert_eq!(result.status_label(), "DATA_INCONSISTENCY");
}

#[test]
fn test_unreachable_soc_floor_is_infeasible() {
    let grid = TimeGrid::new(2, 1.0).unwrap();
    // SOC starts at 0 and a battery without power can never reach 5 kWh
    let battery = BatteryParams::new(0.0, 10.0, 1.0).with_soc_bounds(5.0, 10.0);
    let entity = EntityParameters::new("stuck", vec![1.0; 2], vec![0.0; 2], battery, vec![0.2; 2]);

    let result = solve(&entity, &grid, Configuration::aggregator(false));

    assert_eq!(result.status, SolveStatus::Infeasible);
    assert_eq!(result.failure, Some(FailureKind::InfeasibleModel));
    assert_eq!(result.costs.total_net_cost, None);
    assert!(result.trajectories.is_none());
}

#[test]
fn test_sell_above_buy_is_unbounded() {
    let grid = TimeGrid::new(1, 1.0).unwrap();
    let entity = EntityParameters::new("free-money", vec![1.0], vec![0.0], BatteryParams::none(), vec![0.2])
        .with_tariffs(TariffTable::new(vec![vec![0.10]], vec![0.30]));

    let result = solve(&entity, &grid, Configuration::retail(0));

    assert_eq!(result.status, SolveStatus::Unbounded);
    assert_eq!(result.failure, Some(FailureKind::UnboundedModel));
}

fn rich_entity(n: usize) -> EntityParameters {
    let load: Vec<f64> = (0..n).map(|t| 1.0 + 0.5 * (t % 3) as f64).collect();
    let pv: Vec<f64> = (0..n).map(|t| if (2..n - 1).contains(&t) { 2.5 } else { 0.0 }).collect();
    let price: Vec<f64> = (0..n).map(|t| if t < n / 2 { 0.08 } else { 0.35 }).collect();
    let raise = (0..n).map(|t| [0.02 + 0.01 * t as f64, 0.015, 0.01]).collect();
    let lower = (0..n).map(|_| [0.012, 0.01, 0.03]).collect();
    EntityParameters::new(
        "rich",
        load,
        pv,
        BatteryParams::new(3.0, 6.0, 0.9).with_soc_bounds(0.5, 6.0),
        price,
    )
    .with_fcas_prices(FcasPrices::new(raise, lower))
    .with_tariffs(TariffTable::new(
        vec![(0..n).map(|t| if t < n / 2 { 0.15 } else { 0.40 }).collect()],
        vec![0.05],
    ))
}

fn check_core_identities(entity: &EntityParameters, grid: &TimeGrid, values: &BTreeMap<Family, Vec<f64>>) {
    let dt = grid.interval_hours();
    let eta = entity.battery.efficiency;
    let (e, pc, pd, pv, soc) = (
        &values[&Family::NetEnergy],
        &values[&Family::Charge],
        &values[&Family::Discharge],
        &values[&Family::PvDispatch],
        &values[&Family::StateOfCharge],
    );

    assert_close(soc[0], 0.0, "SOC[0]");
    for t in 0..grid.interval_count() {
        assert_close(e[t], pc[t] - pd[t] + entity.load_kw[t] - pv[t], "energy balance");
        assert_close(soc[t + 1] - soc[t], (pc[t] * eta - pd[t] / eta) * dt, "recurrence");
        assert!(
            !(pc[t] > TOL && pd[t] > TOL),
            "charging {} and discharging {} at {t}",
            pc[t],
            pd[t]
        );
        assert!(pv[t] >= -TOL && pv[t] <= entity.pv_kw[t] + TOL, "PV bound at {t}");
        assert!(soc[t + 1] >= entity.battery.soc_min_kwh - TOL);
        assert!(soc[t + 1] <= entity.battery.soc_max_kwh + TOL);
    }
}

#[test]
fn test_aggregator_solution_respects_physics_and_headroom() {
    let n = 6;
    let grid = TimeGrid::new(n, 0.5).unwrap();
    let entity = rich_entity(n);

    let result = solve(&entity, &grid, Configuration::aggregator(true));
    assert_eq!(result.status, SolveStatus::Optimal);
    let values = result.trajectories.as_ref().unwrap();
    check_core_identities(&entity, &grid, values);

    let v = |f: Family| column(values, f);
    let (pc, pd, pv, soc) = (
        v(Family::Charge),
        v(Family::Discharge),
        v(Family::PvDispatch),
        v(Family::StateOfCharge),
    );
    let (rc, rd, rpv) = (v(Family::RaiseCharge), v(Family::RaiseDischarge), v(Family::RaisePv));
    let (lc, ld, lpv) = (v(Family::LowerCharge), v(Family::LowerDischarge), v(Family::LowerPv));
    let battery = entity.battery;
    let (rating, eta, dt) = (battery.power_kw, battery.efficiency, grid.interval_hours());
    let leq = |lhs: f64, rhs: f64, what: &str, t: usize| {
        assert!(lhs <= rhs + TOL, "{what} at {t}: {lhs} > {rhs}");
    };

    for t in 0..n {
        let raise_pool = rc[t] + rd[t] + rpv[t];
        let lower_pool = lc[t] + ld[t] + lpv[t];
        for w in 0..FCAS_MARKET_COUNT {
            leq(v(Family::RaiseBid)[t * FCAS_MARKET_COUNT + w], raise_pool, "raise bid", t);
            leq(v(Family::LowerBid)[t * FCAS_MARKET_COUNT + w], lower_pool, "lower bid", t);
        }

        leq(rd[t], rating - pd[t], "raise discharge headroom", t);
        leq(rc[t], pc[t], "raise charge headroom", t);
        leq(lc[t], rating - pc[t], "lower charge headroom", t);
        leq(ld[t], pd[t], "lower discharge headroom", t);

        leq(
            (lc[t] * eta + ld[t] / eta) * dt,
            battery.soc_max_kwh - soc[t + 1],
            "lower energy reserve",
            t,
        );
        leq(
            (rc[t] * eta + rd[t] / eta) * dt,
            soc[t + 1] - battery.soc_min_kwh,
            "raise energy reserve",
            t,
        );

        leq(rpv[t], entity.pv_kw[t] - pv[t], "raise PV headroom", t);
        leq(lpv[t], pv[t], "lower PV headroom", t);
    }

    let costs = result.costs;
    assert_close(
        costs.total_net_cost.unwrap(),
        costs.energy_net_cost.unwrap() + costs.fcas_net_cost.unwrap(),
        "cost decomposition",
    );
    // positive prices make every unit of headroom worth offering
    assert!(costs.fcas_net_cost.unwrap() < 0.0);
}

#[test]
fn test_fcas_never_costs_more_than_energy_only() {
    let n = 6;
    let grid = TimeGrid::new(n, 0.5).unwrap();
    let entity = rich_entity(n);

    let with = solve(&entity, &grid, Configuration::aggregator(true));
    let without = solve(&entity, &grid, Configuration::aggregator(false));

    let with_total = with.costs.total_net_cost.unwrap();
    let without_total = without.costs.total_net_cost.unwrap();
    assert!(with_total <= without_total + TOL, "{with_total} > {without_total}");
}

#[test]
fn test_retail_split_and_reference_cost() {
    let n = 6;
    let grid = TimeGrid::new(n, 0.5).unwrap();
    let entity = rich_entity(n);

    let result = solve(&entity, &grid, Configuration::retail(0));
    assert_eq!(result.status, SolveStatus::Optimal);
    let values = result.trajectories.as_ref().unwrap();
    check_core_identities(&entity, &grid, values);
    assert!(!values.contains_key(&Family::RaiseBid));

    let (e, buy, sell) = (
        &values[&Family::NetEnergy],
        &values[&Family::EnergyBuy],
        &values[&Family::EnergySell],
    );
    let dt = grid.interval_hours();
    let tariffs = entity.tariffs.as_ref().unwrap();
    let mut tariff_cost = 0.0;
    let mut reference = 0.0;
    for t in 0..n {
        assert_close(e[t], buy[t] - sell[t], "net position split");
        tariff_cost += (tariffs.buy[0][t] * buy[t] - tariffs.sell[0] * sell[t]) * dt;
        reference += entity.energy_price[t] * e[t] * dt;
    }

    let costs = result.costs;
    assert_close(costs.total_net_cost.unwrap(), tariff_cost, "tariff cost");
    assert_eq!(costs.total_net_cost, costs.energy_net_cost);
    assert_close(costs.wholesale_reference_cost.unwrap(), reference, "wholesale reference");
}
