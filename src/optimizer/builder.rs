//! MILP formulation of the BESS/PV/FCAS dispatch problem.
//!
//! The instance is composed from a [`CoreDispatchModel`] plus the extensions
//! the [`Configuration`] asks for. Every piece writes into a shared
//! [`BuildContext`]; nothing is added conditionally inside the core.
//!
//! Sign conventions: `E[t]` is the net position (import positive), prices are
//! per kWh (energy) or per kW of enabled capacity per hour (FCAS), and every
//! price term is multiplied by Δt.

use tracing::debug;

use super::instance::{CostTerm, Family, FamilyLayout, LinearExpr, MilpInstance, Relation, VarKind};
use crate::domain::{Configuration, EntityParameters, FcasMarket, TimeGrid, FCAS_MARKET_COUNT};
use crate::error::ModelError;

/// Variables of the core model other pieces attach to.
#[derive(Debug, Clone)]
pub struct CoreHandles {
    pub net_energy: FamilyLayout,
    pub charge: FamilyLayout,
    pub discharge: FamilyLayout,
    pub charge_mode: FamilyLayout,
    pub pv: FamilyLayout,
    pub soc: FamilyLayout,
}

/// Instance under construction plus the read-only inputs it is built from.
pub struct BuildContext<'a> {
    pub params: &'a EntityParameters,
    pub grid: &'a TimeGrid,
    pub instance: MilpInstance,
    core: Option<CoreHandles>,
}

impl<'a> BuildContext<'a> {
    fn new(params: &'a EntityParameters, grid: &'a TimeGrid) -> Self {
        Self {
            params,
            grid,
            instance: MilpInstance::new(),
            core: None,
        }
    }

    pub fn core(&self) -> Result<&CoreHandles, ModelError> {
        self.core.as_ref().ok_or_else(|| {
            ModelError::inconsistent(&self.params.id, "extension attached before the core dispatch model")
        })
    }

    fn into_instance(self) -> MilpInstance {
        self.instance
    }
}

/// A piece of the formulation: adds variables, rows, objective and report terms.
pub trait ModelExtension {
    fn name(&self) -> &'static str;

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), ModelError>;
}

/// Energy balance, charge/discharge exclusivity, storage recurrence and bounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreDispatchModel;

impl ModelExtension for CoreDispatchModel {
    fn name(&self) -> &'static str {
        "core"
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), ModelError> {
        let n = ctx.grid.interval_count();
        let dt = ctx.grid.interval_hours();
        let battery = ctx.params.battery;
        let rating = battery.power_kw;
        let eta = battery.efficiency;
        let inst = &mut ctx.instance;

        let net_energy = inst.add_family(Family::NetEnergy, n, 1, None, None, VarKind::Continuous);
        let charge = inst.add_family(Family::Charge, n, 1, Some(0.0), None, VarKind::Continuous);
        let discharge = inst.add_family(Family::Discharge, n, 1, Some(0.0), None, VarKind::Continuous);
        let charge_mode = inst.add_family(Family::ChargeMode, n, 1, Some(0.0), Some(1.0), VarKind::Binary);
        let pv = inst.add_family(Family::PvDispatch, n, 1, Some(0.0), None, VarKind::Continuous);
        let soc = inst.add_family(
            Family::StateOfCharge,
            ctx.grid.soc_points(),
            1,
            Some(battery.soc_min_kwh),
            Some(battery.soc_max_kwh),
            VarKind::Continuous,
        );

        for (t, ceiling) in ctx.params.pv_kw.iter().enumerate() {
            inst.set_bounds(pv.var(t, 0), Some(0.0), Some(*ceiling));
        }

        // SOC[0] is pinned by a row; its bounds stay open.
        inst.set_bounds(soc.var(0, 0), None, None);
        inst.add_constraint(
            "initial_soc",
            0,
            LinearExpr::new().term(soc.var(0, 0), 1.0),
            Relation::Equal,
            0.0,
        );

        for t in 0..n {
            let (e, pc, pd, tau, pv_t) = (
                net_energy.var(t, 0),
                charge.var(t, 0),
                discharge.var(t, 0),
                charge_mode.var(t, 0),
                pv.var(t, 0),
            );

            // E - P_c + P_d + PV = load
            inst.add_constraint(
                "energy_balance",
                t,
                LinearExpr::new().term(e, 1.0).term(pc, -1.0).term(pd, 1.0).term(pv_t, 1.0),
                Relation::Equal,
                ctx.params.load_kw[t],
            );

            // P_d <= (1 - τ)·P
            inst.add_constraint(
                "discharge_mode",
                t,
                LinearExpr::new().term(pd, 1.0).term(tau, rating),
                Relation::LessOrEqual,
                rating,
            );
            // P_c <= τ·P
            inst.add_constraint(
                "charge_mode",
                t,
                LinearExpr::new().term(pc, 1.0).term(tau, -rating),
                Relation::LessOrEqual,
                0.0,
            );

            inst.add_constraint(
                "soc_recurrence",
                t,
                LinearExpr::new()
                    .term(soc.var(t + 1, 0), 1.0)
                    .term(soc.var(t, 0), -1.0)
                    .term(pc, -eta * dt)
                    .term(pd, dt / eta),
                Relation::Equal,
                0.0,
            );
        }

        ctx.core = Some(CoreHandles {
            net_energy,
            charge,
            discharge,
            charge_mode,
            pv,
            soc,
        });
        Ok(())
    }
}

/// FCAS raise/lower capacity offers backed by battery and PV headroom.
#[derive(Debug, Default, Clone, Copy)]
pub struct FcasExtension;

impl ModelExtension for FcasExtension {
    fn name(&self) -> &'static str {
        "fcas"
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), ModelError> {
        let prices = ctx.params.validate_fcas(ctx.grid)?;
        let core = ctx.core()?.clone();
        let n = ctx.grid.interval_count();
        let dt = ctx.grid.interval_hours();
        let battery = ctx.params.battery;
        let rating = battery.power_kw;
        let eta = battery.efficiency;
        let pv_forecast = &ctx.params.pv_kw;
        let inst = &mut ctx.instance;

        let nonneg = |inst: &mut MilpInstance, family: Family, cols: usize| {
            inst.add_family(family, n, cols, Some(0.0), None, VarKind::Continuous)
        };
        let raise = nonneg(inst, Family::RaiseBid, FCAS_MARKET_COUNT);
        let lower = nonneg(inst, Family::LowerBid, FCAS_MARKET_COUNT);
        let raise_c = nonneg(inst, Family::RaiseCharge, 1);
        let raise_d = nonneg(inst, Family::RaiseDischarge, 1);
        let lower_c = nonneg(inst, Family::LowerCharge, 1);
        let lower_d = nonneg(inst, Family::LowerDischarge, 1);
        let raise_pv = nonneg(inst, Family::RaisePv, 1);
        let lower_pv = nonneg(inst, Family::LowerPv, 1);

        let mut revenue = LinearExpr::new();

        for t in 0..n {
            let (pc, pd, pv, soc_next) = (
                core.charge.var(t, 0),
                core.discharge.var(t, 0),
                core.pv.var(t, 0),
                core.soc.var(t + 1, 0),
            );
            let (rc, rd, rpv) = (raise_c.var(t, 0), raise_d.var(t, 0), raise_pv.var(t, 0));
            let (lc, ld, lpv) = (lower_c.var(t, 0), lower_d.var(t, 0), lower_pv.var(t, 0));

            // Every product draws from the same headroom pool.
            for market in FcasMarket::all() {
                let w = market.index();
                inst.add_constraint(
                    "raise_bid_ceiling",
                    t,
                    LinearExpr::new()
                        .term(raise.var(t, w), 1.0)
                        .term(rc, -1.0)
                        .term(rd, -1.0)
                        .term(rpv, -1.0),
                    Relation::LessOrEqual,
                    0.0,
                );
                inst.add_constraint(
                    "lower_bid_ceiling",
                    t,
                    LinearExpr::new()
                        .term(lower.var(t, w), 1.0)
                        .term(lc, -1.0)
                        .term(ld, -1.0)
                        .term(lpv, -1.0),
                    Relation::LessOrEqual,
                    0.0,
                );

                revenue.add_term(raise.var(t, w), -prices.raise_at(t, market) * dt);
                revenue.add_term(lower.var(t, w), -prices.lower_at(t, market) * dt);
            }

            inst.add_constraint(
                "raise_discharge_headroom",
                t,
                LinearExpr::new().term(rd, 1.0).term(pd, 1.0),
                Relation::LessOrEqual,
                rating,
            );
            inst.add_constraint(
                "raise_charge_headroom",
                t,
                LinearExpr::new().term(rc, 1.0).term(pc, -1.0),
                Relation::LessOrEqual,
                0.0,
            );
            inst.add_constraint(
                "lower_charge_headroom",
                t,
                LinearExpr::new().term(lc, 1.0).term(pc, 1.0),
                Relation::LessOrEqual,
                rating,
            );
            inst.add_constraint(
                "lower_discharge_headroom",
                t,
                LinearExpr::new().term(ld, 1.0).term(pd, -1.0),
                Relation::LessOrEqual,
                0.0,
            );

            // (L_c·η + L_d/η)·Δt <= socMax - SOC[t+1]
            inst.add_constraint(
                "lower_energy_reserve",
                t,
                LinearExpr::new()
                    .term(lc, eta * dt)
                    .term(ld, dt / eta)
                    .term(soc_next, 1.0),
                Relation::LessOrEqual,
                battery.soc_max_kwh,
            );
            // (R_c·η + R_d/η)·Δt <= SOC[t+1] - socMin
            inst.add_constraint(
                "raise_energy_reserve",
                t,
                LinearExpr::new()
                    .term(rc, eta * dt)
                    .term(rd, dt / eta)
                    .term(soc_next, -1.0),
                Relation::LessOrEqual,
                -battery.soc_min_kwh,
            );

            inst.add_constraint(
                "raise_pv_headroom",
                t,
                LinearExpr::new().term(rpv, 1.0).term(pv, 1.0),
                Relation::LessOrEqual,
                pv_forecast[t],
            );
            inst.add_constraint(
                "lower_pv_headroom",
                t,
                LinearExpr::new().term(lpv, 1.0).term(pv, -1.0),
                Relation::LessOrEqual,
                0.0,
            );
        }

        for (var, coef) in &revenue.terms {
            inst.objective_mut().add_term(*var, *coef);
        }
        *inst.report_mut(CostTerm::Fcas) = revenue;
        Ok(())
    }
}

/// Σ λ_E·E·Δt, the net position priced at wholesale.
fn wholesale_energy_cost(ctx: &BuildContext<'_>, net_energy: &FamilyLayout) -> LinearExpr {
    let dt = ctx.grid.interval_hours();
    let mut cost = LinearExpr::new();
    for (t, price) in ctx.params.energy_price.iter().enumerate() {
        cost.add_term(net_energy.var(t, 0), price * dt);
    }
    cost
}

/// Aggregator objective: the net position settled at wholesale prices.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholesaleSettlement;

impl ModelExtension for WholesaleSettlement {
    fn name(&self) -> &'static str {
        "wholesale"
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), ModelError> {
        let net_energy = ctx.core()?.net_energy.clone();
        let cost = wholesale_energy_cost(ctx, &net_energy);
        let inst = &mut ctx.instance;
        for (var, coef) in &cost.terms {
            inst.objective_mut().add_term(*var, *coef);
        }
        *inst.report_mut(CostTerm::WholesaleReference) = cost.clone();
        *inst.report_mut(CostTerm::Energy) = cost;
        Ok(())
    }
}

/// Retail objective: `E = E_buy - E_sell` settled on one tariff.
#[derive(Debug, Clone, Copy)]
pub struct RetailSettlement {
    pub tariff_index: usize,
}

impl ModelExtension for RetailSettlement {
    fn name(&self) -> &'static str {
        "retail"
    }

    fn contribute(&self, ctx: &mut BuildContext<'_>) -> Result<(), ModelError> {
        let (buy, sell) = ctx.params.validate_tariff(ctx.grid, self.tariff_index)?;
        let buy = buy.to_vec();
        let net_energy = ctx.core()?.net_energy.clone();
        let reference = wholesale_energy_cost(ctx, &net_energy);
        let n = ctx.grid.interval_count();
        let dt = ctx.grid.interval_hours();
        let inst = &mut ctx.instance;

        let e_buy = inst.add_family(Family::EnergyBuy, n, 1, Some(0.0), None, VarKind::Continuous);
        let e_sell = inst.add_family(Family::EnergySell, n, 1, Some(0.0), None, VarKind::Continuous);

        let mut tariff_cost = LinearExpr::new();
        for t in 0..n {
            inst.add_constraint(
                "net_position_split",
                t,
                LinearExpr::new()
                    .term(net_energy.var(t, 0), 1.0)
                    .term(e_buy.var(t, 0), -1.0)
                    .term(e_sell.var(t, 0), 1.0),
                Relation::Equal,
                0.0,
            );
            tariff_cost.add_term(e_buy.var(t, 0), buy[t] * dt);
            tariff_cost.add_term(e_sell.var(t, 0), -sell * dt);
        }

        for (var, coef) in &tariff_cost.terms {
            inst.objective_mut().add_term(*var, *coef);
        }
        *inst.report_mut(CostTerm::Tariff) = tariff_cost;
        *inst.report_mut(CostTerm::WholesaleReference) = reference;
        Ok(())
    }
}

/// Assembles the instance for one (entity, configuration) pair.
pub struct ModelBuilder;

impl ModelBuilder {
    /// Pieces composed for `config`, core first.
    pub fn extensions_for(config: &Configuration) -> Vec<Box<dyn ModelExtension>> {
        let mut pieces: Vec<Box<dyn ModelExtension>> = vec![Box::new(CoreDispatchModel)];
        match config.tariff_index() {
            Some(tariff_index) => pieces.push(Box::new(RetailSettlement { tariff_index })),
            None => {
                pieces.push(Box::new(WholesaleSettlement));
                if config.fcas_enabled() {
                    pieces.push(Box::new(FcasExtension));
                }
            }
        }
        pieces
    }

    /// Validates the inputs and builds the instance. Pure: the same inputs
    /// always give the same variables, rows and objective, in the same order.
    pub fn build(
        params: &EntityParameters,
        grid: &TimeGrid,
        config: &Configuration,
    ) -> Result<MilpInstance, ModelError> {
        params.validate(grid)?;

        let mut ctx = BuildContext::new(params, grid);
        for piece in Self::extensions_for(config) {
            piece.contribute(&mut ctx)?;
            debug!(entity = %params.id, piece = piece.name(), "model piece attached");
        }

        let instance = ctx.into_instance();
        let size = instance.size();
        debug!(
            entity = %params.id,
            scenario = %config,
            binaries = size.binary_vars,
            continuous = size.continuous_vars,
            rows = size.constraints,
            "MILP instance built"
        );
        Ok(instance)
    }
}
