//! Solver-independent MILP instance.
//!
//! Variables are grouped into families (`E`, `P_c`, `SOC`, ...) laid out as
//! `rows x cols` blocks; everything the builder emits is linear, so an
//! expression is a list of `(variable, coefficient)` terms plus a constant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::domain::Configuration;

/// Index of a decision variable inside one [`MilpInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Continuous,
    Binary,
}

/// Decision-variable families of the dispatch model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
pub enum Family {
    #[strum(serialize = "E")]
    NetEnergy,
    #[strum(serialize = "E_buy")]
    EnergyBuy,
    #[strum(serialize = "E_sell")]
    EnergySell,
    #[strum(serialize = "P_c")]
    Charge,
    #[strum(serialize = "P_d")]
    Discharge,
    #[strum(serialize = "tau")]
    ChargeMode,
    #[strum(serialize = "PV")]
    PvDispatch,
    #[strum(serialize = "SOC")]
    StateOfCharge,
    #[strum(serialize = "R")]
    RaiseBid,
    #[strum(serialize = "L")]
    LowerBid,
    #[strum(serialize = "R_c")]
    RaiseCharge,
    #[strum(serialize = "R_d")]
    RaiseDischarge,
    #[strum(serialize = "L_c")]
    LowerCharge,
    #[strum(serialize = "L_d")]
    LowerDischarge,
    #[strum(serialize = "R_pv")]
    RaisePv,
    #[strum(serialize = "L_pv")]
    LowerPv,
}

impl Family {
    /// File stem used by the result writer.
    pub fn output_name(self) -> &'static str {
        match self {
            Family::NetEnergy => "energy_bids",
            Family::EnergyBuy => "energy_buy",
            Family::EnergySell => "energy_sell",
            Family::Charge => "charging_BESS",
            Family::Discharge => "discharging_BESS",
            Family::ChargeMode => "charge_mode",
            Family::PvDispatch => "PV_generation",
            Family::StateOfCharge => "state_of_charge",
            Family::RaiseBid => "Raise_FCAS_bids",
            Family::LowerBid => "Lower_FCAS_bids",
            Family::RaiseCharge => "Raise_c_BESS",
            Family::RaiseDischarge => "Raise_d_BESS",
            Family::LowerCharge => "Lower_c_BESS",
            Family::LowerDischarge => "Lower_d_BESS",
            Family::RaisePv => "Raise_PV",
            Family::LowerPv => "Lower_PV",
        }
    }

    /// Families with one column per FCAS product.
    pub fn is_per_market(self) -> bool {
        matches!(self, Family::RaiseBid | Family::LowerBid)
    }

    /// Families the builder creates for `config`, in output order.
    pub fn present_in(config: &Configuration) -> Vec<Family> {
        let mut families = vec![
            Family::NetEnergy,
            Family::Charge,
            Family::Discharge,
            Family::ChargeMode,
            Family::PvDispatch,
            Family::StateOfCharge,
        ];
        if config.is_retail() {
            families.extend([Family::EnergyBuy, Family::EnergySell]);
        }
        if config.fcas_enabled() {
            families.extend([
                Family::RaiseBid,
                Family::LowerBid,
                Family::RaiseCharge,
                Family::RaiseDischarge,
                Family::LowerCharge,
                Family::LowerDischarge,
                Family::RaisePv,
                Family::LowerPv,
            ]);
        }
        families
    }
}

/// Cost figures computed from the solution but not necessarily optimised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTerm {
    /// Σ λ_E·E·Δt
    Energy,
    /// −Σ (λ_R·R + λ_L·L)·Δt
    Fcas,
    /// Σ (λ_buy·E_buy − λ_sell·E_sell)·Δt
    Tariff,
    /// Σ λ_E·E·Δt, priced at wholesale whatever the objective
    WholesaleReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub family: Family,
    /// Row-major position inside the family block
    pub offset: usize,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub kind: VarKind,
}

impl VariableDef {
    pub fn name(&self, layout: &FamilyLayout) -> String {
        if layout.cols == 1 {
            format!("{}[{}]", self.family, self.offset)
        } else {
            format!("{}[{},{}]", self.family, self.offset / layout.cols, self.offset % layout.cols)
        }
    }
}

/// Where a family's variables live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyLayout {
    pub first: VarId,
    pub rows: usize,
    pub cols: usize,
}

impl FamilyLayout {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn var(&self, row: usize, col: usize) -> VarId {
        debug_assert!(row < self.rows && col < self.cols);
        VarId(self.first.0 + row * self.cols + col)
    }

    /// Column-0 variables, one per row.
    pub fn column(&self, col: usize) -> Vec<VarId> {
        (0..self.rows).map(|row| self.var(row, col)).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: Vec<(VarId, f64)>,
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient != 0.0 {
            self.terms.push((var, coefficient));
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coef)| coef * values[var.0])
            .sum::<f64>()
            + self.constant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    LessOrEqual,
    Equal,
    GreaterOrEqual,
}

/// `lhs (relation) rhs`, tagged with the rule and interval it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub rule: &'static str,
    pub index: usize,
    pub lhs: LinearExpr,
    pub relation: Relation,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.lhs.evaluate(values);
        match self.relation {
            Relation::LessOrEqual => lhs <= self.rhs + tolerance,
            Relation::Equal => (lhs - self.rhs).abs() <= tolerance,
            Relation::GreaterOrEqual => lhs >= self.rhs - tolerance,
        }
    }
}

/// Shape of an instance, as reported in solver statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstanceSize {
    pub binary_vars: usize,
    pub continuous_vars: usize,
    pub constraints: usize,
}

/// A fully specified minimisation MILP.
#[derive(Debug, Clone, Default)]
pub struct MilpInstance {
    variables: Vec<VariableDef>,
    families: BTreeMap<Family, FamilyLayout>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
    reports: BTreeMap<CostTerm, LinearExpr>,
}

impl MilpInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `rows x cols` block of variables with identical bounds.
    ///
    /// Each family can be added once; the layout of an existing family is
    /// returned unchanged.
    pub fn add_family(
        &mut self,
        family: Family,
        rows: usize,
        cols: usize,
        lower: Option<f64>,
        upper: Option<f64>,
        kind: VarKind,
    ) -> FamilyLayout {
        if let Some(existing) = self.families.get(&family) {
            return existing.clone();
        }
        let layout = FamilyLayout {
            first: VarId(self.variables.len()),
            rows,
            cols,
        };
        for offset in 0..rows * cols {
            self.variables.push(VariableDef {
                family,
                offset,
                lower,
                upper,
                kind,
            });
        }
        self.families.insert(family, layout.clone());
        layout
    }

    pub fn set_bounds(&mut self, var: VarId, lower: Option<f64>, upper: Option<f64>) {
        if let Some(def) = self.variables.get_mut(var.0) {
            def.lower = lower;
            def.upper = upper;
        }
    }

    pub fn add_constraint(
        &mut self,
        rule: &'static str,
        index: usize,
        lhs: LinearExpr,
        relation: Relation,
        rhs: f64,
    ) {
        self.constraints.push(LinearConstraint {
            rule,
            index,
            lhs,
            relation,
            rhs,
        });
    }

    pub fn objective_mut(&mut self) -> &mut LinearExpr {
        &mut self.objective
    }

    pub fn report_mut(&mut self, term: CostTerm) -> &mut LinearExpr {
        self.reports.entry(term).or_default()
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn report(&self, term: CostTerm) -> Option<&LinearExpr> {
        self.reports.get(&term)
    }

    pub fn family(&self, family: Family) -> Option<&FamilyLayout> {
        self.families.get(&family)
    }

    pub fn families(&self) -> impl Iterator<Item = (Family, &FamilyLayout)> {
        self.families.iter().map(|(f, l)| (*f, l))
    }

    pub fn variable_name(&self, var: VarId) -> String {
        let def = &self.variables[var.0];
        match self.families.get(&def.family) {
            Some(layout) => def.name(layout),
            None => format!("x{}", var.0),
        }
    }

    pub fn size(&self) -> InstanceSize {
        let binary_vars = self
            .variables
            .iter()
            .filter(|v| v.kind == VarKind::Binary)
            .count();
        InstanceSize {
            binary_vars,
            continuous_vars: self.variables.len() - binary_vars,
            constraints: self.constraints.len(),
        }
    }

    /// Splits a flat assignment (indexed by [`VarId`]) into per-family sequences.
    pub fn values_by_family(&self, values: &[f64]) -> BTreeMap<Family, Vec<f64>> {
        self.families
            .iter()
            .map(|(family, layout)| {
                let start = layout.first.0;
                (*family, values[start..start + layout.len()].to_vec())
            })
            .collect()
    }

    /// Reassembles a flat assignment from per-family sequences; `None` if a family is missing or short.
    pub fn flatten_values(&self, by_family: &BTreeMap<Family, Vec<f64>>) -> Option<Vec<f64>> {
        let mut flat = vec![0.0; self.variables.len()];
        for (family, layout) in &self.families {
            let series = by_family.get(family)?;
            if series.len() != layout.len() {
                return None;
            }
            let start = layout.first.0;
            flat[start..start + layout.len()].copy_from_slice(series);
        }
        Some(flat)
    }

    /// Rules violated by `values`, for diagnostics.
    pub fn violated_constraints(&self, values: &[f64], tolerance: f64) -> Vec<&LinearConstraint> {
        self.constraints
            .iter()
            .filter(|c| !c.is_satisfied(values, tolerance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_layout_is_row_major() {
        let mut inst = MilpInstance::new();
        let e = inst.add_family(Family::NetEnergy, 3, 1, None, None, VarKind::Continuous);
        let r = inst.add_family(Family::RaiseBid, 3, 3, Some(0.0), None, VarKind::Continuous);
        assert_eq!(e.var(2, 0).index(), 2);
        assert_eq!(r.var(0, 0).index(), 3);
        assert_eq!(r.var(1, 2).index(), 3 + 5);
        assert_eq!(inst.variable_name(r.var(1, 2)), "R[1,2]");
        assert_eq!(inst.variable_name(e.var(1, 0)), "E[1]");
    }

    #[test]
    fn test_size_counts_binaries_separately() {
        let mut inst = MilpInstance::new();
        inst.add_family(Family::Charge, 4, 1, Some(0.0), None, VarKind::Continuous);
        let tau = inst.add_family(Family::ChargeMode, 4, 1, None, None, VarKind::Binary);
        inst.add_constraint("c", 0, LinearExpr::new().term(tau.var(0, 0), 1.0), Relation::Equal, 1.0);
        let size = inst.size();
        assert_eq!(size.binary_vars, 4);
        assert_eq!(size.continuous_vars, 4);
        assert_eq!(size.constraints, 1);
    }

    #[test]
    fn test_expression_evaluation_and_satisfaction() {
        let expr = LinearExpr::new().term(VarId(0), 2.0).term(VarId(1), -1.0);
        let mut with_const = expr.clone();
        with_const.add_constant(0.5);
        let values = [3.0, 1.0];
        assert_eq!(expr.evaluate(&values), 5.0);
        assert_eq!(with_const.evaluate(&values), 5.5);

        let c = LinearConstraint {
            rule: "test",
            index: 0,
            lhs: expr,
            relation: Relation::LessOrEqual,
            rhs: 5.0,
        };
        assert!(c.is_satisfied(&values, 1e-9));
        assert!(!c.is_satisfied(&[4.0, 1.0], 1e-9));
    }

    #[test]
    fn test_zero_coefficients_are_dropped() {
        let expr = LinearExpr::new().term(VarId(0), 0.0).term(VarId(1), 1.0);
        assert_eq!(expr.terms.len(), 1);
    }

    #[test]
    fn test_values_round_trip_through_families() {
        let mut inst = MilpInstance::new();
        inst.add_family(Family::NetEnergy, 2, 1, None, None, VarKind::Continuous);
        inst.add_family(Family::StateOfCharge, 3, 1, None, None, VarKind::Continuous);
        let flat = vec![1.0, 2.0, 0.0, 5.0, 7.0];
        let by_family = inst.values_by_family(&flat);
        assert_eq!(by_family[&Family::StateOfCharge], vec![0.0, 5.0, 7.0]);
        assert_eq!(inst.flatten_values(&by_family), Some(flat));
    }

    #[test]
    fn test_present_families_follow_configuration() {
        let agg = Family::present_in(&Configuration::aggregator(false));
        assert!(!agg.contains(&Family::RaiseBid));
        assert!(!agg.contains(&Family::EnergyBuy));
        let fcas = Family::present_in(&Configuration::aggregator(true));
        assert!(fcas.contains(&Family::LowerPv));
        let retail = Family::present_in(&Configuration::retail(0));
        assert!(retail.contains(&Family::EnergySell));
        assert!(!retail.contains(&Family::RaiseCharge));
        assert_eq!(Family::ChargeMode.to_string(), "tau");
    }
}
