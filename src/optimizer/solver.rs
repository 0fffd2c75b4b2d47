//! Solver boundary: hands a [`MilpInstance`] to a good_lp backend and maps
//! the outcome onto [`SolveResult`]. Infeasible and unbounded instances are
//! ordinary results here, never errors.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use good_lp::{constraint, variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::warn;

use super::instance::{Family, LinearExpr, MilpInstance, Relation, VarKind};

/// Termination status reported for one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Timeout,
    SolverError,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolverStats {
    pub wall_time_seconds: f64,
    pub binary_var_count: usize,
    pub continuous_var_count: usize,
    pub constraint_count: usize,
}

impl SolverStats {
    fn for_instance(instance: &MilpInstance, wall_time: Duration) -> Self {
        let size = instance.size();
        Self {
            wall_time_seconds: wall_time.as_secs_f64(),
            binary_var_count: size.binary_vars,
            continuous_var_count: size.continuous_vars,
            constraint_count: size.constraints,
        }
    }
}

/// Outcome of a solve. `values` is empty unless an assignment exists.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,
    pub values: BTreeMap<Family, Vec<f64>>,
    /// False for a timeout incumbent
    pub proven_optimal: bool,
    pub stats: SolverStats,
    pub message: Option<String>,
}

impl SolveResult {
    pub fn has_assignment(&self) -> bool {
        !self.values.is_empty()
    }

    fn without_assignment(status: SolveStatus, stats: SolverStats, message: Option<String>) -> Self {
        Self {
            status,
            objective_value: None,
            values: BTreeMap::new(),
            proven_optimal: false,
            stats,
            message,
        }
    }
}

/// Anything that can solve a [`MilpInstance`].
pub trait SolverAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, instance: &MilpInstance, time_limit: Option<Duration>) -> SolveResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SolverBackend {
    /// Pure-Rust branch and bound, always available
    #[default]
    MicroLp,
    /// HiGHS, requires the `highs` cargo feature
    Highs,
}

impl SolverBackend {
    pub fn is_available(self) -> bool {
        match self {
            SolverBackend::MicroLp => true,
            SolverBackend::Highs => cfg!(feature = "highs"),
        }
    }

    /// Whether the backend can stop a solve at a wall-clock limit.
    pub fn supports_time_limit(self) -> bool {
        matches!(self, SolverBackend::Highs)
    }
}

/// [`SolverAdapter`] backed by good_lp.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoodLpSolver {
    backend: SolverBackend,
}

/// Raw backend outcome before it is mapped onto a status.
enum BackendOutcome {
    Solved { values: Vec<f64>, timed_out: bool },
    Failed(ResolutionError),
}

impl GoodLpSolver {
    pub fn new(backend: SolverBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> SolverBackend {
        self.backend
    }

    fn run_backend(
        &self,
        instance: &MilpInstance,
        time_limit: Option<Duration>,
    ) -> Result<BackendOutcome, String> {
        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = instance
            .variables()
            .iter()
            .map(|def| {
                let mut v = variable();
                if def.kind == VarKind::Binary {
                    v = v.binary();
                }
                if let Some(lower) = def.lower {
                    v = v.min(lower);
                }
                if let Some(upper) = def.upper {
                    v = v.max(upper);
                }
                vars.add(v)
            })
            .collect();

        let objective = to_expression(instance.objective(), &handles);
        let rows: Vec<Constraint> = instance
            .constraints()
            .iter()
            .map(|row| {
                let lhs = to_expression(&row.lhs, &handles);
                match row.relation {
                    Relation::LessOrEqual => constraint!(lhs <= row.rhs),
                    Relation::Equal => constraint!(lhs == row.rhs),
                    Relation::GreaterOrEqual => constraint!(lhs >= row.rhs),
                }
            })
            .collect();

        let problem = vars.minimise(objective);
        match self.backend {
            SolverBackend::MicroLp => {
                if let Some(limit) = time_limit {
                    warn!(
                        limit_s = limit.as_secs_f64(),
                        "microlp backend cannot enforce a time limit, solving without one"
                    );
                }
                Ok(collect(problem.using(good_lp::microlp), rows, &handles))
            }
            #[cfg(feature = "highs")]
            SolverBackend::Highs => {
                let mut model = problem.using(good_lp::highs);
                if let Some(limit) = time_limit {
                    model = model.set_time_limit(limit.as_secs_f64());
                }
                Ok(collect(model, rows, &handles))
            }
            #[cfg(not(feature = "highs"))]
            SolverBackend::Highs => Err("HiGHS backend not compiled in (enable the `highs` feature)".to_string()),
        }
    }
}

fn to_expression(expr: &LinearExpr, handles: &[Variable]) -> Expression {
    let mut out = Expression::from(expr.constant);
    for (var, coef) in &expr.terms {
        out += *coef * handles[var.index()];
    }
    out
}

fn collect<M>(model: M, rows: Vec<Constraint>, handles: &[Variable]) -> BackendOutcome
where
    M: SolverModel<Error = ResolutionError>,
{
    let model = rows.into_iter().fold(model, |m, row| m.with(row));
    match model.solve() {
        Ok(solution) => {
            let values = handles.iter().map(|v| solution.value(*v)).collect();
            BackendOutcome::Solved {
                values,
                timed_out: hit_time_limit(&solution),
            }
        }
        Err(err) => BackendOutcome::Failed(err),
    }
}

#[cfg(feature = "highs")]
fn hit_time_limit<S: Solution>(solution: &S) -> bool {
    matches!(solution.status(), good_lp::solvers::SolutionStatus::TimeLimit)
}

#[cfg(not(feature = "highs"))]
fn hit_time_limit<S: Solution>(_solution: &S) -> bool {
    false
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "solver panicked".to_string()
    }
}

impl SolverAdapter for GoodLpSolver {
    fn name(&self) -> &'static str {
        match self.backend {
            SolverBackend::MicroLp => "microlp",
            SolverBackend::Highs => "highs",
        }
    }

    fn solve(&self, instance: &MilpInstance, time_limit: Option<Duration>) -> SolveResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_backend(instance, time_limit)));
        let stats = SolverStats::for_instance(instance, started.elapsed());

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(unavailable)) => {
                warn!(backend = self.name(), error = %unavailable, "solver unavailable");
                return SolveResult::without_assignment(SolveStatus::SolverError, stats, Some(unavailable));
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!(backend = self.name(), error = %msg, "solver crashed");
                return SolveResult::without_assignment(SolveStatus::SolverError, stats, Some(msg));
            }
        };

        self.map_outcome(instance, outcome, stats)
    }
}

impl GoodLpSolver {
    fn map_outcome(&self, instance: &MilpInstance, outcome: BackendOutcome, stats: SolverStats) -> SolveResult {
        match outcome {
            BackendOutcome::Solved { values, timed_out } => {
                if values.iter().any(|v| !v.is_finite()) {
                    let (status, msg) = if timed_out {
                        (SolveStatus::Timeout, "time limit reached without an incumbent")
                    } else {
                        (SolveStatus::SolverError, "solver returned non-finite values")
                    };
                    return SolveResult::without_assignment(status, stats, Some(msg.to_string()));
                }
                let objective_value = Some(instance.objective().evaluate(&values));
                let (status, message) = if timed_out {
                    (SolveStatus::Timeout, Some("time limit reached, incumbent not proven optimal".to_string()))
                } else {
                    (SolveStatus::Optimal, None)
                };
                SolveResult {
                    status,
                    objective_value,
                    values: instance.values_by_family(&values),
                    proven_optimal: !timed_out,
                    stats,
                    message,
                }
            }
            BackendOutcome::Failed(ResolutionError::Infeasible) => {
                SolveResult::without_assignment(SolveStatus::Infeasible, stats, None)
            }
            BackendOutcome::Failed(ResolutionError::Unbounded) => {
                SolveResult::without_assignment(SolveStatus::Unbounded, stats, None)
            }
            BackendOutcome::Failed(other) => {
                let msg = other.to_string();
                warn!(backend = self.name(), error = %msg, "solver error");
                SolveResult::without_assignment(SolveStatus::SolverError, stats, Some(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_lp(relation: Relation, rhs: f64) -> MilpInstance {
        // min x  s.t.  x (relation) rhs,  x in [0, 10]
        let mut inst = MilpInstance::new();
        let e = inst.add_family(Family::NetEnergy, 1, 1, Some(0.0), Some(10.0), VarKind::Continuous);
        inst.objective_mut().add_term(e.var(0, 0), 1.0);
        inst.add_constraint("x", 0, LinearExpr::new().term(e.var(0, 0), 1.0), relation, rhs);
        inst
    }

    #[test]
    fn test_optimal_solution_is_mapped_per_family() {
        let result = GoodLpSolver::default().solve(&tiny_lp(Relation::GreaterOrEqual, 4.0), None);
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!(result.proven_optimal);
        assert!((result.values[&Family::NetEnergy][0] - 4.0).abs() < 1e-6);
        assert!((result.objective_value.unwrap() - 4.0).abs() < 1e-6);
        assert_eq!(result.stats.constraint_count, 1);
        assert_eq!(result.stats.continuous_var_count, 1);
    }

    #[test]
    fn test_infeasible_is_a_result_not_an_error() {
        let result = GoodLpSolver::default().solve(&tiny_lp(Relation::GreaterOrEqual, 20.0), None);
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(!result.has_assignment());
        assert_eq!(result.objective_value, None);
    }

    #[test]
    fn test_unbounded_objective() {
        let mut inst = MilpInstance::new();
        let e = inst.add_family(Family::NetEnergy, 1, 1, None, None, VarKind::Continuous);
        inst.objective_mut().add_term(e.var(0, 0), 1.0);
        inst.add_constraint("x", 0, LinearExpr::new().term(e.var(0, 0), 1.0), Relation::LessOrEqual, 1.0);
        let result = GoodLpSolver::default().solve(&inst, Some(Duration::from_secs(5)));
        assert_eq!(result.status, SolveStatus::Unbounded);
    }

    #[test]
    fn test_binary_variables_are_integral() {
        // min -x - 0.5 y  s.t.  x + y <= 1.5, x binary, y in [0, 1]
        let mut inst = MilpInstance::new();
        let x = inst.add_family(Family::ChargeMode, 1, 1, Some(0.0), Some(1.0), VarKind::Binary);
        let y = inst.add_family(Family::Charge, 1, 1, Some(0.0), Some(1.0), VarKind::Continuous);
        inst.objective_mut().add_term(x.var(0, 0), -1.0);
        inst.objective_mut().add_term(y.var(0, 0), -0.5);
        inst.add_constraint(
            "cap",
            0,
            LinearExpr::new().term(x.var(0, 0), 1.0).term(y.var(0, 0), 1.0),
            Relation::LessOrEqual,
            1.5,
        );
        let result = GoodLpSolver::default().solve(&inst, None);
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!((result.values[&Family::ChargeMode][0] - 1.0).abs() < 1e-6);
        assert!((result.values[&Family::Charge][0] - 0.5).abs() < 1e-6);
        assert_eq!(result.stats.binary_var_count, 1);
    }

    #[cfg(not(feature = "highs"))]
    #[test]
    fn test_missing_backend_reports_solver_error() {
        let solver = GoodLpSolver::new(SolverBackend::Highs);
        assert!(!SolverBackend::Highs.is_available());
        let result = solver.solve(&tiny_lp(Relation::GreaterOrEqual, 1.0), None);
        assert_eq!(result.status, SolveStatus::SolverError);
        assert!(result.message.unwrap().contains("highs"));
    }

    #[test]
    fn test_backend_errors_are_not_timeouts() {
        let inst = tiny_lp(Relation::GreaterOrEqual, 1.0);
        let solver = GoodLpSolver::default();
        let result = solver.map_outcome(
            &inst,
            BackendOutcome::Failed(ResolutionError::Other("runtime failure in time stepping")),
            SolverStats::default(),
        );
        assert_eq!(result.status, SolveStatus::SolverError);
        assert!(result.message.unwrap().contains("runtime failure"));
    }

    #[test]
    fn test_time_limit_status_decides_timeout() {
        let inst = tiny_lp(Relation::GreaterOrEqual, 1.0);
        let solver = GoodLpSolver::default();

        let incumbent = solver.map_outcome(
            &inst,
            BackendOutcome::Solved { values: vec![2.0], timed_out: true },
            SolverStats::default(),
        );
        assert_eq!(incumbent.status, SolveStatus::Timeout);
        assert!(!incumbent.proven_optimal);
        assert!(incumbent.has_assignment());

        let empty = solver.map_outcome(
            &inst,
            BackendOutcome::Solved { values: vec![f64::NAN], timed_out: true },
            SolverStats::default(),
        );
        assert_eq!(empty.status, SolveStatus::Timeout);
        assert!(!empty.has_assignment());

        let garbage = solver.map_outcome(
            &inst,
            BackendOutcome::Solved { values: vec![f64::NAN], timed_out: false },
            SolverStats::default(),
        );
        assert_eq!(garbage.status, SolveStatus::SolverError);
    }

    #[test]
    fn test_only_highs_enforces_time_limits() {
        assert!(!SolverBackend::MicroLp.supports_time_limit());
        assert!(SolverBackend::Highs.supports_time_limit());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SolveStatus::SolverError.to_string(), "SOLVER_ERROR");
        assert_eq!(SolverBackend::MicroLp.to_string(), "microlp");
    }
}
