//! A narrow mixed integer linear programming interface.
//!
//! Strategies describe their problem with `MilpProblem` and hand it to any `MilpSolver`.
//! `MicroLp` is the bundled backend.

use std::fmt;

use good_lp::{constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable};

use crate::utils::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    pub name: String,
    pub lower: f64,
    pub upper: Option<f64>,
    pub integer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    LessEq,
    Equal,
}

/// `Σ coef·var (<= | =) rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub terms: Vec<(VarId, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// Minimize a linear objective subject to linear constraints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilpProblem {
    vars: Vec<VarDef>,
    constraints: Vec<LinearConstraint>,
    objective: Vec<(VarId, f64)>,
}

impl MilpProblem {
    pub fn new() -> Self {
        Default::default()
    }

    /// Non-negative integer variable, optionally bounded above
    pub fn add_integer(&mut self, name: impl Into<String>, upper: Option<f64>) -> VarId {
        self.vars.push(VarDef {
            name: name.into(),
            lower: 0.0,
            upper,
            integer: true,
        });
        VarId(self.vars.len() - 1)
    }

    pub fn add_constraint(&mut self, name: impl Into<String>, terms: Vec<(VarId, f64)>, relation: Relation, rhs: f64) {
        self.constraints.push(LinearConstraint {
            name: name.into(),
            terms,
            relation,
            rhs,
        });
    }

    /// Add `coef·var` to the objective
    pub fn minimize_term(&mut self, var: VarId, coef: f64) {
        self.objective.push((var, coef));
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    /// Objective value of an assignment given in variable order
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.objective.iter().map(|&(v, c)| c * values[v.0]).sum()
    }
}

/// Values for every variable of a solved problem
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    values: Vec<f64>,
    pub objective: f64,
}

impl Assignment {
    pub fn new(values: Vec<f64>, objective: f64) -> Self {
        Self { values, objective }
    }

    pub fn value(&self, var: VarId) -> f64 {
        self.values[var.0]
    }

    /// Integer variables come back with solver noise, round them
    pub fn integer(&self, var: VarId) -> u64 {
        self.value(var).max(0.0).round() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveFailure {
    Infeasible,
    Unbounded,
    Other(String),
}

impl fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveFailure::Infeasible => write!(f, "infeasible"),
            SolveFailure::Unbounded => write!(f, "unbounded"),
            SolveFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

pub trait MilpSolver: Send + Sync {
    fn solve(&self, problem: &MilpProblem) -> std::result::Result<Assignment, SolveFailure>;
}

/// Pure rust branch and bound through `good_lp`'s microlp backend
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLp;

impl MicroLp {
    fn expression(handles: &[Variable], terms: &[(VarId, f64)]) -> Expression {
        terms.iter().map(|&(v, c)| c * handles[v.0]).sum()
    }
}

impl MilpSolver for MicroLp {
    #[instrument(level = "debug", skip(self, problem), fields(vars = problem.vars.len(), constraints = problem.constraints.len()))]
    fn solve(&self, problem: &MilpProblem) -> std::result::Result<Assignment, SolveFailure> {
        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = problem
            .vars
            .iter()
            .map(|def| {
                let mut v = variable().name(def.name.clone()).min(def.lower);
                if let Some(upper) = def.upper {
                    v = v.max(upper);
                }
                if def.integer {
                    v = v.integer();
                }
                vars.add(v)
            })
            .collect();

        let objective = Self::expression(&handles, &problem.objective);
        let mut model = vars.minimise(objective).using(good_lp::solvers::microlp::microlp);
        for c in &problem.constraints {
            let lhs = Self::expression(&handles, &c.terms);
            let rhs = c.rhs;
            model = match c.relation {
                Relation::LessEq => model.with(constraint!(lhs <= rhs)),
                Relation::Equal => model.with(constraint!(lhs == rhs)),
            };
        }

        let solution = model.solve().map_err(|err| match err {
            ResolutionError::Infeasible => SolveFailure::Infeasible,
            ResolutionError::Unbounded => SolveFailure::Unbounded,
            other => SolveFailure::Other(other.to_string()),
        })?;

        let values: Vec<f64> = handles.iter().map(|&h| solution.value(h)).collect();
        let objective = problem.evaluate(&values);
        debug!(objective, "solved");
        Ok(Assignment::new(values, objective))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integer_program() {
        // min x + 2y  s.t.  x + y = 3,  x <= 1
        let mut p = MilpProblem::new();
        let x = p.add_integer("x", Some(1.0));
        let y = p.add_integer("y", None);
        p.add_constraint("sum", vec![(x, 1.0), (y, 1.0)], Relation::Equal, 3.0);
        p.minimize_term(x, 1.0);
        p.minimize_term(y, 2.0);

        let a = MicroLp.solve(&p).unwrap();
        assert_eq!(a.integer(x), 1);
        assert_eq!(a.integer(y), 2);
        approx::assert_abs_diff_eq!(a.objective, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn integrality_is_enforced() {
        // min s  s.t.  10 s >= 15  (written as -10 s <= -15)
        let mut p = MilpProblem::new();
        let s = p.add_integer("s", None);
        p.add_constraint("cover", vec![(s, -10.0)], Relation::LessEq, -15.0);
        p.minimize_term(s, 1.0);

        let a = MicroLp.solve(&p).unwrap();
        assert_eq!(a.integer(s), 2);
    }

    #[test]
    fn reports_infeasibility() {
        let mut p = MilpProblem::new();
        let x = p.add_integer("x", Some(2.0));
        p.add_constraint("too_much", vec![(x, 1.0)], Relation::Equal, 5.0);
        p.minimize_term(x, 1.0);

        assert_eq!(MicroLp.solve(&p), Err(SolveFailure::Infeasible));
    }

    #[test]
    fn evaluates_objective() {
        let mut p = MilpProblem::new();
        let a = p.add_integer("a", None);
        let b = p.add_integer("b", None);
        p.minimize_term(a, 0.5);
        p.minimize_term(b, 3.0);
        approx::assert_abs_diff_eq!(p.evaluate(&[2.0, 1.0]), 4.0);
    }
}
