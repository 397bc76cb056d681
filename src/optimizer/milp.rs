//! Solver-neutral mixed-integer linear problem.
//!
//! The dispatch model is assembled here first and only translated into a
//! concrete backend (see [`crate::optimizer::solver`]) at solve time. Keeping the
//! problem as plain data lets the result extractor re-check an assignment against
//! every bound and constraint without going back to the solver.

use serde::Serialize;
use strum::Display;

/// Index of a decision variable inside a [`MilpProblem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarKind {
    Continuous,
    Binary,
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: String,
    pub kind: VarKind,
    pub lower: f64,
    pub upper: f64,
}

/// Sparse affine expression `sum(coef * var) + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
    constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    /// Builder form of [`LinearExpr::add_term`].
    pub fn plus(mut self, var: VarId, coef: f64) -> Self {
        self.add_term(var, coef);
        self
    }

    /// Adds `coef * var`; `None` is an inactive resource and contributes nothing.
    pub fn plus_opt(mut self, var: Option<VarId>, coef: f64) -> Self {
        if let Some(var) = var {
            self.add_term(var, coef);
        }
        self
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        if coef != 0.0 {
            self.terms.push((var, coef));
        }
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn constant_part(&self) -> f64 {
        self.constant
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, coef)| coef * values[var.index()])
            .sum::<f64>()
            + self.constant
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sense {
    Le,
    Eq,
    Ge,
}

/// Family of model constraints, used to label rows and violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConstraintGroup {
    VariableBound,
    PowerBalance,
    ThermalMinOutput,
    ThermalMaxOutput,
    RampUp,
    RampDown,
    ChargeLimit,
    DischargeLimit,
    StorageModeExclusion,
    StateOfCharge,
    StorageBalance,
    StartupTransition,
    AncillaryDischargeHeadroom,
    AncillaryChargeHeadroom,
}

/// Constraint family plus the 1-based step it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConstraintTag {
    pub group: ConstraintGroup,
    pub step: usize,
}

impl ConstraintTag {
    pub fn new(group: ConstraintGroup, step: usize) -> Self {
        Self { group, step }
    }
}

#[derive(Debug, Clone)]
pub struct LinearConstraint {
    pub tag: ConstraintTag,
    pub expr: LinearExpr,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Amount by which `values` break the constraint; 0 when satisfied.
    pub fn violation(&self, values: &[f64]) -> f64 {
        let lhs = self.expr.evaluate(values);
        match self.sense {
            Sense::Le => (lhs - self.rhs).max(0.0),
            Sense::Ge => (self.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - self.rhs).abs(),
        }
    }

    /// Right-hand side with the expression's constant moved across.
    pub fn effective_rhs(&self) -> f64 {
        self.rhs - self.expr.constant_part()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub group: ConstraintGroup,
    pub step: Option<usize>,
    pub label: String,
    pub amount: f64,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(step) => write!(f, "{} at step {} ({}) by {:.3e}", self.group, step, self.label, self.amount),
            None => write!(f, "{} ({}) by {:.3e}", self.group, self.label, self.amount),
        }
    }
}

/// Minimisation problem over bounded continuous and binary variables.
#[derive(Debug, Clone, Default)]
pub struct MilpProblem {
    variables: Vec<VariableDef>,
    constraints: Vec<LinearConstraint>,
    objective: LinearExpr,
}

impl MilpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_continuous(&mut self, name: impl Into<String>, lower: f64, upper: f64) -> VarId {
        self.push_variable(name.into(), VarKind::Continuous, lower, upper)
    }

    pub fn add_binary(&mut self, name: impl Into<String>) -> VarId {
        self.push_variable(name.into(), VarKind::Binary, 0.0, 1.0)
    }

    fn push_variable(&mut self, name: String, kind: VarKind, lower: f64, upper: f64) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(VariableDef {
            name,
            kind,
            lower,
            upper,
        });
        id
    }

    pub fn add_constraint(&mut self, tag: ConstraintTag, expr: LinearExpr, sense: Sense, rhs: f64) {
        self.constraints.push(LinearConstraint {
            tag,
            expr,
            sense,
            rhs,
        });
    }

    pub fn extend_constraints(&mut self, constraints: impl IntoIterator<Item = LinearConstraint>) {
        self.constraints.extend(constraints);
    }

    pub fn set_objective(&mut self, objective: LinearExpr) {
        self.objective = objective;
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn variable(&self, id: VarId) -> &VariableDef {
        &self.variables[id.index()]
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &LinearExpr {
        &self.objective
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn binary_indices(&self) -> Vec<usize> {
        self.variables
            .iter()
            .enumerate()
            .filter(|(_, v)| v.kind == VarKind::Binary)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.variables.iter().map(|v| (v.lower, v.upper)).collect()
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective.evaluate(values)
    }

    /// Checks a full assignment against every bound, integrality requirement and
    /// constraint. Tolerances scale with the magnitude of the bound or right-hand side.
    pub fn violations(&self, values: &[f64], tolerance: f64) -> Vec<Violation> {
        let mut found = Vec::new();

        if values.len() != self.variables.len() {
            found.push(Violation {
                group: ConstraintGroup::VariableBound,
                step: None,
                label: format!(
                    "assignment has {} values for {} variables",
                    values.len(),
                    self.variables.len()
                ),
                amount: f64::INFINITY,
            });
            return found;
        }

        for (def, &value) in self.variables.iter().zip(values) {
            let below = (def.lower - value).max(0.0);
            let above = (value - def.upper).max(0.0);
            let amount = below.max(above);
            let scale = 1.0 + def.lower.abs().max(def.upper.abs());
            if amount > tolerance * scale || !value.is_finite() {
                found.push(Violation {
                    group: ConstraintGroup::VariableBound,
                    step: None,
                    label: def.name.clone(),
                    amount,
                });
            } else if def.kind == VarKind::Binary {
                let fractional = (value - value.round()).abs();
                if fractional > tolerance.max(1e-6) {
                    found.push(Violation {
                        group: ConstraintGroup::VariableBound,
                        step: None,
                        label: format!("{} not integral", def.name),
                        amount: fractional,
                    });
                }
            }
        }

        for constraint in &self.constraints {
            let amount = constraint.violation(values);
            if amount > tolerance * (1.0 + constraint.rhs.abs()) {
                found.push(Violation {
                    group: constraint.tag.group,
                    step: Some(constraint.tag.step),
                    label: format!("{:?} {}", constraint.sense, constraint.rhs),
                    amount,
                });
            }
        }

        found
    }
}
