//! The solver interface the engine programs against, and the wrapper that
//! injects profile-derived constraints in front of it.

mod locate;
mod vase;

use std::rc::Rc;

use thiserror::Error;

use crate::expr::{Array, Expr};

pub use self::locate::{extract_site, FALLBACK_SITE};
pub use self::vase::{VaseConfig, VaseSolver};

/// A solver query: a set of side constraints plus a goal expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub constraints: Vec<Expr>,
    pub goal: Expr,
}

impl Query {
    pub fn new(constraints: Vec<Expr>, goal: Expr) -> Self {
        Self { constraints, goal }
    }

    /// The constraints followed by the goal.
    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        self.constraints.iter().chain(std::iter::once(&self.goal))
    }

    /// This query with `extra` conjoined onto the constraints.
    pub fn augmented(&self, extra: impl IntoIterator<Item = Expr>) -> Self {
        let mut constraints = self.constraints.clone();
        constraints.extend(extra);

        Self {
            constraints,
            goal: self.goal.clone(),
        }
    }
}

/// Three-valued answer to a validity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// The goal holds in every model of the constraints, and one exists.
    True,

    /// The constraints together with the goal admit no model.
    False,

    /// Neither direction could be certified.
    Unknown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("solver timed out")]
    Timeout,

    #[error("solver failed: {0}")]
    Failed(String),
}

/// The operations a decision procedure exposes to the engine.
pub trait Solver {
    fn check_validity(&mut self, query: &Query) -> Result<Validity, SolverError>;

    /// Whether the goal must be true under the constraints.
    fn check_truth(&mut self, query: &Query) -> Result<bool, SolverError>;

    /// Some concrete value the goal expression may take under the
    /// constraints.
    fn compute_value(&mut self, query: &Query) -> Result<u64, SolverError>;

    /// Concrete contents for `objects` in some model of the constraints, or
    /// `None` if the constraints are unsatisfiable.
    fn initial_values(
        &mut self,
        query: &Query,
        objects: &[Rc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>, SolverError>;
}
