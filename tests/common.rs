#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use tempfile::TempDir;

use vase::expr::{Array, Assignment, Expr};
use vase::solve::{Query, Solver, SolverError, Validity};

/// An exhaustive reference solver: decides queries by enumerating every byte
/// assignment of the root arrays. Only usable with a few bytes of symbolic
/// input, which is all the scenarios here need.
#[derive(Default)]
pub struct EnumSolver {
    pub validity_calls: usize,
    pub truth_calls: usize,
    pub value_calls: usize,
    pub initial_values_calls: usize,

    /// The query most recently received by any operation.
    pub last_query: Option<Query>,

    /// While positive, `check_validity` fails with a timeout and counts
    /// down.
    pub fail_next_validity: usize,
}

const MAX_SYMBOLIC_BYTES: u32 = 3;

impl EnumSolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn roots(query: &Query) -> Vec<Rc<Array>> {
        let mut roots: Vec<Rc<Array>> = vec![];

        for expr in query.exprs() {
            expr.walk(&mut |e| {
                if let Expr::Read { array, .. } = e {
                    if roots.iter().all(|r| r.name != array.name) {
                        roots.push(array.clone());
                    }
                }
            });
        }

        roots
    }

    /// Every model of the constraints, as assignments in odometer order
    /// (array 0 byte 0 least significant).
    fn models(query: &Query) -> Vec<Assignment> {
        let roots = Self::roots(query);
        let total_bytes: u32 = roots.iter().map(|r| r.size).sum();
        assert!(
            total_bytes <= MAX_SYMBOLIC_BYTES,
            "enumeration over {total_bytes} bytes is not going to finish"
        );

        let combos: u64 = 1 << (8 * total_bytes);
        let mut models = vec![];

        for combo in 0..combos {
            let mut env = Assignment::new();
            let mut shift = 0;

            for root in &roots {
                let bytes = (0..root.size)
                    .map(|i| (combo >> (shift + 8 * i)) as u8)
                    .collect::<Vec<_>>();
                shift += 8 * root.size;
                env.insert(root.name.clone(), bytes);
            }

            let holds = query
                .constraints
                .iter()
                .all(|c| matches!(c.eval(&env), Some(v) if v != 0));

            if holds {
                models.push(env);
            }
        }

        models
    }
}

impl Solver for EnumSolver {
    fn check_validity(&mut self, query: &Query) -> Result<Validity, SolverError> {
        self.validity_calls += 1;
        self.last_query = Some(query.clone());

        if self.fail_next_validity > 0 {
            self.fail_next_validity -= 1;
            return Err(SolverError::Timeout);
        }

        let models = Self::models(query);
        let truths = models
            .iter()
            .map(|env| matches!(query.goal.eval(env), Some(v) if v != 0))
            .collect::<Vec<_>>();

        Ok(if !truths.iter().any(|&t| t) {
            Validity::False
        } else if truths.iter().all(|&t| t) {
            Validity::True
        } else {
            Validity::Unknown
        })
    }

    fn check_truth(&mut self, query: &Query) -> Result<bool, SolverError> {
        self.truth_calls += 1;
        self.last_query = Some(query.clone());

        let models = Self::models(query);

        Ok(!models.is_empty()
            && models
                .iter()
                .all(|env| matches!(query.goal.eval(env), Some(v) if v != 0)))
    }

    fn compute_value(&mut self, query: &Query) -> Result<u64, SolverError> {
        self.value_calls += 1;
        self.last_query = Some(query.clone());

        let models = Self::models(query);
        let env = models
            .first()
            .ok_or_else(|| SolverError::Failed("no model".to_owned()))?;

        query
            .goal
            .eval(env)
            .ok_or_else(|| SolverError::Failed("goal does not evaluate".to_owned()))
    }

    fn initial_values(
        &mut self,
        query: &Query,
        objects: &[Rc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>, SolverError> {
        self.initial_values_calls += 1;
        self.last_query = Some(query.clone());

        let models = Self::models(query);
        let Some(env) = models.first() else {
            return Ok(None);
        };

        Ok(Some(
            objects
                .iter()
                .map(|array| {
                    env.get(array.name.as_str())
                        .cloned()
                        .unwrap_or_else(|| vec![0; array.size as usize])
                })
                .collect(),
        ))
    }
}

/// Writes `contents` into a fresh temp dir and returns it with the file
/// path. Holding the dir keeps the file alive.
pub fn temp_file(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create a temp dir");
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("failed to create a temp file");
    file.write_all(contents.as_bytes()).expect("failed to write");

    (dir, path)
}

/// A trivially satisfiable goal.
pub fn trivial_goal() -> Expr {
    Expr::bool(true)
}
