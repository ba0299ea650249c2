//! The injection wrapper: interposes on every query, consults the
//! limited-value map for the query's site, and forwards the first candidate
//! augmentation the underlying solver does not certify unsatisfiable.
//!
//! Augmentations only ever add conjuncts, so the forwarded query's models are
//! a subset of the original's, and an unsatisfiable query stays
//! unsatisfiable no matter what the wrapper does.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::OnceLock;

use hashbrown::HashSet;
use log::{debug, info, warn};

use super::{extract_site, Query, Solver, SolverError, Validity};
use crate::expr::{Array, Expr, Width};
use crate::map::{LimitedValueMap, SiteEntry, INT_TAG};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaseConfig {
    /// Path to the limited-value map. Unset degrades the wrapper to
    /// pass-through.
    pub map_path: Option<PathBuf>,

    /// Root arrays considered per query.
    pub max_arrays: usize,

    /// Little-endian bytes packed into one equality.
    pub max_bytes: usize,

    /// Distinct limited values attempted per site.
    pub max_values: usize,

    /// Try `pack(A0) + pack(A1) == v` when exactly two roots are present.
    pub try_pairs: bool,

    /// Report each accepted rewrite.
    pub verbose: bool,
}

impl Default for VaseConfig {
    fn default() -> Self {
        Self {
            map_path: None,
            max_arrays: 4,
            max_bytes: 4,
            max_values: 4,
            try_pairs: true,
            verbose: true,
        }
    }
}

impl VaseConfig {
    pub fn with_map(path: impl Into<PathBuf>) -> Self {
        Self {
            map_path: Some(path.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
enum MapState {
    Ready(LimitedValueMap),
    Degraded,
}

pub struct VaseSolver<S> {
    underlying: S,
    config: VaseConfig,
    map: OnceLock<MapState>,
}

impl<S: Solver> VaseSolver<S> {
    pub fn new(underlying: S, config: VaseConfig) -> Self {
        Self {
            underlying,
            config,
            map: OnceLock::new(),
        }
    }

    pub fn underlying(&self) -> &S {
        &self.underlying
    }

    pub fn underlying_mut(&mut self) -> &mut S {
        &mut self.underlying
    }

    /// The loaded map, or `None` once the wrapper has degraded to
    /// pass-through. The load happens exactly once, on the first query.
    fn map(&self) -> Option<&LimitedValueMap> {
        let state = self.map.get_or_init(|| match &self.config.map_path {
            None => {
                warn!("limited-value map not set; constraint injection disabled");
                MapState::Degraded
            }

            Some(path) => match LimitedValueMap::load(path) {
                Ok(map) => {
                    debug!("loaded limited-value map {} with {} sites", path.display(), map.len());
                    MapState::Ready(map)
                }

                Err(e) => {
                    warn!(
                        "failed to load limited-value map {}: {e}; constraint injection disabled",
                        path.display()
                    );
                    MapState::Degraded
                }
            },
        });

        match state {
            MapState::Ready(map) => Some(map),
            MapState::Degraded => None,
        }
    }

    /// The pooled candidate literals for a site.
    ///
    /// Values are unioned across every variable at the site (variables in
    /// name order, values in catalogue order), de-duplicated textually, and
    /// capped at `max_values`. The pooling loses the per-variable structure
    /// on purpose: synthesized names make per-variable matching unreliable,
    /// so a value observed for any variable at the site is worth proposing.
    fn candidate_values(&self, entry: &SiteEntry) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut values = vec![];

        'vars: for props in entry.values() {
            for prop in props {
                if prop.tag != INT_TAG {
                    continue;
                }

                if seen.insert(prop.value.clone()) {
                    values.push(prop.value.clone());

                    if values.len() >= self.config.max_values {
                        break 'vars;
                    }
                }
            }
        }

        values
    }

    /// Attempts to rewrite `query`; returns the accepted augmentation, if
    /// any.
    fn rewrite_query(&mut self, query: &Query) -> Option<Query> {
        let site = extract_site(query);

        let values = {
            let map = self.map()?;
            let entry = map.get_with_fallback(&site)?;

            self.candidate_values(entry)
        };

        if values.is_empty() {
            return None;
        }

        let roots = collect_roots(query, self.config.max_arrays);

        if roots.is_empty() {
            return None;
        }

        let used: Vec<usize> = roots
            .iter()
            .map(|array| bytes_used(query, array, self.config.max_bytes))
            .collect();

        for text in &values {
            let Ok(value) = text.parse::<i64>() else {
                debug!("skipping non-integer limited value {text:?} at {site}");
                continue;
            };

            // Bytewise equality on a single array: the most precise shape.
            for (array, &bytes) in roots.iter().zip(&used) {
                let extra = (0..bytes).map(|i| {
                    let byte = (value as u64 >> (8 * i)) & 0xff;

                    Expr::eq(Expr::read_at(array, i as u32), Expr::u8(byte as u8))
                });

                if let Some(accepted) = self.try_augmentation(query, extra.collect()) {
                    self.report(&site, format!("[{}] bytes={bytes} (byte equalities)", array.name));
                    return Some(accepted);
                }
            }

            // Packed 32-bit equality on a single array.
            for (array, &bytes) in roots.iter().zip(&used) {
                let extra = Expr::eq(pack_le_u32(array, bytes), Expr::u32(value as u32));

                if let Some(accepted) = self.try_augmentation(query, vec![extra]) {
                    self.report(&site, format!("[{}] as u32 == {value}", array.name));
                    return Some(accepted);
                }
            }

            // Sum of two arrays.
            if self.config.try_pairs && roots.len() == 2 {
                let sum = Expr::add(
                    pack_le_u32(&roots[0], used[0]),
                    pack_le_u32(&roots[1], used[1]),
                );
                let extra = Expr::eq(sum, Expr::u32(value as u32));

                if let Some(accepted) = self.try_augmentation(query, vec![extra]) {
                    self.report(
                        &site,
                        format!("[{}]+[{}] as u32 == {value}", roots[0].name, roots[1].name),
                    );
                    return Some(accepted);
                }
            }
        }

        None
    }

    /// Accepts the augmented query unless the underlying solver certifies it
    /// unsatisfiable. A solver failure counts as a rejection.
    fn try_augmentation(&mut self, query: &Query, extra: Vec<Expr>) -> Option<Query> {
        let augmented = query.augmented(extra);

        match self.underlying.check_validity(&augmented) {
            Ok(Validity::False) => None,
            Ok(_) => Some(augmented),

            Err(e) => {
                debug!("underlying solver failed on a candidate ({e}); rejecting it");
                None
            }
        }
    }

    fn report(&self, site: &str, what: String) {
        if self.config.verbose {
            info!("vase applied: {site} -> {what}");
        }
    }
}

impl<S: Solver> Solver for VaseSolver<S> {
    fn check_validity(&mut self, query: &Query) -> Result<Validity, SolverError> {
        let rewritten = self.rewrite_query(query);

        self.underlying.check_validity(rewritten.as_ref().unwrap_or(query))
    }

    fn check_truth(&mut self, query: &Query) -> Result<bool, SolverError> {
        let rewritten = self.rewrite_query(query);

        self.underlying.check_truth(rewritten.as_ref().unwrap_or(query))
    }

    fn compute_value(&mut self, query: &Query) -> Result<u64, SolverError> {
        let rewritten = self.rewrite_query(query);

        self.underlying.compute_value(rewritten.as_ref().unwrap_or(query))
    }

    fn initial_values(
        &mut self,
        query: &Query,
        objects: &[Rc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>, SolverError> {
        let rewritten = self.rewrite_query(query);

        self.underlying
            .initial_values(rewritten.as_ref().unwrap_or(query), objects)
    }
}

/// The distinct root arrays read anywhere in the query, in first-seen order,
/// capped at `max_arrays`.
fn collect_roots(query: &Query, max_arrays: usize) -> Vec<Rc<Array>> {
    let mut seen = HashSet::new();
    let mut roots = vec![];

    for expr in query.exprs() {
        expr.walk(&mut |e| {
            if let Expr::Read { array, .. } = e {
                if seen.insert(array.name.clone()) {
                    roots.push(array.clone());
                }
            }
        });
    }

    roots.truncate(max_arrays);

    roots
}

/// One plus the largest constant byte index read from `array`, defaulting to
/// 4 when only non-constant indices appear, clamped to `[1, max_bytes]`.
fn bytes_used(query: &Query, array: &Rc<Array>, max_bytes: usize) -> usize {
    let mut max_idx = None::<u64>;

    for expr in query.exprs() {
        expr.walk(&mut |e| {
            if let Expr::Read { array: read_array, index } = e {
                if read_array.name != array.name {
                    return;
                }

                if let Expr::Const { value, .. } = **index {
                    max_idx = Some(max_idx.map_or(value, |max| max.max(value)));
                }
            }
        });
    }

    let bytes = match max_idx {
        Some(max) => max as usize + 1,
        None => 4,
    };

    bytes.clamp(1, max_bytes.max(1))
}

/// Little-endian packing of the first `bytes` bytes of `array` into a 32-bit
/// value: `⋁ zext(read(array, i)) << 8i`.
fn pack_le_u32(array: &Rc<Array>, bytes: usize) -> Expr {
    let bytes = bytes.clamp(1, 4);
    let mut acc = Expr::u32(0);

    for i in 0..bytes {
        let mut ext = Expr::read_at(array, i as u32).zext(Width::W32);

        if i > 0 {
            ext = Expr::shl(ext, Expr::u32(8 * i as u32));
        }

        acc = Expr::or(acc, ext);
    }

    acc
}
