//! Requirement/rank placement policy.
use crate::{
    constants::DEFAULT_RANK,
    expr::{Bindings, Expr, Value},
    model::{Executor, PlacementOptions},
};

/// Picks an executor for one instance's placement options: filter by
/// requirements, rank the survivors, return the winner.
///
/// Pure over its inputs; identical snapshots yield identical selections.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlacementPolicy;

impl PlacementPolicy {
    /// Creates the policy.
    pub fn new() -> Self {
        Self
    }

    /// Selects the executor the instance should be placed on, or `None`
    /// when no executor survives filtering. A requirement or rank that
    /// fails to parse or evaluate selects nothing.
    pub fn select<'a>(
        &self,
        executors: &'a [Executor],
        options: &PlacementOptions,
    ) -> Option<&'a Executor> {
        let requirements: Vec<Expr> = options
            .requirements
            .iter()
            .map(|raw| Expr::parse(raw))
            .collect::<Result<_, _>>()
            .ok()?;

        let survivors: Vec<&Executor> = executors
            .iter()
            .filter(|executor| {
                let bindings = requirement_bindings(executor);
                requirements
                    .iter()
                    .all(|req| req.eval_bool(&bindings).unwrap_or(false))
            })
            .collect();

        let rank = Expr::parse(options.rank.as_deref().unwrap_or(DEFAULT_RANK)).ok()?;

        let mut best: Option<(&Executor, f64)> = None;
        for executor in survivors {
            let value = rank.eval_num(&rank_bindings(executor)).ok()?;
            match best {
                // Strict comparison keeps the earliest executor on ties.
                Some((_, top)) if value <= top => {}
                _ => best = Some((executor, value)),
            }
        }

        best.map(|(executor, _)| executor)
    }
}

fn requirement_bindings(executor: &Executor) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert("tags".into(), Value::Set(executor.tags.clone()));
    bindings.insert("host".into(), Value::Str(executor.host.clone()));
    bindings.insert("domain".into(), Value::Str(executor.domain.clone()));
    bindings
}

fn rank_bindings(executor: &Executor) -> Bindings {
    let mut bindings = Bindings::new();
    bindings.insert("ncont".into(), Value::Num(executor.ncont() as f64));
    bindings
}
