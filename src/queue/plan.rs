//! Job-plan batches: several jobs submitted together with declared
//! dependencies. A batch is validated as a whole before any job is
//! accepted; a rejected batch is never partially applied.

use std::collections::HashMap;
use std::collections::HashSet;

use crate::Job;
use crate::QueueError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct JobPlanEntry {
    /// Key unique within the batch, referenced by `depends_on`
    pub key: String,
    pub job: Job,
    /// Plan keys (not job ids) this entry waits for
    pub depends_on: Vec<String>,
}

impl JobPlanEntry {
    pub fn new(
        key: impl Into<String>,
        job: Job,
    ) -> Self {
        Self {
            key: key.into(),
            job,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Rejects duplicate plan keys, dependencies on unknown keys, empty jobs
/// and dependency cycles. Nothing is enqueued unless the whole batch
/// passes.
pub fn validate_plan(entries: &[JobPlanEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.key.as_str()) {
            return Err(QueueError::DuplicatePlanKey(entry.key.clone()).into());
        }
        if entry.job.is_empty() {
            return Err(QueueError::EmptyJob(entry.key.clone()).into());
        }
    }

    for entry in entries {
        for dep in &entry.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(QueueError::MissingDependency {
                    key: entry.key.clone(),
                    depends_on: dep.clone(),
                }
                .into());
            }
        }
    }

    // cycle check is the toposort's job
    topological_order(entries).map(|_| ())
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first postorder over the dependency graph: dependencies come
/// before their dependents. Fails with the cycle members when the graph is
/// circular.
pub fn topological_order(entries: &[JobPlanEntry]) -> Result<Vec<usize>> {
    let index_of: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.key.as_str(), i))
        .collect();

    let mut state = vec![VisitState::Unvisited; entries.len()];
    let mut order = Vec::with_capacity(entries.len());
    let mut stack_path = Vec::new();

    fn visit(
        i: usize,
        entries: &[JobPlanEntry],
        index_of: &HashMap<&str, usize>,
        state: &mut [VisitState],
        order: &mut Vec<usize>,
        stack_path: &mut Vec<usize>,
    ) -> Result<()> {
        match state[i] {
            VisitState::Done => return Ok(()),
            VisitState::InProgress => {
                let mut cycle: Vec<String> = stack_path
                    .iter()
                    .skip_while(|&&p| p != i)
                    .map(|&p| entries[p].key.clone())
                    .collect();
                cycle.push(entries[i].key.clone());
                return Err(QueueError::DependencyCycle(cycle).into());
            }
            VisitState::Unvisited => {}
        }

        state[i] = VisitState::InProgress;
        stack_path.push(i);
        for dep in &entries[i].depends_on {
            if let Some(&j) = index_of.get(dep.as_str()) {
                visit(j, entries, index_of, state, order, stack_path)?;
            }
        }
        stack_path.pop();
        state[i] = VisitState::Done;
        order.push(i);
        Ok(())
    }

    for i in 0..entries.len() {
        visit(
            i,
            entries,
            &index_of,
            &mut state,
            &mut order,
            &mut stack_path,
        )?;
    }

    Ok(order)
}
