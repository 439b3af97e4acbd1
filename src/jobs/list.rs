use crate::jobs::job::{Job, JobStatus};

/// The replicated, ordered jobs list.
///
/// Mutations happen only from critical-section tasks; readers elsewhere
/// may observe a stale snapshot. Status transitions are forward-only:
/// `Waiting -> Submitted -> Running -> Done`.
#[derive(Debug, Default)]
pub struct JobsList {
    jobs: Vec<Job>,
}

impl JobsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch, preserving arrival order.
    pub fn append(&mut self, batch: Vec<Job>) {
        self.jobs.extend(batch);
    }

    /// Replace the list wholesale with the replicated copy.
    pub fn replace(&mut self, jobs: Vec<Job>) {
        self.jobs = jobs;
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn has_waiting(&self) -> bool {
        self.jobs.iter().any(|j| j.status == JobStatus::Waiting)
    }

    /// The next up-to-`limit` waiting jobs in list order.
    pub fn waiting(&self, limit: usize) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Waiting)
            .take(limit)
            .copied()
            .collect()
    }

    /// Flip the given jobs to `Submitted`. Only waiting jobs move; the
    /// count of jobs actually flipped is returned.
    pub fn mark_submitted(&mut self, ids: &[i64]) -> usize {
        self.transition(ids, JobStatus::Submitted, |s| s == JobStatus::Waiting)
    }

    /// Flip the given jobs to `Done`. Only submitted or running jobs
    /// move, so a duplicated completion report cannot resurrect a job.
    pub fn mark_done(&mut self, ids: &[i64]) -> usize {
        self.transition(ids, JobStatus::Done, |s| {
            s == JobStatus::Submitted || s == JobStatus::Running
        })
    }

    fn transition(
        &mut self,
        ids: &[i64],
        to: JobStatus,
        eligible: impl Fn(JobStatus) -> bool,
    ) -> usize {
        let mut flipped = 0;
        for job in &mut self.jobs {
            if ids.contains(&job.id) && eligible(job.status) {
                job.status = to;
                flipped += 1;
            }
        }
        flipped
    }
}
