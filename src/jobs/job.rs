use crate::proto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Submitted,
    Running,
    Done,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

/// A unit of work. Execution is simulated by the resource manager
/// sleeping for `duration_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub id: i64,
    pub duration_secs: u64,
    pub status: JobStatus,
}

impl Job {
    pub fn new(id: i64, duration_secs: u64) -> Self {
        Self {
            id,
            duration_secs,
            status: JobStatus::Waiting,
        }
    }

    pub fn to_proto(&self) -> proto::Job {
        proto::Job {
            id: self.id,
            duration_secs: self.duration_secs,
            status: status_to_proto(self.status) as i32,
        }
    }

    pub fn from_proto(job: &proto::Job) -> Self {
        Self {
            id: job.id,
            duration_secs: job.duration_secs,
            status: proto_to_status(job.status()),
        }
    }
}

pub fn batch_to_proto(jobs: &[Job]) -> Vec<proto::Job> {
    jobs.iter().map(Job::to_proto).collect()
}

pub fn batch_from_proto(jobs: &[proto::Job]) -> Vec<Job> {
    jobs.iter().map(Job::from_proto).collect()
}

fn status_to_proto(status: JobStatus) -> proto::JobStatus {
    match status {
        JobStatus::Waiting => proto::JobStatus::Waiting,
        JobStatus::Submitted => proto::JobStatus::Submitted,
        JobStatus::Running => proto::JobStatus::Running,
        JobStatus::Done => proto::JobStatus::Done,
    }
}

fn proto_to_status(status: proto::JobStatus) -> JobStatus {
    match status {
        proto::JobStatus::Waiting | proto::JobStatus::Unspecified => JobStatus::Waiting,
        proto::JobStatus::Submitted => JobStatus::Submitted,
        proto::JobStatus::Running => JobStatus::Running,
        proto::JobStatus::Done => JobStatus::Done,
    }
}
