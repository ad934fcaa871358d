//! The job table: background and stopped pipelines the shell is tracking.
//!
//! Job ids are assigned the smallest positive integer not currently in use
//! (so `jobs` output stays low and stable, the way every job-control shell
//! behaves), not a monotonic counter.

use std::collections::HashMap;

use crate::job_control::{self, WaitOutcome};
use crate::parser::Pipeline;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done(i32),
    Killed(i32),
    /// No longer reachable via `waitpid` (reparented away, already reaped
    /// by something else). Reported and dropped like `Done`/`Killed`.
    Detached,
}

impl JobStatus {
    fn label(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Done(_) => "done",
            JobStatus::Killed(_) => "killed",
            JobStatus::Detached => "detached",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done(_) | JobStatus::Killed(_) | JobStatus::Detached
        )
    }
}

/// A single tracked background or stopped job. Owns the pipeline it was
/// started from so it can still be printed (via `jobs`, or on completion)
/// after the original input line is long gone.
pub struct Job {
    pub id: usize,
    pub pid: libc::pid_t,
    pub pgid: libc::pid_t,
    pub pipeline: Pipeline,
    pub status: JobStatus,
}

impl Job {
    fn announce_line(&self) -> String {
        format!(
            "[{}]  + {} {}   {}",
            self.id,
            self.pid,
            self.status.label(),
            self.pipeline
        )
    }

    /// Same rendering `reap`/`jobs` use, exposed for the `jobs` builtin.
    pub fn display_line(&self) -> String {
        self.announce_line()
    }
}

/// The shell's job table — tracks all background and stopped jobs.
#[derive(Default)]
pub struct JobTable {
    jobs: HashMap<usize, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_free_id(&self) -> usize {
        let mut id = 1;
        while self.jobs.contains_key(&id) {
            id += 1;
        }
        id
    }

    /// Registers a new job and prints `[id] pid` to stderr, as the shell
    /// does the moment a pipeline is sent to the background.
    pub fn add(&mut self, pid: libc::pid_t, pgid: libc::pid_t, pipeline: Pipeline) -> usize {
        let id = self.insert(pid, pgid, pipeline, JobStatus::Running);
        eprintln!("[{id}] {pid}");
        id
    }

    /// Registers a job that is already known to be stopped (e.g. a
    /// foreground pipeline that hit `SIGTSTP` before the shell could wait
    /// on it further). The caller prints its own announcement line, since
    /// "Stopped" uses a different format than the initial "[id] pid".
    pub fn add_with_status(
        &mut self,
        pid: libc::pid_t,
        pgid: libc::pid_t,
        pipeline: Pipeline,
        status: JobStatus,
    ) -> usize {
        self.insert(pid, pgid, pipeline, status)
    }

    fn insert(
        &mut self,
        pid: libc::pid_t,
        pgid: libc::pid_t,
        pipeline: Pipeline,
        status: JobStatus,
    ) -> usize {
        let id = self.next_free_id();
        self.jobs.insert(
            id,
            Job {
                id,
                pid,
                pgid,
                pipeline,
                status,
            },
        );
        id
    }

    /// Non-blocking poll of every tracked job. Prints a completion line
    /// and drops any job that has finished, been killed, or gone missing;
    /// updates the rest in place. Returns `true` if the table changed
    /// shape (so the caller can refresh a job-count-derived prompt).
    pub fn reap(&mut self) -> bool {
        let mut finished = Vec::new();

        for (id, job) in self.jobs.iter_mut() {
            match job_control::poll_pid(job.pid) {
                Ok(Some(WaitOutcome::Exited(code))) => job.status = JobStatus::Done(code),
                Ok(Some(WaitOutcome::Killed(code))) => job.status = JobStatus::Killed(code),
                Ok(Some(WaitOutcome::Stopped)) => job.status = JobStatus::Stopped,
                Ok(Some(WaitOutcome::Continued)) => job.status = JobStatus::Running,
                Ok(Some(WaitOutcome::Gone)) => job.status = JobStatus::Detached,
                Ok(None) => {}
                Err(e) => eprintln!("jsh: error checking job {id}: {e}"),
            }

            if job.status.is_terminal() {
                finished.push(*id);
            }
        }

        for id in &finished {
            if let Some(job) = self.jobs.get(id) {
                eprintln!("{}", job.announce_line());
            }
        }

        let changed = !finished.is_empty();
        for id in finished {
            self.jobs.remove(&id);
        }
        changed
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Job> {
        self.jobs.remove(&id)
    }

    /// All jobs sorted by job ID (ascending), for the `jobs` builtin.
    pub fn jobs_sorted(&self) -> Vec<&Job> {
        let mut list: Vec<&Job> = self.jobs.values().collect();
        list.sort_by_key(|j| j.id);
        list
    }

    /// Job ID of the most recently added job (any status), the `fg`/`bg`
    /// default when no argument is given.
    pub fn most_recent_id(&self) -> Option<usize> {
        self.jobs.keys().copied().max()
    }

    /// Job ID of the most recently added *stopped* job.
    pub fn most_recent_stopped_id(&self) -> Option<usize> {
        self.jobs
            .iter()
            .filter(|(_, j)| j.status == JobStatus::Stopped)
            .map(|(id, _)| *id)
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

impl Drop for JobTable {
    /// Best-effort cleanup on shell exit: nothing waits for these, so a
    /// `SIGTERM` to each job's process group is all the teardown promises.
    fn drop(&mut self) {
        for job in self.jobs.values() {
            unsafe {
                libc::kill(-job.pgid, libc::SIGTERM);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PipelineList;

    fn pipeline(text: &str) -> Pipeline {
        PipelineList::parse(text).unwrap().pipelines.remove(0)
    }

    #[test]
    fn ids_start_at_one() {
        let mut table = JobTable::new();
        let id = table.add(100, 100, pipeline("sleep 1"));
        assert_eq!(id, 1);
    }

    #[test]
    fn ids_fill_the_smallest_gap() {
        let mut table = JobTable::new();
        let a = table.add(100, 100, pipeline("sleep 1"));
        let b = table.add(101, 101, pipeline("sleep 2"));
        let c = table.add(102, 102, pipeline("sleep 3"));
        assert_eq!((a, b, c), (1, 2, 3));

        table.remove(b);
        let d = table.add(103, 103, pipeline("sleep 4"));
        assert_eq!(d, 2, "id 2 should be reused before id 4 is handed out");
    }

    #[test]
    fn jobs_sorted_is_ascending() {
        let mut table = JobTable::new();
        table.add(100, 100, pipeline("a"));
        table.add(101, 101, pipeline("b"));
        let ids: Vec<usize> = table.jobs_sorted().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn most_recent_stopped_ignores_running_jobs() {
        let mut table = JobTable::new();
        table.add(100, 100, pipeline("a"));
        let stopped_id = table.add_with_status(101, 101, pipeline("b"), JobStatus::Stopped);
        assert_eq!(table.most_recent_stopped_id(), Some(stopped_id));
    }
}
