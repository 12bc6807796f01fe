/*
 * Runs classification walks on a single background worker thread. Jobs are executed
 * strictly one after another in submission order, which keeps disk access
 * sequential and guarantees that registry updates from different rules never
 * interleave.
 *
 * Each job moves through `Queued -> Running -> Done`, or ends in `Cancelled` when it
 * is cancelled while queued or running. Subscribers are notified on every transition;
 * intermediate walk progress goes through the visitor's own event channel instead.
 */
use crate::core::events::{SubscriptionId, Subscribers};
use crate::core::path_state::RuleId;
use crate::core::visitor::SharedVisitor;
use crate::core::walker::{CancelToken, WalkOutcome, walk_selection};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    NotSubmitted,
    Queued,
    Running,
    Done,
    Cancelled,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        matches!(self, JobState::Done | JobState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStateChange {
    pub rule: RuleId,
    pub state: JobState,
}

struct Job {
    rule: RuleId,
    selection: Vec<PathBuf>,
    visitor: SharedVisitor,
    cancel: CancelToken,
}

#[derive(Debug)]
struct JobEntry {
    state: JobState,
    started: bool,
    cancel: CancelToken,
    outcome: Option<WalkOutcome>,
}

#[derive(Default)]
struct SchedulerShared {
    jobs: Mutex<HashMap<RuleId, JobEntry>>,
    changed: Condvar,
    events: Subscribers<JobStateChange>,
}

impl SchedulerShared {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<RuleId, JobEntry>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /*
     * Moves `rule` to `to` if its current state is one of `from`. Subscribers are
     * notified after the lock is released. Returns whether the transition happened.
     */
    fn transition(&self, rule: RuleId, from: &[JobState], to: JobState) -> bool {
        {
            let mut jobs = self.lock_jobs();
            let Some(entry) = jobs.get_mut(&rule) else {
                return false;
            };
            if !from.contains(&entry.state) {
                return false;
            }
            log::debug!("VisitorScheduler: {rule} {:?} -> {to:?}", entry.state);
            entry.state = to;
            entry.started |= to == JobState::Running;
        }
        self.changed.notify_all();
        self.events.notify(&JobStateChange { rule, state: to });
        true
    }
}

pub struct VisitorScheduler {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<SchedulerShared>,
}

impl VisitorScheduler {
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let shared = Arc::new(SchedulerShared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("visitor-scheduler".to_string())
            .spawn(move || run_worker(receiver, worker_shared))?;
        log::debug!("VisitorScheduler: Worker thread started.");
        Ok(VisitorScheduler {
            sender: Some(sender),
            worker: Some(worker),
            shared,
        })
    }

    /* Queues a walk of `selection` with `visitor` and returns immediately. */
    pub fn submit(&self, selection: Vec<PathBuf>, visitor: SharedVisitor) -> RuleId {
        let rule = visitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .id();
        let cancel = CancelToken::new();
        self.shared.lock_jobs().insert(
            rule,
            JobEntry {
                state: JobState::NotSubmitted,
                started: false,
                cancel: cancel.clone(),
                outcome: None,
            },
        );
        self.shared
            .transition(rule, &[JobState::NotSubmitted], JobState::Queued);

        let job = Job {
            rule,
            selection,
            visitor,
            cancel,
        };
        let sent = match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            log::error!("VisitorScheduler: Worker is gone, {rule} cannot run.");
            self.shared
                .transition(rule, &[JobState::Queued], JobState::Cancelled);
        }
        rule
    }

    /* Cancels a queued or running job. Returns false for any other state. */
    pub fn cancel(&self, rule: RuleId) -> bool {
        let token = match self.shared.lock_jobs().get(&rule) {
            Some(entry) if matches!(entry.state, JobState::Queued | JobState::Running) => {
                entry.cancel.clone()
            }
            _ => return false,
        };
        token.cancel();
        self.shared.transition(
            rule,
            &[JobState::Queued, JobState::Running],
            JobState::Cancelled,
        )
    }

    pub fn state_of(&self, rule: RuleId) -> JobState {
        self.shared
            .lock_jobs()
            .get(&rule)
            .map(|entry| entry.state)
            .unwrap_or(JobState::NotSubmitted)
    }

    /* The walk report of a finished job, if it ran. */
    pub fn outcome_of(&self, rule: RuleId) -> Option<WalkOutcome> {
        self.shared
            .lock_jobs()
            .get(&rule)
            .and_then(|entry| entry.outcome.clone())
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&JobStateChange) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /*
     * Blocks until `rule` is finished or `timeout` elapses. A job cancelled while
     * running counts as finished once its walk has actually stopped. Returns the state
     * observed last.
     */
    pub fn wait_for(&self, rule: RuleId, timeout: Duration) -> JobState {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.shared.lock_jobs();
        loop {
            let (state, settled) = match jobs.get(&rule) {
                Some(entry) => (
                    entry.state,
                    entry.state == JobState::Done
                        || (entry.state == JobState::Cancelled
                            && (!entry.started || entry.outcome.is_some())),
                ),
                None => (JobState::NotSubmitted, true),
            };
            let now = Instant::now();
            if settled || now >= deadline {
                return state;
            }
            jobs = match self.shared.changed.wait_timeout(jobs, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /* Waits until no job is queued or running. */
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.shared.lock_jobs();
        loop {
            let busy = jobs.values().any(|entry| match entry.state {
                JobState::Queued | JobState::Running => true,
                JobState::Cancelled => entry.started && entry.outcome.is_none(),
                _ => false,
            });
            let now = Instant::now();
            if !busy {
                return true;
            }
            if now >= deadline {
                return false;
            }
            jobs = match self.shared.changed.wait_timeout(jobs, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Drop for VisitorScheduler {
    fn drop(&mut self) {
        let pending: Vec<RuleId> = self
            .shared
            .lock_jobs()
            .iter()
            .filter(|(_, entry)| matches!(entry.state, JobState::Queued | JobState::Running))
            .map(|(rule, _)| *rule)
            .collect();
        for rule in pending {
            self.cancel(rule);
        }
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("VisitorScheduler: Worker thread panicked.");
            }
        }
        log::debug!("VisitorScheduler: Worker thread stopped.");
    }
}

fn run_worker(receiver: Receiver<Job>, shared: Arc<SchedulerShared>) {
    for job in receiver {
        if !shared.transition(job.rule, &[JobState::Queued], JobState::Running) {
            log::debug!("VisitorScheduler: Skipping {} (no longer queued).", job.rule);
            continue;
        }
        log::debug!(
            "VisitorScheduler: Running {} over {} path(s).",
            job.rule,
            job.selection.len()
        );
        let outcome = walk_selection(&job.selection, &job.visitor, &job.cancel);
        let cancelled = outcome.cancelled;
        if let Some(entry) = shared.lock_jobs().get_mut(&job.rule) {
            entry.outcome = Some(outcome);
        }
        let final_state = if cancelled {
            JobState::Cancelled
        } else {
            JobState::Done
        };
        if !shared.transition(job.rule, &[JobState::Running], final_state) {
            // Already moved to Cancelled by `cancel`; wake waiters for the stored outcome.
            shared.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::content_filter::ContentFilter;
    use crate::core::ignore_rules::IgnoreRules;
    use crate::core::path_state::PathStateRegistry;
    use crate::core::visitor::{
        ClassificationKind, ClassificationVisitor, MIN_PROGRESS_INTERVAL, PerFileVisitor,
        VisitAction, VisitorCore, WholeSelectionVisitor, create_visitor,
    };
    use rand::Rng;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(20);

    fn new_visitor(
        kind: ClassificationKind,
        registry: &PathStateRegistry,
        selection: &[PathBuf],
    ) -> SharedVisitor {
        let filter = ContentFilter::for_selection(registry, &IgnoreRules::new(), selection);
        create_visitor(
            kind,
            VisitorCore::new(filter, registry.clone(), None, MIN_PROGRESS_INTERVAL),
        )
    }

    fn populate(base: &Path, dirs: usize, files_per_dir: usize) -> io::Result<()> {
        for d in 0..dirs {
            let dir = base.join(format!("d{d:03}"));
            fs::create_dir_all(&dir)?;
            for f in 0..files_per_dir {
                fs::write(dir.join(format!("f{f:03}.txt")), "x")?;
            }
        }
        Ok(())
    }

    #[test]
    fn test_unknown_job_is_not_submitted() {
        let scheduler = VisitorScheduler::new().unwrap();
        assert_eq!(scheduler.state_of(RuleId(u64::MAX)), JobState::NotSubmitted);
        assert!(!scheduler.cancel(RuleId(u64::MAX)));
    }

    #[test]
    fn test_submitted_job_runs_to_done() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        populate(dir.path(), 2, 3)?;
        let registry = PathStateRegistry::new();
        let selection = vec![dir.path().to_path_buf()];
        let scheduler = VisitorScheduler::new()?;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        scheduler.subscribe(move |change| seen_cb.lock().unwrap().push(change.state));

        // Act
        let visitor = new_visitor(ClassificationKind::PerFile, &registry, &selection);
        let rule = scheduler.submit(selection, Arc::clone(&visitor));
        let state = scheduler.wait_for(rule, WAIT);

        // Assert
        assert_eq!(state, JobState::Done);
        assert_eq!(visitor.lock().unwrap().count(), 6);
        assert_eq!(scheduler.outcome_of(rule).unwrap().files_visited, 6);
        assert!(!scheduler.cancel(rule), "Finished jobs cannot be cancelled");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![JobState::Queued, JobState::Running, JobState::Done]
        );
        Ok(())
    }

    #[test]
    fn test_cancel_queued_job_never_runs() -> io::Result<()> {
        let dir = tempdir()?;
        populate(dir.path(), 40, 25)?;
        let registry = PathStateRegistry::new();
        let scheduler = VisitorScheduler::new()?;
        let blocker_sel = vec![dir.path().to_path_buf()];
        let blocker_visitor =
            new_visitor(ClassificationKind::WholeSelection, &registry, &blocker_sel);
        let blocker = scheduler.submit(blocker_sel.clone(), Arc::clone(&blocker_visitor));
        // Holding the visitor stalls the worker at its next callback.
        let stall = blocker_visitor.lock().unwrap();
        let queued_visitor =
            new_visitor(ClassificationKind::PerFile, &PathStateRegistry::new(), &blocker_sel);
        let queued = scheduler.submit(blocker_sel, Arc::clone(&queued_visitor));

        let cancelled = scheduler.cancel(queued);

        assert!(cancelled);
        assert_eq!(scheduler.state_of(queued), JobState::Cancelled);
        drop(stall);
        assert_eq!(scheduler.wait_for(blocker, WAIT), JobState::Done);
        assert!(scheduler.wait_idle(WAIT));
        assert_eq!(scheduler.state_of(queued), JobState::Cancelled);
        assert_eq!(queued_visitor.lock().unwrap().count(), 0);
        assert!(scheduler.outcome_of(queued).is_none());
        Ok(())
    }

    /* Pauses the walk inside the first file callback until the test releases it. */
    struct GatedVisitor<V> {
        inner: V,
        reached: Option<Sender<()>>,
        release: Receiver<()>,
    }

    impl<V: ClassificationVisitor> ClassificationVisitor for GatedVisitor<V> {
        fn core(&self) -> &VisitorCore {
            self.inner.core()
        }

        fn core_mut(&mut self) -> &mut VisitorCore {
            self.inner.core_mut()
        }

        fn pre_visit_directory(&mut self, path: &Path) -> VisitAction {
            self.inner.pre_visit_directory(path)
        }

        fn post_visit_directory(&mut self, path: &Path) {
            self.inner.post_visit_directory(path);
        }

        fn visit_file(&mut self, path: &Path) {
            self.inner.visit_file(path);
            if let Some(reached) = self.reached.take() {
                reached.send(()).unwrap();
                self.release.recv().unwrap();
            }
        }

        fn end(&mut self) {
            self.inner.end();
        }
    }

    /*
     * Submits `inner` over a small tree, cancels the job while its walk is paused on
     * the first file, then lets the walk continue.
     */
    fn cancel_while_running<V>(
        build: impl FnOnce(VisitorCore) -> V,
    ) -> io::Result<(SharedVisitor, JobState, WalkOutcome)>
    where
        V: ClassificationVisitor + 'static,
    {
        let dir = tempdir()?;
        populate(dir.path(), 1, 5)?;
        let selection = vec![dir.path().to_path_buf()];
        let registry = PathStateRegistry::new();
        let filter = ContentFilter::for_selection(&registry, &IgnoreRules::new(), &selection);
        let core = VisitorCore::new(filter, registry, None, MIN_PROGRESS_INTERVAL);
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let visitor: SharedVisitor = Arc::new(Mutex::new(GatedVisitor {
            inner: build(core),
            reached: Some(reached_tx),
            release: release_rx,
        }));
        let scheduler = VisitorScheduler::new()?;
        let rule = scheduler.submit(selection, Arc::clone(&visitor));

        reached_rx.recv_timeout(WAIT).unwrap();
        let paused_state = scheduler.state_of(rule);
        let cancelled = scheduler.cancel(rule);
        release_tx.send(()).unwrap();
        assert_eq!(paused_state, JobState::Running);
        assert!(cancelled);
        let state = scheduler.wait_for(rule, WAIT);
        let outcome = scheduler.outcome_of(rule).unwrap();
        Ok((visitor, state, outcome))
    }

    #[test]
    fn test_cancel_running_per_file_job_keeps_emitted_previews() -> io::Result<()> {
        let (visitor, state, outcome) = cancel_while_running(PerFileVisitor::new)?;

        assert_eq!(state, JobState::Cancelled);
        assert!(outcome.cancelled);
        assert_eq!(outcome.files_visited, 1, "The walk stops at the next entry");
        let mut guard = visitor.lock().unwrap();
        assert!(!guard.is_ended());
        let previews = guard.drain_available();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].name(), "f000.txt");
        Ok(())
    }

    #[test]
    fn test_cancel_running_whole_selection_job_emits_nothing() -> io::Result<()> {
        let (visitor, state, outcome) = cancel_while_running(WholeSelectionVisitor::new)?;

        assert_eq!(state, JobState::Cancelled);
        assert!(outcome.cancelled);
        let guard = visitor.lock().unwrap();
        assert!(!guard.is_ended());
        assert_eq!(guard.count(), 0);
        Ok(())
    }

    #[test]
    fn test_at_most_one_job_running_at_any_time() -> io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        populate(dir.path(), 6, 10)?;
        let scheduler = VisitorScheduler::new()?;
        let max_concurrent = Arc::new(Mutex::new(0usize));
        let max_cb = Arc::clone(&max_concurrent);
        let shared = Arc::clone(&scheduler.shared);
        scheduler.subscribe(move |_| {
            let running = shared
                .lock_jobs()
                .values()
                .filter(|entry| entry.state == JobState::Running)
                .count();
            let mut max = max_cb.lock().unwrap();
            *max = (*max).max(running);
        });
        let mut rng = rand::rng();
        let subdirs: Vec<PathBuf> = (0..6).map(|d| dir.path().join(format!("d{d:03}"))).collect();

        // Act
        let mut rules = Vec::new();
        for _ in 0..12 {
            let pick = subdirs[rng.random_range(0..subdirs.len())].clone();
            let kind = match rng.random_range(0..3) {
                0 => ClassificationKind::PerFile,
                1 => ClassificationKind::WholeSelection,
                _ => ClassificationKind::PerFolder { max_level: 2 },
            };
            let selection = vec![pick];
            let visitor = new_visitor(kind, &PathStateRegistry::new(), &selection);
            rules.push(scheduler.submit(selection, visitor));
            if rng.random_bool(0.3) {
                scheduler.cancel(rules[rng.random_range(0..rules.len())]);
            }
            let sampled = rules
                .iter()
                .filter(|r| scheduler.state_of(**r) == JobState::Running)
                .count();
            assert!(sampled <= 1, "Sampled {sampled} running jobs");
        }

        // Assert
        assert!(scheduler.wait_idle(WAIT));
        assert!(*max_concurrent.lock().unwrap() <= 1);
        for rule in rules {
            assert!(scheduler.state_of(rule).is_finished());
        }
        Ok(())
    }

    #[test]
    fn test_jobs_complete_in_submission_order() -> io::Result<()> {
        let dir = tempdir()?;
        populate(dir.path(), 3, 2)?;
        let scheduler = VisitorScheduler::new()?;
        let finished = Arc::new(Mutex::new(Vec::new()));
        let finished_cb = Arc::clone(&finished);
        scheduler.subscribe(move |change| {
            if change.state == JobState::Done {
                finished_cb.lock().unwrap().push(change.rule);
            }
        });

        let mut rules = Vec::new();
        for d in 0..3 {
            let selection = vec![dir.path().join(format!("d{d:03}"))];
            let visitor =
                new_visitor(ClassificationKind::PerFile, &PathStateRegistry::new(), &selection);
            rules.push(scheduler.submit(selection, visitor));
        }
        assert!(scheduler.wait_idle(WAIT));

        assert_eq!(*finished.lock().unwrap(), rules);
        Ok(())
    }
}
