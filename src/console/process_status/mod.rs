use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::protocol::{
    AgentIdentity, AgentProcessReport, ProcessState, WorkerProcessReport,
};
use crate::shutdown::ShutdownReceiver;


#[derive(Debug, Clone, Copy)]
pub struct StatusConfig {
    /// Cycles without a report after which an entry is dropped.
    pub purge_after_cycles: NonZeroU32,
}

/// One agent and its workers, workers ordered by number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAndWorkers {
    pub agent: AgentProcessReport,
    pub workers: Vec<WorkerProcessReport>,
}

/// Receives the full process view once per reporting cycle.
pub trait ProcessStatusListener: Send + Sync {
    /// `agents_changed` is set when an agent appeared or was dropped since
    /// the previous cycle.
    fn update(&self, processes: &[AgentAndWorkers], agents_changed: bool);
}

struct Tracked<R> {
    report: R,
    /// Cycles since the last report.
    age: u32,
}

impl<R> Tracked<R> {
    const fn fresh(report: R) -> Self {
        Self { report, age: 0 }
    }
}

struct AgentEntry {
    agent: Tracked<AgentProcessReport>,
    workers: BTreeMap<(u32, String), Tracked<WorkerProcessReport>>,
}

#[derive(Default)]
struct StatusState {
    agents: BTreeMap<String, AgentEntry>,
    agents_changed: bool,
}

/// Latest reported state of every agent and worker.
///
/// Reports are applied as they arrive; the latest report for an identity
/// always wins. Listeners are notified from [`ProcessStatus::update`].
pub struct ProcessStatus {
    config: StatusConfig,
    state: Mutex<StatusState>,
    listeners: Mutex<Vec<Arc<dyn ProcessStatusListener>>>,
}

impl ProcessStatus {
    #[must_use]
    pub fn new(config: StatusConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StatusState::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ProcessStatusListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn add_agent_report(&self, report: AgentProcessReport) {
        let mut state = self.state.lock();
        match state.agents.get_mut(&report.identity.id) {
            Some(entry) => entry.agent = Tracked::fresh(report),
            None => {
                debug!("Agent {} ({}) connected", report.identity.name, report.identity.id);
                state.agents.insert(
                    report.identity.id.clone(),
                    AgentEntry {
                        agent: Tracked::fresh(report),
                        workers: BTreeMap::new(),
                    },
                );
                state.agents_changed = true;
            }
        }
    }

    /// A worker reported before its agent gets a placeholder agent in the
    /// [`ProcessState::Unknown`] state.
    pub fn add_worker_report(&self, report: WorkerProcessReport) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let agent_id = report.identity.agent_id.clone();
        let entry = state.agents.entry(agent_id).or_insert_with_key(|id| {
            state.agents_changed = true;
            AgentEntry {
                agent: Tracked::fresh(AgentProcessReport {
                    identity: AgentIdentity {
                        id: id.clone(),
                        name: id.clone(),
                    },
                    state: ProcessState::Unknown,
                }),
                workers: BTreeMap::new(),
            }
        });
        let key = (report.identity.number, report.identity.name.clone());
        entry.workers.insert(key, Tracked::fresh(report));
    }

    /// Current view without advancing the cycle. Entries that missed the
    /// most recent cycle are shown as [`ProcessState::Unknown`].
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentAndWorkers> {
        build_snapshot(&self.state.lock())
    }

    /// Runs one reporting cycle: drops entries not heard from for
    /// `purge_after_cycles` cycles, notifies every listener, then ages the
    /// remaining entries.
    pub fn update(&self) {
        let purge_after = self.config.purge_after_cycles.get();
        let (snapshot, agents_changed) = {
            let mut state = self.state.lock();
            let agents_before = state.agents.len();
            state.agents.retain(|_, entry| {
                entry.workers.retain(|_, worker| worker.age < purge_after);
                entry.agent.age < purge_after || !entry.workers.is_empty()
            });
            if state.agents.len() != agents_before {
                state.agents_changed = true;
            }

            let snapshot = build_snapshot(&state);
            for entry in state.agents.values_mut() {
                entry.agent.age = entry.agent.age.saturating_add(1);
                for worker in entry.workers.values_mut() {
                    worker.age = worker.age.saturating_add(1);
                }
            }
            let agents_changed = std::mem::take(&mut state.agents_changed);
            (snapshot, agents_changed)
        };

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.update(&snapshot, agents_changed);
        }
    }

    /// Calls [`Self::update`] every `interval` until `shutdown` fires.
    #[must_use]
    pub fn spawn_updates(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: ShutdownReceiver,
    ) -> JoinHandle<()> {
        let status = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => status.update(),
                }
            }
        })
    }
}

fn shown<R: Clone>(tracked: &Tracked<R>, state_of: impl FnOnce(&mut R) -> &mut ProcessState) -> R {
    let mut report = tracked.report.clone();
    if tracked.age > 0 {
        *state_of(&mut report) = ProcessState::Unknown;
    }
    report
}

fn build_snapshot(state: &StatusState) -> Vec<AgentAndWorkers> {
    let mut processes: Vec<AgentAndWorkers> = state
        .agents
        .values()
        .map(|entry| AgentAndWorkers {
            agent: shown(&entry.agent, |report| &mut report.state),
            workers: entry
                .workers
                .values()
                .map(|worker| shown(worker, |report| &mut report.state))
                .collect(),
        })
        .collect();
    processes.sort_by(|left, right| {
        (&left.agent.identity.name, &left.agent.identity.id)
            .cmp(&(&right.agent.identity.name, &right.agent.identity.id))
    });
    processes
}
