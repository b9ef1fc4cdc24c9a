//! Job registry and claim protocol.
//!
//! One `JobInfo` per key this agent knows about. The head of `pollers` is the
//! agent this process believes is actively polling the key. That belief comes
//! from the order claims were observed here and may differ on other agents.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::error::PollError;
use crate::pool::model::PollEvent;
use crate::pool::options::ProgressCallback;

/// A local caller waiting on a key.
pub(crate) struct LocalWaiter {
    pub(crate) progress: Option<ProgressCallback>,
    completion: oneshot::Sender<Result<PollEvent, PollError>>,
}

impl LocalWaiter {
    pub(crate) fn new(
        progress: Option<ProgressCallback>,
        completion: oneshot::Sender<Result<PollEvent, PollError>>,
    ) -> Self {
        Self {
            progress,
            completion,
        }
    }

    /// Resolve this waiter's completion handle. Consumes the waiter, so it
    /// can only happen once.
    pub(crate) fn complete(self, outcome: Result<PollEvent, PollError>) {
        // The caller may have dropped its handle; nothing to deliver then.
        let _ = self.completion.send(outcome);
    }
}

/// State of one key on this agent.
pub struct JobInfo {
    pub key: String,
    pub(crate) locals: Vec<LocalWaiter>,
    /// Agents in the order their claims were observed here.
    pub pollers: Vec<String>,
}

impl JobInfo {
    fn new(key: &str, poller: &str) -> Self {
        Self {
            key: key.to_string(),
            locals: Vec::new(),
            pollers: vec![poller.to_string()],
        }
    }

    /// The agent this process believes is polling.
    pub fn active_poller(&self) -> Option<&str> {
        self.pollers.first().map(String::as_str)
    }

    /// Number of local callers waiting on this key.
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }
}

/// Outcome of registering a local caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The key was unknown here and a fresh `JobInfo` was created.
    pub created: bool,
    /// This agent heads `pollers`.
    pub active: bool,
}

/// Key → job state for one agent.
pub struct JobRegistry {
    agent: String,
    jobs: HashMap<String, JobInfo>,
}

impl JobRegistry {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            jobs: HashMap::new(),
        }
    }

    /// Record a claim broadcast. Creates a passive entry for an unknown key;
    /// a known key keeps its first-observed order. Returns whether an entry
    /// was created.
    pub fn observe_claim(&mut self, key: &str, agent: &str) -> bool {
        if self.jobs.contains_key(key) {
            return false;
        }
        self.jobs.insert(key.to_string(), JobInfo::new(key, agent));
        true
    }

    /// Add a local caller, creating the entry with this agent as sole poller
    /// when the key is unknown.
    pub(crate) fn register_local(&mut self, key: &str, waiter: LocalWaiter) -> Registration {
        let created = !self.jobs.contains_key(key);
        let agent = &self.agent;
        let info = self
            .jobs
            .entry(key.to_string())
            .or_insert_with(|| JobInfo::new(key, agent));
        info.locals.push(waiter);

        Registration {
            created,
            active: info.active_poller() == Some(self.agent.as_str()),
        }
    }

    /// Progress listeners for a key, in registration order.
    pub(crate) fn progress_listeners(&self, key: &str) -> Vec<ProgressCallback> {
        self.jobs
            .get(key)
            .map(|info| {
                info.locals
                    .iter()
                    .filter_map(|waiter| waiter.progress.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove a key. The returned entry still holds its waiters.
    pub fn finish(&mut self, key: &str) -> Option<JobInfo> {
        self.jobs.remove(key)
    }

    /// Remove every key, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<JobInfo> {
        self.jobs.drain().map(|(_, info)| info).collect()
    }

    pub fn get(&self, key: &str) -> Option<&JobInfo> {
        self.jobs.get(key)
    }

    pub fn active_poller(&self, key: &str) -> Option<&str> {
        self.jobs.get(key).and_then(JobInfo::active_poller)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.jobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::pool::model::PollResult;
    use std::sync::{Arc, Mutex};

    fn waiter() -> (LocalWaiter, oneshot::Receiver<Result<PollEvent, PollError>>) {
        let (tx, rx) = oneshot::channel();
        (LocalWaiter::new(None, tx), rx)
    }

    #[test]
    fn first_local_registration_claims() {
        let mut registry = JobRegistry::new("agent-a");
        let (w, _rx) = waiter();
        let reg = registry.register_local("job", w);
        assert_eq!(
            reg,
            Registration {
                created: true,
                active: true
            }
        );
        assert_eq!(registry.active_poller("job"), Some("agent-a"));
    }

    #[test]
    fn second_local_registration_joins() {
        let mut registry = JobRegistry::new("agent-a");
        let (w1, _rx1) = waiter();
        let (w2, _rx2) = waiter();
        registry.register_local("job", w1);
        let reg = registry.register_local("job", w2);
        assert!(!reg.created);
        assert!(reg.active);
        assert_eq!(registry.get("job").unwrap().local_count(), 2);
    }

    #[test]
    fn observed_claim_makes_agent_passive() {
        let mut registry = JobRegistry::new("agent-b");
        assert!(registry.observe_claim("job", "agent-a"));

        let (w, _rx) = waiter();
        let reg = registry.register_local("job", w);
        assert_eq!(
            reg,
            Registration {
                created: false,
                active: false
            }
        );
        assert_eq!(registry.active_poller("job"), Some("agent-a"));
    }

    #[test]
    fn late_claims_do_not_reorder() {
        let mut registry = JobRegistry::new("agent-a");
        let (w, _rx) = waiter();
        registry.register_local("job", w);

        assert!(!registry.observe_claim("job", "agent-b"));
        assert!(!registry.observe_claim("job", "agent-a"));
        assert_eq!(registry.get("job").unwrap().pollers, vec!["agent-a"]);
    }

    #[test]
    fn finish_removes_key_and_returns_waiters() {
        let mut registry = JobRegistry::new("agent-a");
        let (w, mut rx) = waiter();
        registry.register_local("job", w);

        let info = registry.finish("job").unwrap();
        assert!(!registry.contains("job"));
        assert!(registry.is_empty());

        let event = PollEvent::now("job", PollResult::complete());
        for waiter in info.locals {
            waiter.complete(Ok(event.clone()));
        }
        assert_eq!(rx.try_recv().unwrap().unwrap(), event);
        assert!(registry.finish("job").is_none());
    }

    #[test]
    fn progress_listeners_in_registration_order() {
        let mut registry = JobRegistry::new("agent-a");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = Arc::clone(&seen);
            let (tx, _rx) = oneshot::channel();
            let cb: ProgressCallback =
                Arc::new(move |_: Result<PollEvent, ChannelError>| seen.lock().unwrap().push(label));
            registry.register_local("job", LocalWaiter::new(Some(cb), tx));
        }
        let (silent, _rx) = waiter();
        registry.register_local("job", silent);

        let listeners = registry.progress_listeners("job");
        assert_eq!(listeners.len(), 2);
        let event = PollEvent::now("job", PollResult::reschedule(10));
        for cb in listeners {
            cb(Ok(event.clone()));
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert!(registry.progress_listeners("unknown").is_empty());
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = JobRegistry::new("agent-a");
        registry.observe_claim("one", "agent-x");
        registry.observe_claim("two", "agent-y");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }
}
