//! Concurrent simulation over a fixed pool of worker threads.
//!
//! Nodes are handed out in depth order. A worker that picks up a node
//! blocks until the ancestor's language has been published, evolves a
//! copy of it along the branch, publishes the result and appends it to
//! the output. Because every node draws from its own seeded stream, the
//! outcome is identical to the sequential driver, whatever the number of
//! workers or the order in which nodes finish.
//!
//! The same machinery resumes interrupted runs: languages recovered from
//! a partial output are published up front and only the missing nodes are
//! computed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use super::driver::evolve_branch;
use super::language::Language;
use super::network::SemanticNetwork;
use super::phylogeny::{NodeId, Phylogeny};
use crate::error::{SimulationError, WordlistError};
use crate::io::wordlist::{group_languages, LanguageSink, Wordlist, WordlistRecord};

/// Key of an entry in [`GeneratedLanguages`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LanguageKey {
    /// The language the root branch starts from.
    Origin,
    Node(String),
}

impl LanguageKey {
    fn describe(&self) -> &str {
        match self {
            LanguageKey::Origin => "<origin>",
            LanguageKey::Node(name) => name,
        }
    }
}

/// Why a wait for a language ended without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Aborted,
}

/// Completed languages by node name. Entries are only ever added, never
/// replaced or removed.
#[derive(Default)]
pub struct GeneratedLanguages {
    entries: Mutex<HashMap<LanguageKey, Arc<Language>>>,
    published: Condvar,
    aborted: AtomicBool,
}

impl GeneratedLanguages {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding only the origin language, ready for a fresh run.
    pub fn with_origin(language: Language) -> Self {
        let generated = Self::new();
        generated
            .entries
            .lock()
            .insert(LanguageKey::Origin, Arc::new(language));
        generated
    }

    /// Rebuilds the map from a previous run's output. Every language in
    /// the table must name a node of `tree`. A node whose rows were cut
    /// off is left out, so it is computed again.
    pub fn from_wordlist(
        wordlist: &Wordlist,
        network: &Arc<SemanticNetwork>,
        tree: &Phylogeny,
    ) -> Result<Self, WordlistError> {
        let names = tree.names();
        if let Some(unknown) = wordlist.languages().find(|name| !names.contains(name)) {
            return Err(WordlistError::UnknownLanguage(unknown.to_string()));
        }
        wordlist.check_resumable()?;
        if let Some(name) = wordlist.interrupted() {
            warn!(node = name, "discarding unfinished node from previous run");
        }

        let records: Vec<WordlistRecord> = wordlist.completed_records().cloned().collect();
        if let Some(record) = records.iter().find(|record| record.weight.is_none()) {
            return Err(WordlistError::Malformed {
                line: record.line,
                message: "simulation output must carry a weight for every record".to_string(),
            });
        }
        let generated = Self::new();
        {
            let mut entries = generated.entries.lock();
            for (name, language) in group_languages(&records, network, || 0)? {
                entries.insert(LanguageKey::Node(name), Arc::new(language));
            }
            info!(languages = entries.len(), "recovered generated languages");
        }
        Ok(generated)
    }

    /// Sets the origin language unless one is already present.
    pub fn set_origin(&self, language: Language) {
        self.entries
            .lock()
            .entry(LanguageKey::Origin)
            .or_insert_with(|| Arc::new(language));
    }

    /// Inserts the language for `name` and wakes every waiting worker.
    pub fn publish(&self, name: &str, language: Language) -> Result<Arc<Language>, SimulationError> {
        let key = LanguageKey::Node(name.to_string());
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return Err(SimulationError::DuplicatePublish(name.to_string()));
        }
        let language = Arc::new(language);
        entries.insert(key, Arc::clone(&language));
        drop(entries);
        self.published.notify_all();
        Ok(language)
    }

    pub fn get(&self, key: &LanguageKey) -> Option<Arc<Language>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .contains_key(&LanguageKey::Node(name.to_string()))
    }

    fn contains_key(&self, key: &LanguageKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of published node languages, not counting the origin.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .keys()
            .filter(|key| matches!(key, LanguageKey::Node(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until `key` has a language, the timeout passes, or the run
    /// is aborted.
    pub fn wait_for(
        &self,
        key: &LanguageKey,
        timeout: Option<Duration>,
    ) -> Result<Arc<Language>, WaitError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut entries = self.entries.lock();
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                return Err(WaitError::Aborted);
            }
            if let Some(language) = entries.get(key) {
                return Ok(Arc::clone(language));
            }
            match deadline {
                Some(deadline) => {
                    if self.published.wait_until(&mut entries, deadline).timed_out() {
                        return entries
                            .get(key)
                            .cloned()
                            .ok_or(WaitError::TimedOut);
                    }
                }
                None => self.published.wait(&mut entries),
            }
        }
    }

    /// Wakes all waiters and makes further waits fail.
    pub fn abort(&self) {
        let _entries = self.entries.lock();
        self.aborted.store(true, Ordering::SeqCst);
        self.published.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Initialized,
    Dispatching,
    Draining,
    Complete,
}

/// Aborts the run if the owning worker unwinds, so dependents never block
/// on a language that will not arrive.
struct AbortOnPanic<'a>(&'a GeneratedLanguages);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

type NodeResult = Result<(String, Arc<Language>), SimulationError>;

/// Runs simulations on a fixed number of worker threads.
#[derive(Debug, Clone)]
pub struct Coordinator {
    workers: usize,
    seed: u64,
    ancestor_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(workers: usize, seed: u64) -> Self {
        Coordinator {
            workers: workers.max(1),
            seed,
            ancestor_timeout: None,
        }
    }

    pub fn with_ancestor_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ancestor_timeout = timeout;
        self
    }

    /// Simulates `language` down the whole tree.
    pub fn simulate(
        &self,
        tree: &Phylogeny,
        language: Language,
        sink: Option<&mut dyn LanguageSink>,
    ) -> Result<Vec<(String, Arc<Language>)>, SimulationError> {
        let generated = GeneratedLanguages::with_origin(language);
        self.simulate_remainder(tree, &generated, sink)
    }

    /// Computes every node of `tree` that `generated` does not hold yet.
    ///
    /// Languages already present are returned first, in depth order, and
    /// are not written to `sink` again. The remaining nodes follow in
    /// completion order.
    pub fn simulate_remainder(
        &self,
        tree: &Phylogeny,
        generated: &GeneratedLanguages,
        sink: Option<&mut dyn LanguageSink>,
    ) -> Result<Vec<(String, Arc<Language>)>, SimulationError> {
        debug!(phase = ?RunPhase::Initialized, "coordinator");
        tree.validate_names()?;

        let mut results = Vec::new();
        let mut pending = Vec::new();
        for (id, _) in tree.depth_order() {
            let name = node_name(tree, id)?;
            match generated.get(&LanguageKey::Node(name.to_string())) {
                Some(language) => results.push((name.to_string(), language)),
                None => pending.push(id),
            }
        }
        self.check_closure(tree, generated, &pending)?;

        info!(
            generated = results.len(),
            pending = pending.len(),
            workers = self.workers,
            seed = self.seed,
            "starting concurrent simulation"
        );
        if pending.is_empty() {
            debug!(phase = ?RunPhase::Complete, "coordinator");
            return Ok(results);
        }

        let output = Mutex::new(sink);
        let (job_tx, job_rx) = unbounded::<NodeId>();
        let (result_tx, result_rx) = unbounded::<NodeResult>();

        debug!(phase = ?RunPhase::Dispatching, "coordinator");
        for &id in &pending {
            // The receiver lives until the end of this function.
            let _ = job_tx.send(id);
        }
        drop(job_tx);

        let mut first_error = None;
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers.min(pending.len()))
                .map(|worker| {
                    let jobs = job_rx.clone();
                    let replies = result_tx.clone();
                    let output = &output;
                    scope.spawn(move || {
                        let _guard = AbortOnPanic(generated);
                        while let Ok(id) = jobs.recv() {
                            if generated.is_aborted() {
                                break;
                            }
                            let result = self.compute_node(tree, id, generated, output);
                            let failed = result.is_err();
                            if failed {
                                generated.abort();
                            }
                            if replies.send(result).is_err() || failed {
                                break;
                            }
                        }
                        trace!(worker, "worker finished");
                    })
                })
                .collect();
            drop(result_tx);

            debug!(phase = ?RunPhase::Draining, "coordinator");
            for result in result_rx.iter() {
                match result {
                    Ok(entry) => results.push(entry),
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            for handle in handles {
                if handle.join().is_err() && first_error.is_none() {
                    first_error = Some(SimulationError::WorkerPanicked);
                }
            }
        });

        if let Some(err) = first_error {
            warn!(error = %err, "concurrent simulation failed");
            return Err(err);
        }
        debug!(phase = ?RunPhase::Complete, "coordinator");
        info!(languages = results.len(), "concurrent simulation finished");
        Ok(results)
    }

    /// Every pending node's ancestor must be published already or pending
    /// itself; otherwise its worker would wait forever.
    fn check_closure(
        &self,
        tree: &Phylogeny,
        generated: &GeneratedLanguages,
        pending: &[NodeId],
    ) -> Result<(), SimulationError> {
        let scheduled: HashSet<NodeId> = pending.iter().copied().collect();
        for &id in pending {
            let ancestor = tree.node(id).ancestor;
            if ancestor.is_some_and(|ancestor| scheduled.contains(&ancestor)) {
                continue;
            }
            let key = ancestor_key(tree, id)?;
            if !generated.contains_key(&key) {
                return Err(SimulationError::MissingAncestor {
                    node: node_name(tree, id)?.to_string(),
                    ancestor: key.describe().to_string(),
                });
            }
        }
        Ok(())
    }

    fn compute_node(
        &self,
        tree: &Phylogeny,
        id: NodeId,
        generated: &GeneratedLanguages,
        output: &Mutex<Option<&mut dyn LanguageSink>>,
    ) -> NodeResult {
        let node = tree.node(id);
        let name = node_name(tree, id)?;
        let key = ancestor_key(tree, id)?;

        trace!(node = name, ancestor = key.describe(), "waiting for ancestor");
        let start = generated
            .wait_for(&key, self.ancestor_timeout)
            .map_err(|err| match err {
                WaitError::Aborted => SimulationError::Aborted,
                WaitError::TimedOut => SimulationError::AncestorTimeout {
                    node: name.to_string(),
                    ancestor: key.describe().to_string(),
                    waited: self.ancestor_timeout.unwrap_or_default(),
                },
            })?;
        if generated.contains(name) {
            return Err(SimulationError::DuplicatePublish(name.to_string()));
        }

        trace!(node = name, steps = node.steps(), "computing");
        let mut language = Language::clone(&start);
        evolve_branch(&mut language, name, node.steps(), self.seed)?;
        let language = generated.publish(name, language)?;

        if let Some(sink) = output.lock().as_mut() {
            sink.write_language(name, &language)?;
        }
        debug!(node = name, "published language");
        Ok((name.to_string(), language))
    }
}

fn node_name(tree: &Phylogeny, id: NodeId) -> Result<&str, SimulationError> {
    tree.node(id)
        .name()
        .ok_or_else(|| SimulationError::UnnamedNode(format!("node {}", id.index())))
}

fn ancestor_key(tree: &Phylogeny, id: NodeId) -> Result<LanguageKey, SimulationError> {
    match tree.node(id).ancestor {
        None => Ok(LanguageKey::Origin),
        Some(ancestor) => Ok(LanguageKey::Node(node_name(tree, ancestor)?.to_string())),
    }
}
