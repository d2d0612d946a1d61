use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use tracing::{debug, warn};

use crate::execute::{ExecModel, ExecuteOptions, execute};
use crate::parse::parse;
use crate::types::{Binding, DataContext, EngineError, KnowledgeBase};

/// One pooled `(knowledge base, data context)` pair. The knowledge base is
/// immutable once built; updates swap a slot's instance wholesale, so an
/// execution that is already in flight keeps the pre-update rules.
struct Instance {
    kb: KnowledgeBase,
    dc: DataContext,
}

/// A fixed set of independently parsed engine instances, so concurrent
/// callers never share mutable state and never pay parser cost per request.
///
/// `min` core instances and `max - min` overflow instances are built
/// eagerly from the same source. Rule sets can be replaced, patched
/// incrementally, or cleared at runtime; updates are serialized by a single
/// writer and never interrupt executions already holding an instance.
pub struct RulePool {
    slots: Vec<RwLock<Arc<Instance>>>,
    core_tx: Sender<usize>,
    core_rx: Receiver<usize>,
    overflow_tx: Sender<usize>,
    overflow_rx: Receiver<usize>,
    /// Parsed once more than the slots; answers `exists` and `count`.
    authoritative: RwLock<KnowledgeBase>,
    model: RwLock<ExecModel>,
    cleared: AtomicBool,
    update_lock: Mutex<()>,
    host_bindings: Vec<(String, Binding)>,
    min: usize,
}

impl RulePool {
    /// Build a pool of `max` instances from the given source, of which
    /// `min` are core and the rest overflow. The host bindings are
    /// installed into every instance's data context and persist across
    /// updates for the pool's lifetime.
    ///
    /// An empty source is accepted and behaves like a cleared pool until
    /// the first update.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `1 <= min < max`, and parse
    /// errors from any of the per-instance builds.
    pub fn new(
        min: usize,
        max: usize,
        model: ExecModel,
        source: &str,
        host_bindings: Vec<(String, Binding)>,
    ) -> Result<Self, EngineError> {
        if min < 1 || max <= min {
            return Err(EngineError::Config {
                reason: format!(
                    "pool sizes must satisfy 1 <= min < max, got min={min} max={max}"
                ),
            });
        }
        let authoritative = parse(source)?;
        if authoritative.is_empty() {
            debug!("pool built from an empty rule source");
        }
        let mut slots = Vec::with_capacity(max);
        for _ in 0..max {
            slots.push(RwLock::new(Arc::new(build_instance(
                source,
                &host_bindings,
            )?)));
        }
        let (core_tx, core_rx) = bounded(max);
        let (overflow_tx, overflow_rx) = bounded(max);
        for tag in 0..min {
            core_tx.send(tag).expect("fresh pool channel");
        }
        for tag in min..max {
            overflow_tx.send(tag).expect("fresh pool channel");
        }
        Ok(RulePool {
            slots,
            core_tx,
            core_rx,
            overflow_tx,
            overflow_rx,
            authoritative: RwLock::new(authoritative),
            model: RwLock::new(model),
            cleared: AtomicBool::new(false),
            update_lock: Mutex::new(()),
            host_bindings,
            min,
        })
    }

    /// Run the pooled rules against one request.
    ///
    /// The bundle's bindings are injected into the acquired instance for
    /// the duration of the call and removed again afterwards, success or
    /// error; bindings with an empty name are dropped with a warning. A
    /// cleared pool returns success without evaluating anything.
    ///
    /// # Errors
    ///
    /// Propagates rule failures per the configured model; see
    /// [`ExecuteOptions`].
    pub fn execute(
        &self,
        bundle: &HashMap<String, Binding>,
        opts: &ExecuteOptions,
    ) -> Result<(), EngineError> {
        if self.cleared.load(Ordering::Acquire) {
            debug!("pool is cleared; execute is a no-op");
            return Ok(());
        }
        let (tag, instance) = self.acquire();
        let mut injected = Vec::with_capacity(bundle.len());
        for (name, binding) in bundle {
            if name.is_empty() {
                warn!("dropping injected binding with an empty name");
                continue;
            }
            instance.dc.add(name.clone(), binding.clone());
            injected.push(name.as_str());
        }
        let model = *self.model.read().expect("model lock");
        let result = execute(&instance.kb, &instance.dc, model, opts);
        instance.dc.del(injected);
        self.release(tag);
        result
    }

    /// Replace every instance's rules with a fresh parse of `source`.
    ///
    /// The source is parsed once per instance plus once for the
    /// authoritative copy. In-flight executions keep the instance they
    /// hold; new acquirers see the replacement.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRules`] when the source parses to zero
    /// rules (use [`clear`](Self::clear) for that), or the batched parse
    /// errors.
    pub fn update_full(&self, source: &str) -> Result<(), EngineError> {
        let _guard = self.update_lock.lock().expect("update lock");
        let fresh = parse(source)?;
        if fresh.is_empty() {
            return Err(EngineError::NoRules);
        }
        let mut replacements = Vec::with_capacity(self.slots.len());
        for _ in &self.slots {
            replacements.push(build_instance(source, &self.host_bindings)?);
        }
        for (slot, instance) in self.slots.iter().zip(replacements) {
            *slot.write().expect("slot lock") = Arc::new(instance);
        }
        debug!(rules = fresh.count(), "replaced pooled rule sets");
        *self.authoritative.write().expect("authoritative lock") = fresh;
        self.cleared.store(false, Ordering::Release);
        Ok(())
    }

    /// Merge the rules of `source` into every instance's existing rules.
    ///
    /// A rule whose name already exists is replaced, re-sorted by its new
    /// salience; a new name is inserted. Rules not mentioned are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRules`] for a patch with no rules, or the
    /// batched parse errors.
    pub fn update_incremental(&self, source: &str) -> Result<(), EngineError> {
        let _guard = self.update_lock.lock().expect("update lock");
        let patch = parse(source)?;
        if patch.is_empty() {
            return Err(EngineError::NoRules);
        }
        {
            let mut auth = self.authoritative.write().expect("authoritative lock");
            merge(&mut auth, &patch);
        }
        for slot in &self.slots {
            let per_instance = parse(source)?;
            let current = slot.read().expect("slot lock").clone();
            let mut kb = current.kb.clone();
            merge(&mut kb, &per_instance);
            *slot.write().expect("slot lock") = Arc::new(Instance {
                kb,
                dc: current.dc.clone(),
            });
        }
        debug!(rules = patch.count(), "merged rules into pooled rule sets");
        self.cleared.store(false, Ordering::Release);
        Ok(())
    }

    /// Empty every instance's rules. Until the next update, every
    /// [`execute`](Self::execute) call succeeds without side effects.
    pub fn clear(&self) {
        let _guard = self.update_lock.lock().expect("update lock");
        self.authoritative
            .write()
            .expect("authoritative lock")
            .clear();
        for slot in &self.slots {
            let current = slot.read().expect("slot lock").clone();
            *slot.write().expect("slot lock") = Arc::new(Instance {
                kb: KnowledgeBase::new(),
                dc: current.dc.clone(),
            });
        }
        self.cleared.store(true, Ordering::Release);
        debug!("cleared all pooled rules");
    }

    /// Switch the execution model used by subsequent execute calls.
    pub fn set_model(&self, model: ExecModel) {
        *self.model.write().expect("model lock") = model;
    }

    #[must_use]
    pub fn model(&self) -> ExecModel {
        *self.model.read().expect("model lock")
    }

    /// Whether a rule of this name is currently installed.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        !self.cleared.load(Ordering::Acquire)
            && self
                .authoritative
                .read()
                .expect("authoritative lock")
                .contains(name)
    }

    /// Number of rules currently installed.
    #[must_use]
    pub fn count(&self) -> usize {
        if self.cleared.load(Ordering::Acquire) {
            0
        } else {
            self.authoritative
                .read()
                .expect("authoritative lock")
                .count()
        }
    }

    // Core instances are preferred; when both sub-pools are empty the call
    // blocks on whichever frees up first. No lock is held across user code.
    fn acquire(&self) -> (usize, Arc<Instance>) {
        let tag = if let Ok(tag) = self.core_rx.try_recv() {
            tag
        } else if let Ok(tag) = self.overflow_rx.try_recv() {
            tag
        } else {
            select! {
                recv(self.core_rx) -> tag => tag.expect("pool channel open"),
                recv(self.overflow_rx) -> tag => tag.expect("pool channel open"),
            }
        };
        let instance = self.slots[tag].read().expect("slot lock").clone();
        (tag, instance)
    }

    fn release(&self, tag: usize) {
        let tx = if tag < self.min {
            &self.core_tx
        } else {
            &self.overflow_tx
        };
        tx.send(tag).expect("pool channel open");
    }
}

fn build_instance(
    source: &str,
    host_bindings: &[(String, Binding)],
) -> Result<Instance, EngineError> {
    let dc = DataContext::new();
    for (name, binding) in host_bindings {
        dc.add(name.clone(), binding.clone());
    }
    Ok(Instance {
        kb: parse(source)?,
        dc,
    })
}

fn merge(kb: &mut KnowledgeBase, patch: &KnowledgeBase) {
    for rule in patch.ordered() {
        kb.insert_or_replace((**rule).clone());
    }
}
