// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptor registry.
//!
//! The registry maps adaptor names to [`AdaptorWorker`]s, persists the
//! topology through a [`ConfigStore`] and dispatches every inbound message
//! to the registered [`MessageHandler`]s.
//!
//! # Indices
//!
//! Every adaptor appears in the global index and in exactly one of the
//! local or remote indices. All three live behind one mutex, so the
//! duplicate check and the insert of `define_adaptor` are atomic with
//! respect to each other.
//!
//! # Health
//!
//! A failed configuration load or store marks the registry unhealthy. Every
//! public call then posts and returns the stored event until
//! [`Registry::reset`] or [`Registry::load_configuration`] succeeds.
//! Those two, [`Registry::health`] and [`Registry::shutdown`] stay callable
//! while unhealthy. So do the plain accessors that cannot fail
//! ([`Registry::contains_adaptor`], [`Registry::worker_count`],
//! [`Registry::is_sweeping`], [`Registry::topology`] and the commit flag),
//! along with the paths the readers themselves drive
//! ([`Registry::dispatch_handlers`], [`Registry::post_exception`]).
//!
//! # Lifecycle
//!
//! Structural changes (define, undefine, load, reset, sweep eviction)
//! serialize on one lock, so a reset never interleaves with a define.

use crate::adaptor::{Adaptor, AdaptorHandle};
use crate::codec::{LlrpCodec, Message, MessageCodec, MessageKind};
use crate::config::{AdaptorConfig, ConfigStore, RegistryConfig};
use crate::error::{Error, ExceptionEvent, Result};
use crate::fanout::AsyncSubscriber;
use crate::handler::{ExceptionSink, MessageHandler};
use crate::remote::{RemoteResolver, RpcResolver};
use crate::sync::CancelToken;
use crate::transport::{Connector, TcpConnector};
use crate::worker::{AdaptorWorker, QueueEntry};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};

/// Name of the adaptor that always exists after initialize/reset.
pub const DEFAULT_ADAPTOR: &str = "DEFAULT";

/// Collaborators handed to [`Registry::initialize`].
pub struct RegistrySetup {
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn ExceptionSink>,
    handler: Option<Arc<dyn MessageHandler>>,
    codec: Arc<dyn MessageCodec>,
    resolver: Option<Arc<dyn RemoteResolver>>,
    connector: Arc<dyn Connector>,
    config: RegistryConfig,
}

impl RegistrySetup {
    pub fn new(store: Arc<dyn ConfigStore>, sink: Arc<dyn ExceptionSink>) -> Self {
        Self {
            store,
            sink,
            handler: None,
            codec: Arc::new(LlrpCodec::default()),
            resolver: None,
            connector: Arc::new(TcpConnector::default()),
            config: RegistryConfig::default(),
        }
    }

    /// Initial full handler.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Remote lookup; defaults to [`RpcResolver`].
    pub fn with_resolver(mut self, resolver: Arc<dyn RemoteResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Transport used by local readers.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn commit_on_change(mut self, enabled: bool) -> Self {
        self.config.commit_on_change = enabled;
        self
    }
}

struct Runtime {
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn ExceptionSink>,
    codec: Arc<dyn MessageCodec>,
    resolver: Arc<dyn RemoteResolver>,
    connector: Arc<dyn Connector>,
    config: RegistryConfig,
}

#[derive(Default)]
struct Indices {
    all: BTreeMap<String, Arc<AdaptorWorker>>,
    local: BTreeMap<String, Arc<Adaptor>>,
    remote: BTreeMap<String, Arc<AdaptorWorker>>,
}

impl Indices {
    fn remove(&mut self, name: &str) -> Option<(Arc<AdaptorWorker>, Option<Arc<Adaptor>>)> {
        let worker = self.all.remove(name)?;
        let local = self.local.remove(name);
        self.remote.remove(name);
        Some((worker, local))
    }

    fn drain(&mut self) -> Vec<(Arc<AdaptorWorker>, Option<Arc<Adaptor>>)> {
        let mut local = std::mem::take(&mut self.local);
        self.remote.clear();
        std::mem::take(&mut self.all)
            .into_iter()
            .map(|(name, worker)| {
                let adaptor = local.remove(&name);
                (worker, adaptor)
            })
            .collect()
    }
}

#[derive(Default)]
struct Handlers {
    full: Vec<Arc<dyn MessageHandler>>,
    partial: Vec<(MessageKind, Arc<dyn MessageHandler>)>,
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Subscriber the registry attaches to every adaptor.
struct RegistryListener {
    registry: Weak<Registry>,
}

impl AsyncSubscriber for RegistryListener {
    fn on_message(&self, adaptor: &str, reader: &str, message: &Message) {
        if let Some(registry) = self.registry.upgrade() {
            registry.dispatch_handlers(adaptor, reader, message);
        }
    }

    fn on_error(&self, event: &ExceptionEvent) {
        if let Some(registry) = self.registry.upgrade() {
            registry.post_exception(event);
        }
    }
}

/// Process-wide adaptor registry.
pub struct Registry {
    runtime: OnceLock<Runtime>,
    commit_on_change: AtomicBool,
    loading: AtomicBool,
    indices: Mutex<Indices>,
    handlers: RwLock<Handlers>,
    health: RwLock<std::result::Result<(), ExceptionEvent>>,
    lifecycle: Mutex<()>,
    listener: Arc<dyn AsyncSubscriber>,
    sweeper: Mutex<Option<(CancelToken, JoinHandle<()>)>>,
}

impl Registry {
    /// Create an uninitialized registry.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            runtime: OnceLock::new(),
            commit_on_change: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            indices: Mutex::new(Indices::default()),
            handlers: RwLock::new(Handlers::default()),
            health: RwLock::new(Ok(())),
            lifecycle: Mutex::new(()),
            listener: Arc::new(RegistryListener {
                registry: me.clone(),
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Install collaborators and load the stored topology.
    ///
    /// Runs once; later calls return `false` and change nothing. A failing
    /// load still initializes the registry, in the unhealthy state.
    pub fn initialize(self: &Arc<Self>, setup: RegistrySetup) -> bool {
        if self.runtime.get().is_some() {
            return false;
        }

        let config = match setup.config.validate() {
            Ok(()) => setup.config,
            Err(e) => {
                log::warn!("[registry] {}, using defaults", e);
                RegistryConfig::default()
            }
        };
        let resolver: Arc<dyn RemoteResolver> = match setup.resolver {
            Some(resolver) => resolver,
            None => Arc::new(RpcResolver::new(Arc::clone(&setup.codec))),
        };
        let runtime = Runtime {
            store: setup.store,
            sink: setup.sink,
            codec: setup.codec,
            resolver,
            connector: setup.connector,
            config,
        };
        if self.runtime.set(runtime).is_err() {
            return false;
        }
        let Some(rt) = self.runtime.get() else {
            return false;
        };

        if let Some(handler) = setup.handler {
            self.handlers.write().full.push(handler);
        }
        self.commit_on_change
            .store(rt.config.commit_on_change, Ordering::Release);

        {
            let _guard = self.lifecycle.lock();
            if let Err(e) = self.load_locked(rt) {
                log::warn!("[registry] initialized without configuration: {}", e);
            }
        }
        self.start_sweeper(rt);
        log::info!(
            "[registry] initialized with {} adaptor(s)",
            self.indices.lock().all.len()
        );
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    /// Stored health state.
    pub fn health(&self) -> Result<()> {
        match &*self.health.read() {
            Ok(()) => Ok(()),
            Err(event) => Err(event.to_error()),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .get()
            .ok_or_else(|| Error::ManagementNotInitialized("registry not initialized".into()))
    }

    /// Runtime of a healthy registry; otherwise post and return the stored failure.
    fn ensure_usable(&self) -> Result<&Runtime> {
        let rt = self.runtime()?;
        let stored = self.health.read().clone();
        if let Err(event) = stored {
            rt.sink.post(&event);
            return Err(event.to_error());
        }
        Ok(rt)
    }

    /// Post a structural failure and hand it back to the caller.
    fn raise<T>(&self, rt: &Runtime, result: Result<T>, adaptor: &str, reader: &str) -> Result<T> {
        if let Err(e) = &result {
            rt.sink.post(&ExceptionEvent::new(e, adaptor, reader));
        }
        result
    }

    /// Codec shared by every adaptor of this registry.
    pub fn codec(&self) -> Arc<dyn MessageCodec> {
        match self.runtime.get() {
            Some(rt) => Arc::clone(&rt.codec),
            None => Arc::new(LlrpCodec::default()),
        }
    }

    // ---------------------------------------------------------------------
    // Adaptors
    // ---------------------------------------------------------------------

    /// Define a local adaptor (`address == None`) or attach a remote one.
    ///
    /// Returns the registered name; for remote adaptors this is the name the
    /// remote side reports, which may differ from `name`.
    pub fn define_adaptor(&self, name: &str, address: Option<&str>) -> Result<String> {
        let rt = self.ensure_usable()?;
        let _guard = self.lifecycle.lock();
        let result = self.define_inner(rt, name, address);
        self.raise(rt, result, name, "")
    }

    fn define_inner(&self, rt: &Runtime, name: &str, address: Option<&str>) -> Result<String> {
        if name.is_empty() {
            return Err(Error::AdapterNotExist("adaptor name is empty".into()));
        }
        if self.indices.lock().all.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let (canonical, handle, local): (String, Arc<dyn AdaptorHandle>, Option<Arc<Adaptor>>) =
            match address {
                None => {
                    let adaptor = Adaptor::with_connector(
                        name,
                        Arc::clone(&rt.codec),
                        Arc::clone(&rt.connector),
                    );
                    let handle: Arc<dyn AdaptorHandle> = adaptor.clone();
                    (name.to_string(), handle, Some(adaptor))
                }
                Some(address) => {
                    let handle = rt.resolver.resolve(name, address)?;
                    (handle.name()?, handle, None)
                }
            };

        let worker = AdaptorWorker::new(
            canonical.clone(),
            address.map(str::to_string),
            Arc::clone(&handle),
            Arc::clone(&rt.codec),
            rt.config.worker_threshold,
            Arc::clone(&rt.sink),
        );

        {
            let mut indices = self.indices.lock();
            if indices.all.contains_key(&canonical) {
                return Err(Error::DuplicateName(canonical));
            }
            indices.all.insert(canonical.clone(), Arc::clone(&worker));
            match local {
                Some(adaptor) => {
                    indices.local.insert(canonical.clone(), adaptor);
                }
                None => {
                    indices.remote.insert(canonical.clone(), Arc::clone(&worker));
                }
            }
        }

        let started = worker
            .start()
            .and_then(|_| handle.register_for_async(Arc::clone(&self.listener)));
        if let Err(e) = started {
            self.indices.lock().remove(&canonical);
            worker.tear_down();
            return Err(e);
        }

        log::info!(
            "[registry] defined {} adaptor '{}'",
            if worker.is_local() { "local" } else { "remote" },
            canonical
        );
        self.commit();
        Ok(canonical)
    }

    /// Remove one adaptor. A local adaptor loses all its readers.
    pub fn undefine_adaptor(&self, name: &str) -> Result<()> {
        let rt = self.ensure_usable()?;
        let _guard = self.lifecycle.lock();
        let removed = self.indices.lock().remove(name);
        let result = match removed {
            Some((worker, local)) => {
                self.retire(rt, &worker, local.as_deref());
                self.commit();
                Ok(())
            }
            None => Err(Error::AdapterNotExist(name.to_string())),
        };
        self.raise(rt, result, name, "")
    }

    /// Remove every adaptor, including the default one.
    ///
    /// Reader failures are posted and do not stop the remaining removals.
    pub fn undefine_all_adaptors(&self) -> Result<()> {
        let rt = self.ensure_usable()?;
        let _guard = self.lifecycle.lock();
        let removed = self.indices.lock().drain();
        for (worker, local) in &removed {
            self.retire(rt, worker, local.as_deref());
        }
        self.commit();
        Ok(())
    }

    fn retire(&self, rt: &Runtime, worker: &AdaptorWorker, local: Option<&Adaptor>) {
        if let Some(adaptor) = local {
            // Failures reach the sink through the still-registered listener
            adaptor.undefine_all();
        }
        if let Err(e) = worker.handle().deregister_from_async(&self.listener) {
            rt.sink.post(&ExceptionEvent::new(&e, worker.name(), ""));
        }
        worker.tear_down();
        log::info!("[registry] undefined adaptor '{}'", worker.name());
    }

    /// Queue `message` for `reader` on `adaptor`; never blocks.
    pub fn enqueue_message(&self, adaptor: &str, reader: &str, message: Message) -> Result<()> {
        let rt = self.ensure_usable()?;
        let result = self.enqueue_inner(adaptor, reader, message);
        self.raise(rt, result, adaptor, reader)
    }

    fn enqueue_inner(&self, adaptor: &str, reader: &str, message: Message) -> Result<()> {
        let worker = self
            .indices
            .lock()
            .all
            .get(adaptor)
            .cloned()
            .ok_or_else(|| Error::AdapterNotExist(adaptor.to_string()))?;
        if !worker.is_ready() {
            return Err(Error::QueueFull(format!(
                "adaptor '{}' is not ready ({} queued)",
                adaptor,
                worker.queue_len()
            )));
        }
        worker.enqueue(QueueEntry {
            adaptor: adaptor.to_string(),
            reader: reader.to_string(),
            message,
        })
    }

    /// Registered adaptor names, sorted.
    pub fn adaptor_names(&self) -> Result<Vec<String>> {
        self.ensure_usable()?;
        Ok(self.indices.lock().all.keys().cloned().collect())
    }

    /// Number of adaptors (and so of workers) currently registered.
    pub fn worker_count(&self) -> usize {
        self.indices.lock().all.len()
    }

    pub fn contains_adaptor(&self, name: &str) -> bool {
        self.indices.lock().all.contains_key(name)
    }

    pub fn is_local_adaptor(&self, name: &str) -> Result<bool> {
        self.ensure_usable()?;
        let indices = self.indices.lock();
        if indices.local.contains_key(name) {
            Ok(true)
        } else if indices.remote.contains_key(name) {
            Ok(false)
        } else {
            Err(Error::AdapterNotExist(name.to_string()))
        }
    }

    /// Handle for direct reader management on an adaptor.
    pub fn adaptor(&self, name: &str) -> Result<Arc<dyn AdaptorHandle>> {
        self.worker(name).map(|w| Arc::clone(w.handle()))
    }

    pub fn local_adaptor(&self, name: &str) -> Result<Arc<Adaptor>> {
        self.ensure_usable()?;
        self.indices
            .lock()
            .local
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AdapterNotExist(name.to_string()))
    }

    pub fn worker(&self, name: &str) -> Result<Arc<AdaptorWorker>> {
        self.ensure_usable()?;
        self.indices
            .lock()
            .all
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AdapterNotExist(name.to_string()))
    }

    // ---------------------------------------------------------------------
    // Handlers and events
    // ---------------------------------------------------------------------

    /// Register a handler for every inbound message; `false` if already present.
    pub fn register_full_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<bool> {
        self.ensure_usable()?;
        let mut handlers = self.handlers.write();
        if handlers.full.iter().any(|h| same_handler(h, &handler)) {
            return Ok(false);
        }
        handlers.full.push(handler);
        Ok(true)
    }

    pub fn deregister_full_handler(&self, handler: &Arc<dyn MessageHandler>) -> Result<bool> {
        self.ensure_usable()?;
        let mut handlers = self.handlers.write();
        let before = handlers.full.len();
        handlers.full.retain(|h| !same_handler(h, handler));
        Ok(handlers.full.len() != before)
    }

    /// Register a handler for messages of one kind.
    pub fn register_partial_handler(
        &self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<bool> {
        self.ensure_usable()?;
        let mut handlers = self.handlers.write();
        if handlers
            .partial
            .iter()
            .any(|(k, h)| *k == kind && same_handler(h, &handler))
        {
            return Ok(false);
        }
        handlers.partial.push((kind, handler));
        Ok(true)
    }

    pub fn deregister_partial_handler(
        &self,
        kind: MessageKind,
        handler: &Arc<dyn MessageHandler>,
    ) -> Result<bool> {
        self.ensure_usable()?;
        let mut handlers = self.handlers.write();
        let before = handlers.partial.len();
        handlers
            .partial
            .retain(|(k, h)| !(*k == kind && same_handler(h, handler)));
        Ok(handlers.partial.len() != before)
    }

    /// Run full handlers, then the partial handlers bound to the message kind.
    ///
    /// Each call is isolated; returns the number of handlers that panicked.
    pub fn dispatch_handlers(&self, adaptor: &str, reader: &str, message: &Message) -> usize {
        let targets: Vec<Arc<dyn MessageHandler>> = {
            let handlers = self.handlers.read();
            handlers
                .full
                .iter()
                .cloned()
                .chain(
                    handlers
                        .partial
                        .iter()
                        .filter(|(kind, _)| *kind == message.kind())
                        .map(|(_, h)| Arc::clone(h)),
                )
                .collect()
        };

        let mut failures = 0;
        for handler in targets {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler.handle(adaptor, reader, message);
            }));
            if outcome.is_err() {
                failures += 1;
                self.post_exception(&ExceptionEvent::new(
                    &Error::MsgSending(format!("handler panicked on {}", message.kind())),
                    adaptor,
                    reader,
                ));
            }
        }
        failures
    }

    /// Forward an event to the exception sink.
    pub fn post_exception(&self, event: &ExceptionEvent) {
        match self.runtime.get() {
            Some(rt) => rt.sink.post(event),
            None => log::warn!("[registry] (uninitialized) {}", event),
        }
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Current topology; remote adaptors are recorded without readers.
    pub fn topology(&self) -> Vec<AdaptorConfig> {
        let indices = self.indices.lock();
        indices
            .all
            .iter()
            .map(|(name, worker)| match indices.local.get(name) {
                Some(adaptor) => AdaptorConfig {
                    readers: adaptor.reader_configs(),
                    ..AdaptorConfig::local(name.clone())
                },
                None => AdaptorConfig::remote(
                    name.clone(),
                    worker.address().unwrap_or_default().to_string(),
                ),
            })
            .collect()
    }

    /// Persist the topology now.
    ///
    /// A store failure marks the registry unhealthy.
    pub fn store_configuration(&self) -> Result<()> {
        let rt = self.ensure_usable()?;
        match rt.store.store(&self.topology()) {
            Ok(()) => {
                log::debug!("[registry] topology stored");
                Ok(())
            }
            Err(e) => {
                let err = Error::ConfigNotStorable(e.to_string());
                let event = ExceptionEvent::new(&err, "", "");
                *self.health.write() = Err(event.clone());
                rt.sink.post(&event);
                Err(err)
            }
        }
    }

    /// Persist if auto-commit is on and no load is in progress.
    pub fn commit(&self) {
        if !self.commit_on_change.load(Ordering::Acquire) || self.loading.load(Ordering::Acquire)
        {
            return;
        }
        if let Err(e) = self.store_configuration() {
            log::debug!("[registry] commit failed: {}", e);
        }
    }

    pub fn set_commit_on_change(&self, enabled: bool) {
        self.commit_on_change.store(enabled, Ordering::Release);
    }

    pub fn commit_on_change(&self) -> bool {
        self.commit_on_change.load(Ordering::Acquire)
    }

    /// Merge the stored topology into the registry.
    ///
    /// Existing adaptors and readers are kept. Success clears a stored
    /// health failure.
    pub fn load_configuration(&self) -> Result<()> {
        let rt = self.runtime()?;
        let _guard = self.lifecycle.lock();
        self.load_locked(rt)
    }

    fn load_locked(&self, rt: &Runtime) -> Result<()> {
        self.loading.store(true, Ordering::Release);
        let result = match rt.store.load() {
            Ok(adaptors) => {
                *self.health.write() = Ok(());
                self.commit_on_change
                    .store(rt.config.commit_on_change, Ordering::Release);
                for adaptor in adaptors {
                    self.apply(rt, adaptor);
                }
                Ok(())
            }
            Err(e) => {
                let err = Error::ManagementNotInitialized(format!("configuration load failed: {}", e));
                let event = ExceptionEvent::new(&err, "", "");
                self.commit_on_change.store(false, Ordering::Release);
                *self.health.write() = Err(event.clone());
                rt.sink.post(&event);
                Err(err)
            }
        };
        self.ensure_default(rt);
        self.loading.store(false, Ordering::Release);
        result
    }

    fn apply(&self, rt: &Runtime, config: AdaptorConfig) {
        let address = if config.is_local {
            None
        } else {
            config.address.as_deref()
        };

        let name = if self.contains_adaptor(&config.name) {
            config.name.clone()
        } else {
            match self.define_inner(rt, &config.name, address) {
                Ok(name) => name,
                Err(e) => {
                    rt.sink.post(&ExceptionEvent::new(&e, config.name.as_str(), ""));
                    return;
                }
            }
        };
        if !config.is_local {
            return;
        }

        let Some(adaptor) = self.indices.lock().local.get(&name).cloned() else {
            return;
        };
        for reader in config.readers {
            if adaptor.contains_reader(&reader.name) {
                continue;
            }
            let reader_name = reader.name.clone();
            if let Err(e) = adaptor.define_with(reader) {
                rt.sink.post(&ExceptionEvent::new(&e, name.as_str(), reader_name));
            }
        }
    }

    fn ensure_default(&self, rt: &Runtime) {
        if self.contains_adaptor(DEFAULT_ADAPTOR) {
            return;
        }
        if let Err(e) = self.define_inner(rt, DEFAULT_ADAPTOR, None) {
            rt.sink.post(&ExceptionEvent::new(&e, DEFAULT_ADAPTOR, ""));
        }
    }

    /// Drop every adaptor and reload the stored topology.
    ///
    /// Runs even when the registry is unhealthy.
    pub fn reset(&self) -> Result<()> {
        let rt = self.runtime()?;
        let _guard = self.lifecycle.lock();
        let removed = self.indices.lock().drain();
        for (worker, local) in &removed {
            self.retire(rt, worker, local.as_deref());
        }
        log::info!("[registry] reset, reloading configuration");
        self.load_locked(rt)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Check remote adaptors and evict those past the failure ceiling.
    ///
    /// Returns the evicted names.
    pub fn sweep(&self) -> Vec<String> {
        let Some(rt) = self.runtime.get() else {
            return Vec::new();
        };
        let remotes: Vec<Arc<AdaptorWorker>> =
            self.indices.lock().remote.values().cloned().collect();

        let mut evicted = Vec::new();
        for worker in remotes {
            match worker.handle().name() {
                Ok(_) => worker.record_remote_success(),
                Err(e) => {
                    let failures = worker.record_remote_failure();
                    log::debug!(
                        "[registry] liveness check of '{}' failed ({}): {}",
                        worker.name(),
                        failures,
                        e
                    );
                }
            }
            if worker.connection_failures() < rt.config.failure_ceiling {
                continue;
            }

            let _guard = self.lifecycle.lock();
            let removed = {
                let mut indices = self.indices.lock();
                match indices.all.get(worker.name()) {
                    // A reset may have replaced the adaptor since the check
                    Some(current) if Arc::ptr_eq(current, &worker) => {
                        indices.remove(worker.name())
                    }
                    _ => None,
                }
            };
            if let Some((worker, _)) = removed {
                let _ = worker.handle().deregister_from_async(&self.listener);
                worker.tear_down();
                let err = Error::AdapterLost(format!(
                    "evicted after {} consecutive failures",
                    worker.connection_failures()
                ));
                log::warn!("[registry] adaptor '{}' {}", worker.name(), err);
                rt.sink.post(&ExceptionEvent::new(&err, worker.name(), ""));
                evicted.push(worker.name().to_string());
            }
        }
        if !evicted.is_empty() {
            self.commit();
        }
        evicted
    }

    fn start_sweeper(self: &Arc<Self>, rt: &Runtime) {
        let Some(interval) = rt.config.health_sweep_interval() else {
            return;
        };
        let token = CancelToken::new();
        let t = token.clone();
        let registry = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("llrp-registry-sweep".into())
            .spawn(move || {
                while !t.wait_timeout(interval) {
                    match registry.upgrade() {
                        Some(registry) => {
                            registry.sweep();
                        }
                        None => return,
                    }
                }
            });
        match spawned {
            Ok(handle) => *self.sweeper.lock() = Some((token, handle)),
            Err(e) => log::warn!("[registry] health sweep not started: {}", e),
        }
    }

    /// Whether the periodic health sweep thread is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }

    fn stop_sweeper(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some((token, handle)) = sweeper {
            token.cancel();
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Disconnect local readers, detach from remote adaptors and stop every worker.
    ///
    /// The stored topology is left untouched.
    pub fn shutdown(&self) {
        self.stop_sweeper();
        let removed = self.indices.lock().drain();
        for (worker, local) in removed {
            if let Some(adaptor) = local {
                adaptor.disconnect_readers();
            }
            if let Err(e) = worker.handle().deregister_from_async(&self.listener) {
                log::debug!("[registry] detach from '{}': {}", worker.name(), e);
            }
            worker.tear_down();
        }
        if self.runtime.get().is_some() {
            log::info!("[registry] shut down");
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("initialized", &self.is_initialized())
            .field("adaptors", &self.indices.lock().all.keys().collect::<Vec<_>>())
            .field("healthy", &self.health.read().is_ok())
            .finish()
    }
}
