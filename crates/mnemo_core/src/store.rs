//! The datom store: one writer thread, many readers.
//!
//! Callers submit [`Transaction`]s over an unbounded channel. A single
//! writer thread drains it in order, so transaction ids are totally ordered
//! and no two writes ever race. Readers take [`Db`] views that never block
//! the writer.
//!
//! # Example
//!
//! ```rust
//! use mnemo_core::{AttributeDef, DatomStore, Transaction, ValueTag, PartitionId};
//!
//! let store = DatomStore::open_in_memory()?;
//! let path = store.register_attributes(vec![AttributeDef::new("file/path", ValueTag::Utf8)])?[0];
//!
//! let e = PartitionId::ENTITY.make_id(100);
//! let mut tx = Transaction::new();
//! tx.add(e, path, "/a");
//! store.transact(tx).wait()?;
//!
//! let mut tx = Transaction::new();
//! tx.add(e, path, "/b");
//! store.transact(tx).wait()?;
//!
//! let db = store.db();
//! assert_eq!(db.get(e, path)?, Some("/b".into()));
//! assert_eq!(db.history(e)?.len(), 2);
//! # Ok::<(), mnemo_core::CoreError>(())
//! ```

use crate::attribute::{builtin, Attribute, AttributeDef, AttributeRegistry, SymbolInterner};
use crate::config::StoreConfig;
use crate::datom::Datom;
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::id_cache::{last_entity_in_partition, NextIdCache};
use crate::index::{IndexSet, IndexType};
use crate::key::KeyHead;
use crate::revisions::{Revision, Revisions};
use crate::transaction::apply::{self, IndexWriter, Prepared, PreviousState};
use crate::transaction::{
    CommitResult, Fact, PendingTransaction, StateCell, Transaction, TxFunction, TxState,
};
use crate::types::{AttributeId, EntityId, PartitionId, TxId};
use crate::value::Value;
use mnemo_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

enum Command {
    Transact {
        tx: Transaction,
        state: StateCell,
        reply: Sender<CoreResult<CommitResult>>,
    },
    RegisterAttributes {
        defs: Vec<AttributeDef>,
        reply: Sender<CoreResult<Vec<AttributeId>>>,
    },
    Sync {
        reply: Sender<TxId>,
    },
    Checkpoint {
        reply: Sender<CoreResult<()>>,
    },
}

/// An embedded, append-only datom store.
///
/// Cloning is not supported; share it behind an `Arc`. Dropping the store
/// finishes every queued transaction and stops the writer.
pub struct DatomStore {
    sender: Mutex<Option<Sender<Command>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    current: Arc<RwLock<Db>>,
    registry: Arc<AttributeRegistry>,
    revisions: Arc<Revisions>,
    config: StoreConfig,
}

impl DatomStore {
    /// Opens a store as described by `config`.
    ///
    /// Stores with a path use the file backend; stores without one live in
    /// memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing and may not be created,
    /// if it is locked by another store, or if bootstrap fails.
    pub fn open(config: StoreConfig) -> CoreResult<Self> {
        let backend: Arc<dyn StorageBackend> = match &config.path {
            Some(path) => {
                if !path.exists() && !config.create_if_missing {
                    return Err(CoreError::invalid_operation(format!(
                        "store directory {} does not exist",
                        path.display()
                    )));
                }
                Arc::new(FileBackend::new().sync_on_commit(config.sync_on_commit))
            }
            None => Arc::new(InMemoryBackend::new()),
        };
        Self::open_with_backend(config, backend)
    }

    /// Opens a fresh in-memory store with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if bootstrap fails.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(StoreConfig::default())
    }

    /// Opens or creates a file-backed store in `path` with default settings.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        Self::open(StoreConfig::default().path(path))
    }

    /// Opens a store over an uninitialized backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized or bootstrap
    /// fails.
    pub fn open_with_backend(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let indexes = IndexSet::open(backend, config.path.as_deref())?;
        let interner = Arc::new(SymbolInterner::new());
        let registry = Arc::new(AttributeRegistry::new(interner));
        let revisions = Arc::new(Revisions::new(config.revision_history));

        let writer = Writer::bootstrap(indexes, Arc::clone(&registry), Arc::clone(&revisions))?;
        let current = Arc::clone(&writer.current);

        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("mnemo-writer".into())
            .spawn(move || writer.run(receiver))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(handle)),
            current,
            registry,
            revisions,
            config,
        })
    }

    /// Configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Submits a transaction and returns without waiting for it.
    pub fn transact(&self, tx: Transaction) -> PendingTransaction {
        let (reply, receiver) = mpsc::channel();
        let state = Arc::new(Mutex::new(TxState::Queued));
        let pending =
            PendingTransaction::new(receiver, Arc::clone(&state), self.config.transaction_timeout);

        let command = Command::Transact { tx, state, reply };
        if let Err(mpsc::SendError(Command::Transact { reply, state, .. })) = self.send(command) {
            *state.lock() = TxState::Failed;
            let _ = reply.send(Err(CoreError::StoreClosed));
        }
        pending
    }

    /// Submits a transaction with extra transaction functions.
    pub fn transact_with(
        &self,
        mut tx: Transaction,
        functions: impl IntoIterator<Item = TxFunction>,
    ) -> PendingTransaction {
        for function in functions {
            tx.add_function(function);
        }
        self.transact(tx)
    }

    /// Waits until every transaction submitted before this call has been
    /// processed and returns the latest committed transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransactionTimeout`] or [`CoreError::StoreClosed`].
    pub fn sync(&self) -> CoreResult<TxId> {
        let (reply, receiver) = mpsc::channel();
        self.send(Command::Sync { reply })
            .map_err(|_| CoreError::StoreClosed)?;
        self.receive(&receiver)
    }

    /// Registers attributes and returns their ids, in input order.
    ///
    /// Definitions that match an already registered attribute return its
    /// id without writing anything.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateAttribute`] if a name is registered
    /// with a different definition or listed twice, or
    /// [`CoreError::InvalidValue`] for a name that is not ASCII.
    pub fn register_attributes(&self, defs: Vec<AttributeDef>) -> CoreResult<Vec<AttributeId>> {
        let (reply, receiver) = mpsc::channel();
        self.send(Command::RegisterAttributes { defs, reply })
            .map_err(|_| CoreError::StoreClosed)?;
        self.receive(&receiver)?
    }

    /// Compacts the persisted log once every queued transaction is written.
    ///
    /// In-memory stores have nothing to compact and return immediately
    /// after the queue drains.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StoreClosed`], a timeout, or the backend's error.
    pub fn checkpoint(&self) -> CoreResult<()> {
        let (reply, receiver) = mpsc::channel();
        self.send(Command::Checkpoint { reply })
            .map_err(|_| CoreError::StoreClosed)?;
        self.receive(&receiver)?
    }

    fn send(&self, command: Command) -> Result<(), mpsc::SendError<Command>> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(command),
            None => Err(mpsc::SendError(command)),
        }
    }

    fn receive<T>(&self, receiver: &Receiver<T>) -> CoreResult<T> {
        let timeout = self.config.transaction_timeout;
        receiver.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => CoreError::TransactionTimeout { timeout },
            mpsc::RecvTimeoutError::Disconnected => CoreError::StoreClosed,
        })
    }

    /// Latest committed view.
    #[must_use]
    pub fn db(&self) -> Db {
        self.current.read().clone()
    }

    /// Alias for [`db`](Self::db).
    #[must_use]
    pub fn snapshot(&self) -> Db {
        self.db()
    }

    /// The attribute registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AttributeRegistry> {
        &self.registry
    }

    /// Looks up an attribute id by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownAttribute`] if it is not registered.
    pub fn attribute_id(&self, name: &str) -> CoreResult<AttributeId> {
        Ok(self.registry.require(name)?.id)
    }

    /// Subscribes to revisions committed from now on.
    pub fn revisions(&self) -> Receiver<Revision> {
        self.revisions.subscribe()
    }

    /// The revision feed, for polling recent history.
    #[must_use]
    pub fn revision_feed(&self) -> &Arc<Revisions> {
        &self.revisions
    }

    /// Stops accepting work, finishes queued transactions and stops the
    /// writer. Later calls are no-ops.
    pub fn close(&self) {
        drop(self.sender.lock().take());
        if let Some(handle) = self.writer.lock().take() {
            if handle.join().is_err() {
                error!("writer thread panicked");
            }
        }
    }

    /// True once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for DatomStore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DatomStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatomStore")
            .field("basis_tx", &self.current.read().basis_tx())
            .field("attributes", &self.registry.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// State owned by the writer thread.
struct Writer {
    indexes: IndexSet,
    registry: Arc<AttributeRegistry>,
    ids: NextIdCache,
    current: Arc<RwLock<Db>>,
    revisions: Arc<Revisions>,
}

impl Writer {
    fn bootstrap(
        indexes: IndexSet,
        registry: Arc<AttributeRegistry>,
        revisions: Arc<Revisions>,
    ) -> CoreResult<Self> {
        registry.register(&builtin::attributes(registry.interner()))?;

        let snapshot = indexes.snapshot()?;
        let last_tx = last_entity_in_partition(snapshot.as_ref(), PartitionId::TRANSACTIONS)?;
        let basis = last_tx.map_or(TxId::new(0), TxId::from);
        let db = Db::new(snapshot, Arc::clone(&registry), basis);

        let mut writer = Self {
            indexes,
            registry,
            ids: NextIdCache::new(),
            current: Arc::new(RwLock::new(db)),
            revisions,
        };

        match last_tx {
            None => {
                let facts: Vec<Fact> = builtin::attributes(writer.registry.interner())
                    .iter()
                    .flat_map(definition_facts)
                    .collect();
                let result = writer.commit_facts(facts, HashMap::new(), &[])?;
                info!(tx = %result.tx_id, "initialized new store");
            }
            Some(tx) => {
                let loaded = writer.load_attributes()?;
                info!(tx = %TxId::from(tx), attributes = loaded, "opened existing store");
            }
        }
        Ok(writer)
    }

    /// Rebuilds user attributes from their definition datoms.
    fn load_attributes(&self) -> CoreResult<usize> {
        let db = self.db();
        let head = KeyHead::new(IndexType::EavtCurrent).byte(PartitionId::ATTRIBUTE.as_u8());
        let (from, to) = head.range();

        let mut by_entity: BTreeMap<EntityId, Vec<Datom>> = BTreeMap::new();
        for datom in db.datoms(IndexType::EavtCurrent, &from, &to)? {
            by_entity.entry(datom.e()).or_default().push(datom);
        }

        let interner = self.registry.interner();
        let mut attributes = Vec::new();
        for (e, datoms) in by_entity {
            let id = attribute_id_of(e)?;
            if id <= builtin::LAST_BUILTIN {
                continue;
            }
            attributes.push(builtin::attribute_from_datoms(id, &datoms, interner)?);
        }
        self.registry.register(&attributes)?;
        Ok(attributes.len())
    }

    fn db(&self) -> Db {
        self.current.read().clone()
    }

    fn run(mut self, receiver: Receiver<Command>) {
        while let Ok(command) = receiver.recv() {
            match command {
                Command::Transact { tx, state, reply } => {
                    let result = self.guarded(|writer| writer.transact(tx, &state));
                    *state.lock() = if result.is_ok() {
                        TxState::Committed
                    } else {
                        TxState::Failed
                    };
                    if let Err(e) = &result {
                        warn!(error = %e, "transaction failed");
                    }
                    let _ = reply.send(result);
                }
                Command::RegisterAttributes { defs, reply } => {
                    let result = self.guarded(|writer| writer.register(defs));
                    if let Err(e) = &result {
                        warn!(error = %e, "attribute registration failed");
                    }
                    let _ = reply.send(result);
                }
                Command::Sync { reply } => {
                    let _ = reply.send(self.db().basis_tx());
                }
                Command::Checkpoint { reply } => {
                    let result = self.guarded(|writer| writer.indexes.checkpoint());
                    if let Err(e) = &result {
                        warn!(error = %e, "checkpoint failed");
                    }
                    let _ = reply.send(result);
                }
            }
        }
        debug!("writer stopped");
    }

    /// Runs one command, turning a panic into an error for that command.
    ///
    /// After a panic the published view is rebuilt from storage, since the
    /// command may have stopped between committing and publishing.
    fn guarded<T>(&mut self, command: impl FnOnce(&mut Self) -> CoreResult<T>) -> CoreResult<T> {
        match panic::catch_unwind(AssertUnwindSafe(|| command(self))) {
            Ok(result) => result,
            Err(_) => {
                error!("writer command panicked");
                if let Err(e) = self.refresh() {
                    error!(error = %e, "could not rebuild view after panic");
                }
                Err(CoreError::transaction_aborted("writer command panicked"))
            }
        }
    }

    fn refresh(&mut self) -> CoreResult<()> {
        let snapshot = self.indexes.snapshot()?;
        let last_tx = last_entity_in_partition(snapshot.as_ref(), PartitionId::TRANSACTIONS)?;
        let basis = last_tx.map_or(TxId::new(0), TxId::from);
        *self.current.write() = Db::new(snapshot, Arc::clone(&self.registry), basis);
        Ok(())
    }

    fn transact(&mut self, mut tx: Transaction, state: &StateCell) -> CoreResult<CommitResult> {
        *state.lock() = TxState::Resolving;
        let db = self.db();
        loop {
            let functions = tx.take_functions();
            if functions.is_empty() {
                break;
            }
            for function in functions {
                run_function(function, &db, &mut tx)?;
            }
        }

        let facts = tx.into_facts();
        for fact in &facts {
            let e = fact.e;
            if e.partition() == PartitionId::ATTRIBUTE
                || (e != EntityId::TX_SELF && e.is_temp() && e.temp_target() == PartitionId::ATTRIBUTE)
            {
                return Err(CoreError::invalid_operation(
                    "attribute entities are written through register_attributes",
                ));
            }
        }

        *state.lock() = TxState::Applying;
        self.commit_facts(facts, HashMap::new(), &[])
    }

    fn register(&mut self, defs: Vec<AttributeDef>) -> CoreResult<Vec<AttributeId>> {
        let mut ids = Vec::with_capacity(defs.len());
        let mut fresh: Vec<Attribute> = Vec::new();
        let mut listed: HashMap<String, (AttributeDef, AttributeId)> = HashMap::new();
        let db = self.db();

        for def in defs {
            if def.name.is_empty() || !def.name.is_ascii() {
                return Err(CoreError::invalid_value(format!(
                    "attribute name {:?} must be non-empty ASCII",
                    def.name
                )));
            }
            if let Some((previous, id)) = listed.get(&def.name) {
                if previous != &def {
                    return Err(CoreError::duplicate_attribute(
                        &def.name,
                        "listed twice with different definitions",
                    ));
                }
                ids.push(*id);
                continue;
            }

            let id = match self.registry.lookup(&def.name) {
                Some(existing) if existing.matches(&def) => existing.id,
                Some(existing) => {
                    return Err(CoreError::duplicate_attribute(
                        &def.name,
                        format!(
                            "already registered as {} with a different definition",
                            existing.id
                        ),
                    ));
                }
                None => {
                    let e = self.ids.next_id(db.snapshot(), PartitionId::ATTRIBUTE)?;
                    let id = attribute_id_of(e)?;
                    let symbol = self.registry.interner().intern(&def.name);
                    fresh.push(def.clone().into_attribute(id, symbol));
                    id
                }
            };
            ids.push(id);
            listed.insert(def.name.clone(), (def, id));
        }

        if fresh.is_empty() {
            return Ok(ids);
        }

        let facts: Vec<Fact> = fresh.iter().flat_map(definition_facts).collect();
        let minted = fresh
            .iter()
            .map(|a| (a.id.as_entity(), a.id.as_entity()))
            .collect();
        let result = self.commit_facts(facts, minted, &fresh)?;
        info!(
            tx = %result.tx_id,
            attributes = fresh.len(),
            "registered attributes"
        );
        Ok(ids)
    }

    /// Remaps, type-checks, dedupes and indexes `facts` as one transaction.
    ///
    /// `remaps` may pre-seed entities allocated for this transaction; they
    /// are treated like remapped temporary ids. `attributes` are added to
    /// the registry once the batch is durable and before the new view is
    /// published.
    fn commit_facts(
        &mut self,
        facts: Vec<Fact>,
        mut remaps: HashMap<EntityId, EntityId>,
        attributes: &[Attribute],
    ) -> CoreResult<CommitResult> {
        let started = Instant::now();
        let db = self.db();
        let snapshot = db.snapshot();
        let this_tx = TxId::from(self.ids.next_id(snapshot, PartitionId::TRANSACTIONS)?);
        remaps.insert(EntityId::TX_SELF, this_tx.as_entity());

        for fact in &facts {
            let references = std::iter::once(fact.e).chain(fact.value.as_reference());
            for e in references {
                let partition = e.partition();
                if partition == PartitionId::ENTITY || partition.is_user() {
                    self.ids.observe(snapshot, e)?;
                }
            }
        }

        let mut prepared = Vec::with_capacity(facts.len() + 1);
        for fact in facts {
            prepared.push(self.prepare(fact, this_tx, &mut remaps)?);
        }
        prepared.push(Prepared {
            datom: Datom::assert(
                this_tx.as_entity(),
                builtin::TX_TIMESTAMP,
                &Value::Int64(now_millis()),
                this_tx,
            )?,
            attribute: self.registry.get(builtin::TX_TIMESTAMP)?,
            remapped: true,
        });

        let mut writer = IndexWriter::new(&self.indexes, this_tx);
        let mut retracted = HashSet::new();
        for fact in apply::dedupe(prepared) {
            let Prepared {
                datom,
                attribute,
                remapped,
            } = fact;

            if datom.is_retract() {
                match apply::retraction_target(&db, &datom)? {
                    Some(target) if retracted.contains(&target) => {
                        debug!(?datom, "value already retracted by this transaction");
                    }
                    Some(target) => {
                        if cfg!(debug_assertions) {
                            target.check_target(&datom, true)?;
                        }
                        writer.retract(&attribute, &target);
                        retracted.insert(target);
                    }
                    None => debug!(?datom, "retraction of a value that is not current"),
                }
                continue;
            }

            match apply::previous_state(remapped, &attribute, &db, &datom)? {
                PreviousState::Duplicate => {}
                PreviousState::NotExists => writer.assert(&attribute, &datom),
                PreviousState::Exists(previous) if retracted.contains(&previous) => {
                    writer.assert(&attribute, &datom);
                }
                PreviousState::Exists(previous) => {
                    if cfg!(debug_assertions) {
                        previous.check_target(&datom, false)?;
                    }
                    writer.replace(&attribute, &previous, &datom);
                    retracted.insert(previous);
                }
            }
        }

        let datoms = writer.log_entries();
        self.indexes.commit(writer.into_batch())?;
        if !attributes.is_empty() {
            self.registry.register(attributes)?;
        }

        let db = Db::new(self.indexes.snapshot()?, Arc::clone(&self.registry), this_tx);
        *self.current.write() = db.clone();
        self.revisions.publish(Revision {
            tx_id: this_tx,
            db: db.clone(),
        });

        remaps.remove(&EntityId::TX_SELF);
        remaps.retain(|temp, _| temp.is_temp());
        debug!(
            tx = %this_tx,
            datoms,
            elapsed_us = started.elapsed().as_micros() as u64,
            "committed transaction"
        );
        Ok(CommitResult {
            tx_id: this_tx,
            remaps,
            db,
            datoms,
        })
    }

    /// Resolves temporary ids and checks the value against its attribute.
    fn prepare(
        &mut self,
        fact: Fact,
        this_tx: TxId,
        remaps: &mut HashMap<EntityId, EntityId>,
    ) -> CoreResult<Prepared> {
        let attribute = self.registry.get(fact.a)?;
        let (e, remapped) = self.remap(fact.e, remaps)?;
        let value = match fact.value {
            Value::Reference(target) => Value::Reference(self.remap(target, remaps)?.0),
            other => other,
        };
        if value.tag() != attribute.value_tag {
            return Err(CoreError::invalid_value(format!(
                "{} expects {} values, got {}",
                attribute.symbol,
                attribute.value_tag,
                value.tag()
            )));
        }

        let mut datom = Datom::assert(e, fact.a, &value, this_tx)?;
        if fact.is_retract {
            datom = datom.retracted_at(this_tx);
        }
        Ok(Prepared {
            datom,
            attribute,
            remapped,
        })
    }

    /// Maps a temporary id to a real one; returns whether `e` was minted in
    /// this transaction.
    fn remap(
        &mut self,
        e: EntityId,
        remaps: &mut HashMap<EntityId, EntityId>,
    ) -> CoreResult<(EntityId, bool)> {
        if let Some(&real) = remaps.get(&e) {
            return Ok((real, true));
        }
        if !e.is_temp() {
            return Ok((e, false));
        }
        let target = e.temp_target();
        if target == PartitionId::TEMP || target == PartitionId::TRANSACTIONS {
            return Err(CoreError::invalid_operation(format!(
                "temporary id {e} targets reserved {target}"
            )));
        }
        let db = self.db();
        let real = self.ids.next_id(db.snapshot(), target)?;
        remaps.insert(e, real);
        Ok((real, true))
    }
}

fn run_function(function: TxFunction, db: &Db, tx: &mut Transaction) -> CoreResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| function(db, tx))) {
        Ok(result) => result.map_err(CoreError::transaction_function),
        Err(_) => Err(CoreError::transaction_function(
            CoreError::transaction_aborted("transaction function panicked"),
        )),
    }
}

fn definition_facts(attr: &Attribute) -> Vec<Fact> {
    builtin::definition_facts(attr)
        .into_iter()
        .map(|(a, value)| Fact {
            e: attr.id.as_entity(),
            a,
            value,
            is_retract: false,
        })
        .collect()
}

fn attribute_id_of(e: EntityId) -> CoreResult<AttributeId> {
    u16::try_from(e.payload())
        .map(AttributeId::new)
        .map_err(|_| CoreError::PartitionExhausted {
            partition: PartitionId::ATTRIBUTE.as_u8(),
        })
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
