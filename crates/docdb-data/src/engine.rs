use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use docdb_store::{KeyRange, OrderedStore, WriteBatch};
use docdb_types::codec;
use docdb_types::{Metadata, ObjectKey, TypeTag, Value};
use tracing::{debug, info};

use crate::batch::DataBatch;
use crate::config::DataConfig;
use crate::cursor::DataCursor;
use crate::error::{DataError, DataResult};
use crate::listener::{DataListener, ListenerId, ListenerRegistry, PutEvent};
use crate::options::{HookResult, WriteOptions};
use crate::protocol::{self, Notifier, WriteGate, WritePhase};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One mutation flowing through the write protocol.
#[derive(Clone, Copy)]
pub(crate) enum Operation<'a> {
    Put {
        key: &'a ObjectKey,
        body: &'a [u8],
        metadata: &'a Metadata,
    },
    Delete {
        key: &'a ObjectKey,
    },
}

impl<'a> Operation<'a> {
    fn key(&self) -> &'a ObjectKey {
        match *self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    fn will(&self, listener: &dyn DataListener) -> HookResult {
        match *self {
            Self::Put {
                key,
                body,
                metadata,
            } => listener.will_put(&PutEvent {
                key,
                body,
                metadata,
            }),
            Self::Delete { key } => listener.will_delete(key),
        }
    }

    fn did(&self, listener: &dyn DataListener) -> HookResult {
        match *self {
            Self::Put {
                key,
                body,
                metadata,
            } => listener.did_put(&PutEvent {
                key,
                body,
                metadata,
            }),
            Self::Delete { key } => listener.did_delete(key),
        }
    }
}

/// An operation with its index entries already encoded.
struct Planned<'a> {
    op: Operation<'a>,
    index_keys: BTreeSet<Vec<u8>>,
}

fn plan(op: Operation<'_>) -> DataResult<Planned<'_>> {
    let index_keys = match op {
        Operation::Put { key, metadata, .. } => index_keys_of(key, metadata)?,
        Operation::Delete { .. } => BTreeSet::new(),
    };
    Ok(Planned { op, index_keys })
}

fn index_keys_of(key: &ObjectKey, metadata: &Metadata) -> DataResult<BTreeSet<Vec<u8>>> {
    metadata
        .iter()
        .map(|(name, value)| {
            codec::encode_index_key(key.type_tag(), name, value, key.id_bytes())
                .map_err(DataError::from)
        })
        .collect()
}

fn encode_references(index_keys: &BTreeSet<Vec<u8>>) -> DataResult<Vec<u8>> {
    let list: Vec<&Vec<u8>> = index_keys.iter().collect();
    bincode::serialize(&list).map_err(|e| DataError::CorruptReference {
        key: "<encoding>".into(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// DataDb
// ---------------------------------------------------------------------------

/// Document engine over an [`OrderedStore`].
///
/// Bodies are opaque bytes. Each document may declare secondary indexes
/// through [`Metadata`]; the engine keeps index entries and the document in
/// lockstep by writing both in a single atomic batch, and remembers which
/// index entries belong to which document in a reference entry so that
/// stale entries can be removed on the next write.
pub struct DataDb {
    store: Arc<dyn OrderedStore>,
    config: DataConfig,
    listeners: ListenerRegistry<dyn DataListener>,
    gate: WriteGate,
}

impl DataDb {
    /// Open an engine over `store`. Existing data in the store is kept.
    pub fn open(store: Arc<dyn OrderedStore>, config: DataConfig) -> Self {
        info!(sync_writes = config.sync_writes, "data engine opened");
        Self {
            store,
            config,
            listeners: ListenerRegistry::new(),
            gate: WriteGate::default(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn OrderedStore> {
        &self.store
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Current phase of the write protocol.
    pub fn phase(&self) -> WritePhase {
        self.gate.phase()
    }

    /// Encode the key of document `id` of type `tag`.
    pub fn new_key(&self, tag: TypeTag, id: &Value) -> DataResult<ObjectKey> {
        Ok(ObjectKey::new(tag, id)?)
    }

    // -- listeners ----------------------------------------------------------

    /// Add a listener. It sees every write that starts after this call.
    pub fn register(&self, listener: Arc<dyn DataListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // -- reads --------------------------------------------------------------

    /// Body of the document stored under `key`.
    pub fn get(&self, key: &ObjectKey) -> DataResult<Option<Vec<u8>>> {
        Ok(self.store.get(key.as_bytes())?)
    }

    /// Names of the indexes the document under `key` is currently in.
    pub fn get_indexes_of(&self, key: &ObjectKey) -> DataResult<BTreeSet<String>> {
        self.read_references(&key.reference_key())?
            .iter()
            .map(|index_key| codec::index_name_of(index_key).map_err(DataError::from))
            .collect()
    }

    /// Every document of every type.
    pub fn find_all(&self) -> DataResult<DataCursor> {
        self.object_cursor(codec::family_prefix(codec::OBJECT_MARKER))
    }

    /// Every document of type `tag`, ordered by id.
    pub fn find_all_by_type(&self, tag: TypeTag) -> DataResult<DataCursor> {
        self.object_cursor(codec::object_prefix(tag, None, false)?)
    }

    /// Documents of type `tag` whose id starts with `id`.
    ///
    /// With `is_open`, the last field of `id` only has to be a byte prefix
    /// of the stored field.
    pub fn find_by_id(&self, tag: TypeTag, id: &Value, is_open: bool) -> DataResult<DataCursor> {
        self.object_cursor(codec::object_prefix(tag, Some(id), is_open)?)
    }

    /// Every entry of index `name` of type `tag`, ordered by value then id.
    pub fn find_all_by_index(&self, tag: TypeTag, name: &str) -> DataResult<DataCursor> {
        self.index_cursor(codec::index_prefix(tag, name, None, false)?)
    }

    /// Entries of index `name` whose value starts with `value`.
    pub fn find_by_index(
        &self,
        tag: TypeTag,
        name: &str,
        value: &Value,
        is_open: bool,
    ) -> DataResult<DataCursor> {
        self.index_cursor(codec::index_prefix(tag, name, Some(value), is_open)?)
    }

    fn object_cursor(&self, prefix: Vec<u8>) -> DataResult<DataCursor> {
        let iter = self.store.iter(KeyRange::prefixed(prefix))?;
        Ok(DataCursor::objects(iter))
    }

    fn index_cursor(&self, prefix: Vec<u8>) -> DataResult<DataCursor> {
        let iter = self.store.iter(KeyRange::prefixed(prefix))?;
        Ok(DataCursor::index(iter))
    }

    // -- writes -------------------------------------------------------------

    /// Store `body` under `key` with the given secondary indexes, replacing
    /// any previous version and its index entries.
    pub fn put(
        &self,
        key: &ObjectKey,
        body: &[u8],
        metadata: &Metadata,
        options: WriteOptions<'_>,
    ) -> DataResult<()> {
        self.execute(
            &[Operation::Put {
                key,
                body,
                metadata,
            }],
            options,
        )
    }

    /// Remove the document under `key` and its index entries. Deleting an
    /// absent key is not an error.
    pub fn delete(&self, key: &ObjectKey, options: WriteOptions<'_>) -> DataResult<()> {
        self.execute(&[Operation::Delete { key }], options)
    }

    /// Start an empty batch.
    pub fn new_batch(&self) -> DataBatch<'_> {
        DataBatch::new(self)
    }

    /// Drop every listener and release the handle. The store keeps its data.
    pub fn close(self) {
        self.listeners.clear();
        info!("data engine closed");
    }

    /// Run `ops` through anticipate, commit and notify.
    pub(crate) fn execute(&self, ops: &[Operation<'_>], options: WriteOptions<'_>) -> DataResult<()> {
        let listeners = self.listeners.snapshot();
        let planned = ops
            .iter()
            .map(|op| plan(*op))
            .collect::<DataResult<Vec<_>>>()?;
        let WriteOptions {
            anticipate,
            react,
            commit,
            entries,
            sync,
        } = options;

        {
            let guard = self.gate.enter()?;

            for op in ops {
                for listener in &listeners {
                    op.will(listener.as_ref())
                        .map_err(DataError::AnticipationAborted)?;
                }
            }
            protocol::anticipate(anticipate)?;

            guard.commit_phase();
            let mut batch = self.build_batch(&planned, sync.unwrap_or(self.config.sync_writes))?;
            for (key, value) in entries {
                batch.put(key, value);
            }
            self.store.write_batch(&batch)?;
            for hook in commit {
                hook();
            }
            debug!(
                ops = ops.len(),
                store_ops = batch.len(),
                sync = batch.is_sync(),
                "write committed"
            );
        }

        let mut notifier = Notifier::default();
        for hook in react {
            notifier.record(hook());
        }
        for op in ops {
            for listener in &listeners {
                notifier.record(op.did(listener.as_ref()));
            }
        }
        notifier.finish()
    }

    /// Translate planned operations into one store batch.
    ///
    /// Reference sets written earlier in the same batch shadow the stored
    /// ones, so several operations on one key compose correctly.
    fn build_batch(&self, planned: &[Planned<'_>], sync: bool) -> DataResult<WriteBatch> {
        let mut batch = WriteBatch::new().with_sync(sync);
        let mut overlay: HashMap<Vec<u8>, BTreeSet<Vec<u8>>> = HashMap::new();

        for Planned { op, index_keys } in planned {
            let key = op.key();
            let ref_key = key.reference_key();
            let previous = match overlay.remove(&ref_key) {
                Some(previous) => previous,
                None => self.read_references(&ref_key)?,
            };

            match op {
                Operation::Put { body, .. } => {
                    for stale in previous.difference(index_keys) {
                        batch.delete(stale.clone());
                    }
                    batch.put(key.as_bytes(), *body);
                    for fresh in index_keys.difference(&previous) {
                        batch.put(fresh.clone(), key.as_bytes());
                    }
                    if index_keys.is_empty() {
                        batch.delete(ref_key.clone());
                    } else {
                        batch.put(ref_key.clone(), encode_references(index_keys)?);
                    }
                    overlay.insert(ref_key, index_keys.clone());
                }
                Operation::Delete { .. } => {
                    for stale in &previous {
                        batch.delete(stale.clone());
                    }
                    batch.delete(key.as_bytes());
                    batch.delete(ref_key.clone());
                    overlay.insert(ref_key, BTreeSet::new());
                }
            }
        }
        Ok(batch)
    }

    fn read_references(&self, ref_key: &[u8]) -> DataResult<BTreeSet<Vec<u8>>> {
        let Some(bytes) = self.store.get(ref_key)? else {
            return Ok(BTreeSet::new());
        };
        let list: Vec<Vec<u8>> =
            bincode::deserialize(&bytes).map_err(|e| DataError::CorruptReference {
                key: hex::encode(ref_key),
                reason: e.to_string(),
            })?;
        Ok(list.into_iter().collect())
    }
}

impl fmt::Debug for DataDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataDb")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("phase", &self.gate.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use anyhow::anyhow;
    use docdb_store::{InMemoryStore, StoreError, StoreIterator, StoreResult};

    use super::*;

    const PERSON: TypeTag = TypeTag::new(1);
    const CITY: TypeTag = TypeTag::new(2);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn open() -> (Arc<InMemoryStore>, DataDb) {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let db = DataDb::open(store.clone(), DataConfig::default());
        (store, db)
    }

    fn key(tag: TypeTag, id: impl Into<Value>) -> ObjectKey {
        ObjectKey::new(tag, &id.into()).unwrap()
    }

    fn put(db: &DataDb, key: &ObjectKey, body: &str, metadata: &Metadata) {
        db.put(key, body.as_bytes(), metadata, WriteOptions::new())
            .unwrap();
    }

    fn ids(mut cursor: DataCursor) -> Vec<Value> {
        let mut out = Vec::new();
        while cursor.is_valid() {
            let key = ObjectKey::from_bytes(cursor.transient_key().unwrap().to_vec()).unwrap();
            out.push(key.id());
            cursor.next();
        }
        out
    }

    fn bodies(mut cursor: DataCursor) -> Vec<String> {
        let mut out = Vec::new();
        while cursor.is_valid() {
            out.push(String::from_utf8(cursor.transient_value().unwrap().to_vec()).unwrap());
            cursor.next();
        }
        out
    }

    /// Records every callback it sees; optionally fails some of them.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        veto_puts: bool,
        fail_did: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn log(&self, what: &str, key: &ObjectKey) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{what}:{}", key.id()));
        }
    }

    impl DataListener for Recorder {
        fn will_put(&self, event: &PutEvent<'_>) -> HookResult {
            self.log("will_put", event.key);
            if self.veto_puts {
                return Err(anyhow!("puts are forbidden"));
            }
            Ok(())
        }

        fn did_put(&self, event: &PutEvent<'_>) -> HookResult {
            self.log("did_put", event.key);
            if self.fail_did {
                return Err(anyhow!("did_put exploded"));
            }
            Ok(())
        }

        fn will_delete(&self, key: &ObjectKey) -> HookResult {
            self.log("will_delete", key);
            Ok(())
        }

        fn did_delete(&self, key: &ObjectKey) -> HookResult {
            self.log("did_delete", key);
            if self.fail_did {
                return Err(anyhow!("did_delete exploded"));
            }
            Ok(())
        }
    }

    /// Store whose batch writes can be made to fail.
    struct FlakyStore {
        inner: InMemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    impl OrderedStore for FlakyStore {
        fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> StoreResult<()> {
            self.inner.delete(key)
        }

        fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk on fire".into()));
            }
            self.inner.write_batch(batch)
        }

        fn iter(&self, range: KeyRange) -> StoreResult<Box<dyn StoreIterator>> {
            self.inner.iter(range)
        }
    }

    // ------------------------------------------------------------------
    // Basic reads and writes
    // ------------------------------------------------------------------

    #[test]
    fn put_get_overwrite_delete() {
        let (_, db) = open();
        let k = key(PERSON, "test");

        put(&db, &k, "v1", &Metadata::new());
        assert_eq!(db.get(&k).unwrap(), Some(b"v1".to_vec()));

        put(&db, &k, "v2", &Metadata::new());
        assert_eq!(db.get(&k).unwrap(), Some(b"v2".to_vec()));

        db.delete(&k, WriteOptions::new()).unwrap();
        assert_eq!(db.get(&k).unwrap(), None);
    }

    #[test]
    fn delete_of_absent_key_is_ok() {
        let (store, db) = open();
        db.delete(&key(PERSON, "ghost"), WriteOptions::new())
            .unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn zero_byte_in_index_value_is_rejected_before_hooks() {
        let (store, db) = open();
        let ran = AtomicBool::new(false);
        let metadata = Metadata::new().with("Name", Value::single(b"a\0b"));

        let err = db
            .put(
                &key(PERSON, "x"),
                b"body",
                &metadata,
                WriteOptions::new().anticipate(|| {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap_err();

        assert!(matches!(err, DataError::InvalidKeyField(_)));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn data_survives_reopen() {
        let (store, db) = open();
        let k = key(PERSON, "aaa");
        put(&db, &k, "body", &Metadata::new().with("Name", "n"));
        db.close();

        let reopened = DataDb::open(store, DataConfig::default());
        assert_eq!(reopened.get(&k).unwrap(), Some(b"body".to_vec()));
        assert_eq!(
            ids(reopened
                .find_by_index(PERSON, "Name", &Value::single("n"), false)
                .unwrap()),
            [Value::single("aaa")]
        );
    }

    // ------------------------------------------------------------------
    // Finds
    // ------------------------------------------------------------------

    #[test]
    fn find_all_by_type_is_ordered_and_isolated() {
        let (_, db) = open();
        put(&db, &key(PERSON, "b"), "pb", &Metadata::new());
        put(&db, &key(PERSON, "a"), "pa", &Metadata::new());
        put(&db, &key(CITY, "a"), "ca", &Metadata::new());

        assert_eq!(bodies(db.find_all_by_type(PERSON).unwrap()), ["pa", "pb"]);
        assert_eq!(bodies(db.find_all_by_type(CITY).unwrap()), ["ca"]);
        assert_eq!(bodies(db.find_all().unwrap()), ["pa", "pb", "ca"]);
        assert!(!db.find_all_by_type(TypeTag::new(3)).unwrap().is_valid());
    }

    #[test]
    fn find_by_id_closed_matches_whole_fields() {
        let (_, db) = open();
        put(&db, &key(PERSON, ["aaa", "a"]), "A", &Metadata::new());
        put(&db, &key(PERSON, ["aaa", "b"]), "B", &Metadata::new());
        put(&db, &key(PERSON, "aaab"), "C", &Metadata::new());

        let found = ids(db.find_by_id(PERSON, &Value::single("aaa"), false).unwrap());
        assert_eq!(found, [Value::of(["aaa", "a"]), Value::of(["aaa", "b"])]);
    }

    #[test]
    fn find_by_id_open_matches_partial_last_field() {
        let (_, db) = open();
        put(&db, &key(PERSON, ["aaa", "a"]), "A", &Metadata::new());
        put(&db, &key(PERSON, "aaab"), "C", &Metadata::new());
        put(&db, &key(PERSON, "ab"), "D", &Metadata::new());

        assert_eq!(
            bodies(db.find_by_id(PERSON, &Value::single("aa"), true).unwrap()),
            ["A", "C"]
        );
        assert!(!db
            .find_by_id(PERSON, &Value::single("aa"), false)
            .unwrap()
            .is_valid());
    }

    #[test]
    fn index_cursor_exposes_object_key_body_and_entry_key() {
        let (_, db) = open();
        let k = key(PERSON, "aaa");
        let metadata = Metadata::new()
            .with("Symbols", "alpha")
            .with("Symbols", "beta")
            .with("Numbers", Value::of(["gamma", "delta"]));
        put(&db, &k, "body", &metadata);

        let cursor = db
            .find_by_index(PERSON, "Numbers", &Value::of(["gamma", "delta"]), false)
            .unwrap();
        assert!(cursor.is_index());
        assert_eq!(cursor.transient_key().unwrap(), k.as_bytes());
        assert_eq!(cursor.transient_value().unwrap(), b"body");
        let parts = codec::decode_index_key(cursor.transient_seek_key().unwrap(), k.as_bytes())
            .unwrap();
        assert_eq!(parts.name, "Numbers");
        assert_eq!(parts.value, Value::of(["gamma", "delta"]));

        assert_eq!(ids(db.find_all_by_index(PERSON, "Symbols").unwrap()).len(), 2);
        assert_eq!(
            ids(db
                .find_by_index(PERSON, "Numbers", &Value::single("gam"), true)
                .unwrap()),
            [Value::single("aaa")]
        );
    }

    #[test]
    fn index_cursor_walks_backwards_symmetrically() {
        let (_, db) = open();
        for (id, last) in [("1", "Doe"), ("2", "Adams"), ("3", "Doe"), ("4", "Zed")] {
            put(&db, &key(PERSON, id), id, &Metadata::new().with("Last", last));
        }

        let mut cursor = db.find_all_by_index(PERSON, "Last").unwrap();
        let mut forward = Vec::new();
        while cursor.is_valid() {
            forward.push((
                cursor.transient_key().unwrap().to_vec(),
                cursor.transient_value().unwrap().to_vec(),
            ));
            cursor.next();
        }

        cursor.seek_to_last();
        let mut backward = Vec::new();
        while cursor.is_valid() {
            backward.push((
                cursor.transient_key().unwrap().to_vec(),
                cursor.transient_value().unwrap().to_vec(),
            ));
            cursor.prev();
        }
        backward.reverse();

        assert_eq!(forward.len(), 4);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].1, b"2");
        assert_eq!(forward[3].1, b"4");
    }

    #[test]
    fn index_entries_are_ordered_by_value_then_id() {
        let (_, db) = open();
        put(&db, &key(PERSON, "1"), "Doe", &Metadata::new().with("Last", "Doe"));
        put(&db, &key(PERSON, "2"), "Adams", &Metadata::new().with("Last", "Adams"));
        put(&db, &key(PERSON, "0"), "Doe", &Metadata::new().with("Last", "Doe"));

        assert_eq!(
            ids(db.find_all_by_index(PERSON, "Last").unwrap()),
            [Value::single("2"), Value::single("0"), Value::single("1")]
        );
    }

    // ------------------------------------------------------------------
    // Index maintenance
    // ------------------------------------------------------------------

    #[test]
    fn rewrite_replaces_stale_index_entries() {
        let (_, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v1", &Metadata::new().with("Name", "old").with("Keep", "k"));
        put(&db, &k, "v2", &Metadata::new().with("Name", "new").with("Keep", "k"));

        let by = |value: &str| {
            ids(db
                .find_by_index(PERSON, "Name", &Value::single(value), false)
                .unwrap())
        };
        assert!(by("old").is_empty());
        assert_eq!(by("new"), [Value::single("x")]);
        assert_eq!(ids(db.find_all_by_index(PERSON, "Keep").unwrap()).len(), 1);
        assert_eq!(
            db.get_indexes_of(&k).unwrap().into_iter().collect::<Vec<_>>(),
            ["Keep", "Name"]
        );
    }

    #[test]
    fn multi_value_index_is_replaced_as_a_set() {
        let (_, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v1", &Metadata::new().with("Idx", "v1").with("Idx", "v2"));
        assert_eq!(ids(db.find_all_by_index(PERSON, "Idx").unwrap()).len(), 2);

        put(&db, &k, "v2", &Metadata::new().with("Idx", "v3"));

        let by = |value: &str| {
            db.find_by_index(PERSON, "Idx", &Value::single(value), false)
                .unwrap()
        };
        assert!(!by("v1").is_valid());
        assert!(!by("v2").is_valid());
        let cursor = by("v3");
        assert_eq!(cursor.transient_key().unwrap(), k.as_bytes());
        assert_eq!(ids(cursor), [Value::single("x")]);
        assert_eq!(ids(db.find_all_by_index(PERSON, "Idx").unwrap()).len(), 1);
    }

    #[test]
    fn delete_removes_every_trace() {
        let (store, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v", &Metadata::new().with("Name", "n").with("Tag", "t"));
        db.delete(&k, WriteOptions::new()).unwrap();

        assert!(store.is_empty().unwrap());
        assert!(db.get_indexes_of(&k).unwrap().is_empty());
    }

    #[test]
    fn put_without_metadata_drops_reference_entry() {
        let (store, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v1", &Metadata::new().with("Name", "n"));
        put(&db, &k, "v2", &Metadata::new());

        assert_eq!(store.keys().unwrap(), vec![k.as_bytes().to_vec()]);
    }

    // ------------------------------------------------------------------
    // Anticipation
    // ------------------------------------------------------------------

    #[test]
    fn anticipate_veto_changes_nothing() {
        let (store, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v1", &Metadata::new().with("Name", "a"));
        let before = store.keys().unwrap();

        let err = db
            .put(
                &k,
                b"v2",
                &Metadata::new().with("Name", "b"),
                WriteOptions::new().anticipate(|| Err(anyhow!("no"))),
            )
            .unwrap_err();
        assert!(matches!(err, DataError::AnticipationAborted(_)));
        assert_eq!(store.keys().unwrap(), before);
        assert_eq!(db.get(&k).unwrap(), Some(b"v1".to_vec()));

        let err = db
            .delete(&k, WriteOptions::new().anticipate(|| Err(anyhow!("no"))))
            .unwrap_err();
        assert!(matches!(err, DataError::AnticipationAborted(_)));
        assert_eq!(store.keys().unwrap(), before);
    }

    #[test]
    fn anticipate_sees_pre_commit_state() {
        let (_, db) = open();
        let k = key(PERSON, "x");
        put(&db, &k, "v1", &Metadata::new());

        let seen = Mutex::new(None);
        db.put(
            &k,
            b"v2",
            &Metadata::new(),
            WriteOptions::new().anticipate(|| {
                *seen.lock().unwrap() = Some((db.get(&k)?, db.phase()));
                Ok(())
            }),
        )
        .unwrap();

        assert_eq!(
            seen.into_inner().unwrap(),
            Some((Some(b"v1".to_vec()), WritePhase::Anticipating))
        );
        assert_eq!(db.phase(), WritePhase::Idle);
    }

    #[test]
    fn commit_hooks_run_under_the_lock_before_react() {
        let (store, db) = open();
        let k = key(PERSON, "x");
        let log = Mutex::new(Vec::new());

        db.put(
            &k,
            b"v",
            &Metadata::new(),
            WriteOptions::new()
                .entry(b"extra".to_vec(), b"side".to_vec())
                .react(|| {
                    log.lock().unwrap().push(("react", db.phase()));
                    Ok(())
                })
                .on_commit(|| {
                    assert_eq!(store.get(b"extra").unwrap(), Some(b"side".to_vec()));
                    log.lock().unwrap().push(("commit", db.phase()));
                }),
        )
        .unwrap();

        assert_eq!(
            log.into_inner().unwrap(),
            [
                ("commit", WritePhase::Committing),
                ("react", WritePhase::Idle)
            ]
        );
    }

    #[test]
    fn vetoed_write_skips_commit_hooks_and_entries() {
        let (store, db) = open();
        let committed = AtomicBool::new(false);

        let err = db
            .put(
                &key(PERSON, "x"),
                b"v",
                &Metadata::new(),
                WriteOptions::new()
                    .entry(b"extra".to_vec(), b"side".to_vec())
                    .on_commit(|| committed.store(true, Ordering::SeqCst))
                    .anticipate(|| Err(anyhow!("no"))),
            )
            .unwrap_err();

        assert!(matches!(err, DataError::AnticipationAborted(_)));
        assert!(!committed.load(Ordering::SeqCst));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn listener_veto_aborts_and_skips_caller_hooks() {
        let (store, db) = open();
        db.register(Arc::new(Recorder {
            veto_puts: true,
            ..Default::default()
        }));
        let caller_ran = AtomicBool::new(false);

        let err = db
            .put(
                &key(PERSON, "x"),
                b"v",
                &Metadata::new(),
                WriteOptions::new().anticipate(|| {
                    caller_ran.store(true, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap_err();

        assert!(matches!(err, DataError::AnticipationAborted(_)));
        assert!(!caller_ran.load(Ordering::SeqCst));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn write_from_anticipate_hook_is_reentrant() {
        let (store, db) = open();
        let inner = Mutex::new(None);
        let other = key(PERSON, "other");

        let err = db
            .put(
                &key(PERSON, "x"),
                b"v",
                &Metadata::new(),
                WriteOptions::new().anticipate(|| {
                    let result = db.put(&other, b"nested", &Metadata::new(), WriteOptions::new());
                    let reentrant = matches!(result, Err(DataError::ReentrantWrite));
                    *inner.lock().unwrap() = Some(reentrant);
                    result.map_err(Into::into)
                }),
            )
            .unwrap_err();

        assert!(matches!(err, DataError::AnticipationAborted(_)));
        assert_eq!(*inner.lock().unwrap(), Some(true));
        assert!(store.is_empty().unwrap());
    }

    // ------------------------------------------------------------------
    // Notification
    // ------------------------------------------------------------------

    #[test]
    fn listeners_see_will_then_did() {
        let (_, db) = open();
        let recorder = Arc::new(Recorder::default());
        db.register(recorder.clone());
        let k = key(PERSON, "x");

        put(&db, &k, "v", &Metadata::new());
        db.delete(&k, WriteOptions::new()).unwrap();

        assert_eq!(
            recorder.calls(),
            ["will_put:x", "did_put:x", "will_delete:x", "did_delete:x"]
        );
    }

    #[test]
    fn failing_did_keeps_write_and_reaches_every_listener() {
        let (_, db) = open();
        let failing = Arc::new(Recorder {
            fail_did: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        db.register(failing.clone());
        db.register(healthy.clone());
        let k = key(PERSON, "x");

        let err = db
            .put(
                &k,
                b"v",
                &Metadata::new(),
                WriteOptions::new().react(|| Err(anyhow!("react failed"))),
            )
            .unwrap_err();

        match err {
            DataError::ListenerFailure(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors.first().unwrap().to_string(), "react failed");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(db.get(&k).unwrap(), Some(b"v".to_vec()));
        assert_eq!(healthy.calls(), ["will_put:x", "did_put:x"]);
    }

    #[test]
    fn unregistered_listener_is_not_called() {
        let (_, db) = open();
        let recorder = Arc::new(Recorder::default());
        let id = db.register(recorder.clone());
        assert_eq!(db.listener_count(), 1);
        assert!(db.unregister(id));

        put(&db, &key(PERSON, "x"), "v", &Metadata::new());
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn react_hook_may_write() {
        let (_, db) = open();
        let follow_up = key(CITY, "log");

        db.put(
            &key(PERSON, "x"),
            b"v",
            &Metadata::new(),
            WriteOptions::new().react(|| {
                db.put(&follow_up, b"logged", &Metadata::new(), WriteOptions::new())?;
                Ok(())
            }),
        )
        .unwrap();

        assert_eq!(db.get(&follow_up).unwrap(), Some(b"logged".to_vec()));
    }

    // ------------------------------------------------------------------
    // Storage failures and durability
    // ------------------------------------------------------------------

    #[test]
    fn storage_failure_skips_notification() {
        init_tracing();
        let store = Arc::new(FlakyStore::new());
        let db = DataDb::open(store.clone(), DataConfig::default());
        let recorder = Arc::new(Recorder::default());
        db.register(recorder.clone());
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = db
            .put(&key(PERSON, "x"), b"v", &Metadata::new(), WriteOptions::new())
            .unwrap_err();

        assert!(matches!(err, DataError::StorageFailure(_)));
        assert_eq!(recorder.calls(), ["will_put:x"]);
        assert!(store.inner.is_empty().unwrap());
        assert_eq!(db.phase(), WritePhase::Idle);
    }

    #[test]
    fn sync_flag_reaches_the_store() {
        struct SyncRecorder {
            inner: InMemoryStore,
            last_sync: Mutex<Option<bool>>,
        }

        impl OrderedStore for SyncRecorder {
            fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
                self.inner.get(key)
            }
            fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
                self.inner.put(key, value)
            }
            fn delete(&self, key: &[u8]) -> StoreResult<()> {
                self.inner.delete(key)
            }
            fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
                *self.last_sync.lock().unwrap() = Some(batch.is_sync());
                self.inner.write_batch(batch)
            }
            fn iter(&self, range: KeyRange) -> StoreResult<Box<dyn StoreIterator>> {
                self.inner.iter(range)
            }
        }

        let store = Arc::new(SyncRecorder {
            inner: InMemoryStore::new(),
            last_sync: Mutex::new(None),
        });
        let db = DataDb::open(store.clone(), DataConfig { sync_writes: true });
        let k = key(PERSON, "x");

        db.put(&k, b"v", &Metadata::new(), WriteOptions::new())
            .unwrap();
        assert_eq!(*store.last_sync.lock().unwrap(), Some(true));

        db.put(&k, b"v", &Metadata::new(), WriteOptions::new().sync(false))
            .unwrap();
        assert_eq!(*store.last_sync.lock().unwrap(), Some(false));
    }
}
