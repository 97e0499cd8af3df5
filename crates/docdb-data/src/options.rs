use std::fmt;

/// Outcome of a hook or listener callback.
pub type HookResult = anyhow::Result<()>;

/// A one-shot callback attached to a single write.
pub type Hook<'a> = Box<dyn FnOnce() -> HookResult + 'a>;

/// An infallible callback run under the write lock once the batch is applied.
pub type CommitHook<'a> = Box<dyn FnOnce() + 'a>;

/// Per-write hooks, extra store entries and durability flag.
///
/// Anticipate hooks run under the write lock before anything is written; an
/// error from any of them aborts the write. Extra entries go into the same
/// store batch as the write itself. Commit hooks run under the lock right
/// after that batch is applied, before any other writer can start. React
/// hooks run once after the lock is released; their errors are reported but
/// do not undo the write.
///
/// ```
/// use docdb_data::WriteOptions;
///
/// let options = WriteOptions::new()
///     .anticipate(|| Ok(()))
///     .react(|| Ok(()))
///     .sync(true);
/// assert_eq!(options.anticipate_count(), 1);
/// ```
#[derive(Default)]
pub struct WriteOptions<'a> {
    pub(crate) anticipate: Vec<Hook<'a>>,
    pub(crate) react: Vec<Hook<'a>>,
    pub(crate) commit: Vec<CommitHook<'a>>,
    pub(crate) entries: Vec<(Vec<u8>, Vec<u8>)>,
    pub(crate) sync: Option<bool>,
}

impl<'a> WriteOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pre-commit check.
    pub fn anticipate(mut self, hook: impl FnOnce() -> HookResult + 'a) -> Self {
        self.anticipate.push(Box::new(hook));
        self
    }

    /// Add a post-commit callback.
    pub fn react(mut self, hook: impl FnOnce() -> HookResult + 'a) -> Self {
        self.react.push(Box::new(hook));
        self
    }

    /// Add a callback that runs under the write lock once the write is in the
    /// store. Skipped when the write is vetoed or fails.
    pub fn on_commit(mut self, hook: impl FnOnce() + 'a) -> Self {
        self.commit.push(Box::new(hook));
        self
    }

    /// Write a raw store entry atomically with this write.
    pub fn entry(mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Override the configured durability for this write.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Run `first`'s hooks ahead of these ones.
    ///
    /// An explicit durability choice on `self` wins over one on `first`.
    pub fn after(mut self, mut first: WriteOptions<'a>) -> Self {
        first.anticipate.append(&mut self.anticipate);
        first.react.append(&mut self.react);
        first.commit.append(&mut self.commit);
        first.entries.append(&mut self.entries);
        Self {
            anticipate: first.anticipate,
            react: first.react,
            commit: first.commit,
            entries: first.entries,
            sync: self.sync.or(first.sync),
        }
    }

    pub fn anticipate_count(&self) -> usize {
        self.anticipate.len()
    }

    pub fn react_count(&self) -> usize {
        self.react.len()
    }

    pub fn commit_count(&self) -> usize {
        self.commit.len()
    }
}

impl fmt::Debug for WriteOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("anticipate", &self.anticipate.len())
            .field("react", &self.react.len())
            .field("commit", &self.commit.len())
            .field("entries", &self.entries.len())
            .field("sync", &self.sync)
            .finish()
    }
}
