use tokio::sync::watch;

/// Reactive snapshot of a mirrored collection. `loading` stays true until the
/// first snapshot (or a cleared no-circle state) arrives.
#[derive(Debug, Clone)]
pub struct MirrorState<T> {
    pub items: Vec<T>,
    pub loading: bool,
}

impl<T> Default for MirrorState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: true,
        }
    }
}

/// In-memory reactive container mirroring a remote collection. Holds whatever
/// the last delivered snapshot said, nothing more: the mirror is only as fresh
/// as its last snapshot and never the authority.
pub struct Mirror<T> {
    tx: watch::Sender<MirrorState<T>>,
}

impl<T: Clone> Mirror<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MirrorState::default());
        Self { tx }
    }

    pub fn watch(&self) -> watch::Receiver<MirrorState<T>> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> MirrorState<T> {
        self.tx.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.tx.borrow().items.clone()
    }

    pub fn loading(&self) -> bool {
        self.tx.borrow().loading
    }

    /// Replaces the mirrored list with a fresh full snapshot.
    pub fn replace(&self, items: Vec<T>) {
        self.tx.send_replace(MirrorState {
            items,
            loading: false,
        });
    }

    /// Empties the mirror (circle went away) and settles the loading flag.
    pub fn clear(&self) {
        self.tx.send_replace(MirrorState {
            items: Vec::new(),
            loading: false,
        });
    }

    /// Keeps the current items but settles the loading flag; used when a
    /// subscription errors after having delivered data.
    pub fn finish_loading(&self) {
        self.tx.send_modify(|state| state.loading = false);
    }
}

impl<T: Clone> Default for Mirror<T> {
    fn default() -> Self {
        Self::new()
    }
}
