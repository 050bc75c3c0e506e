use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use watchpack::types::NativeEventKind;
use watchpack::watch::native::{NativeSender, NativeSignal, NativeWatcher, NativeWatcherFactory};

/// A fake native backend that:
/// - records which directories are subscribed
/// - lets tests inject notifications, rescans and errors by hand.
#[derive(Debug, Clone, Default)]
pub struct FakeNative {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Default)]
struct FakeState {
    senders: Vec<NativeSender>,
    subscriptions: BTreeMap<PathBuf, usize>,
    failures: HashMap<PathBuf, io::ErrorKind>,
    polls: Vec<Option<Duration>>,
}

struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl NativeWatcher for FakeBackend {
    fn subscribe(&mut self, dir: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.failures.get(dir) {
            return Err(io::Error::from(*kind));
        }
        *state.subscriptions.entry(dir.to_path_buf()).or_insert(0) += 1;
        Ok(())
    }

    fn unsubscribe(&mut self, dir: &Path) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.subscriptions.get_mut(dir) {
            *count -= 1;
            if *count == 0 {
                state.subscriptions.remove(dir);
            }
        }
    }
}

impl NativeWatcherFactory for FakeNative {
    fn create(
        &self,
        poll: Option<Duration>,
        tx: NativeSender,
    ) -> anyhow::Result<Box<dyn NativeWatcher>> {
        let mut state = self.state.lock().unwrap();
        state.senders.push(tx);
        state.polls.push(poll);
        Ok(Box::new(FakeBackend {
            state: Arc::clone(&self.state),
        }))
    }
}

impl FakeNative {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&self, signal: impl Fn() -> NativeSignal) {
        let state = self.state.lock().unwrap();
        for tx in &state.senders {
            let _ = tx.send(signal());
        }
    }

    /// Report a notification for `path` on every backend.
    pub fn emit(&self, path: impl AsRef<Path>, kind: NativeEventKind) {
        let path = path.as_ref().to_path_buf();
        self.send(|| NativeSignal::Event {
            kind,
            paths: vec![path.clone()],
        });
    }

    pub fn rescan(&self) {
        self.send(|| NativeSignal::Rescan);
    }

    pub fn error(&self, path: impl AsRef<Path>, kind: io::ErrorKind) {
        let path = path.as_ref().to_path_buf();
        self.send(|| NativeSignal::Error {
            paths: vec![path.clone()],
            error: io::Error::from(kind),
        });
    }

    /// Make future subscriptions of `dir` fail with `kind`.
    pub fn fail_subscribe(&self, dir: impl AsRef<Path>, kind: io::ErrorKind) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(dir.as_ref().to_path_buf(), kind);
    }

    /// Currently subscribed directories, sorted.
    pub fn subscriptions(&self) -> Vec<PathBuf> {
        let state = self.state.lock().unwrap();
        state.subscriptions.keys().cloned().collect()
    }

    pub fn is_subscribed(&self, dir: impl AsRef<Path>) -> bool {
        let state = self.state.lock().unwrap();
        state.subscriptions.contains_key(dir.as_ref())
    }

    /// Poll settings of every backend created so far.
    pub fn backends(&self) -> Vec<Option<Duration>> {
        self.state.lock().unwrap().polls.clone()
    }
}
