use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::services::download::{Download, ProgressObserver};

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Folds the progress of every download in a shared list into one percentage.
///
/// The list is owned by the caller; call [`CombinedProgressWatcher::list_updated`]
/// after changing its membership.
#[derive(Clone)]
pub struct CombinedProgressWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    id: u64,
    downloads: Arc<Mutex<Vec<Download>>>,
    state: Mutex<WatcherState>,
    callback: ProgressCallback,
}

#[derive(Default)]
struct WatcherState {
    entries: Vec<(Download, u8)>,
    last_reported: u8,
}

impl CombinedProgressWatcher {
    pub fn new<F>(downloads: Arc<Mutex<Vec<Download>>>, callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        let watcher = Self {
            inner: Arc::new(WatcherInner {
                id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
                downloads,
                state: Mutex::new(WatcherState::default()),
                callback: Arc::new(callback),
            }),
        };
        watcher.list_updated();
        watcher
    }

    pub fn list_updated(&self) {
        let current: Vec<Download> = lock(&self.inner.downloads).clone();
        let observer = self.observer();

        let notify = {
            let mut state = lock(&self.inner.state);
            state.entries.retain(|(download, _)| {
                let keep = current.contains(download);
                if !keep {
                    download.remove_progress_observer(self.inner.id);
                }
                keep
            });
            for download in &current {
                if state.entries.iter().any(|(existing, _)| existing == download) {
                    continue;
                }
                download.add_progress_observer(self.inner.id, Arc::clone(&observer));
                state.entries.push((download.clone(), 0));
            }

            if state.entries.is_empty() {
                state.last_reported = 0;
                None
            } else {
                state.refresh()
            }
        };

        if let Some(value) = notify {
            (self.inner.callback)(value);
        }
    }

    pub fn update_progress(&self, download: &Download, percent: u8) {
        self.inner.update_path(&download.destination, percent);
    }

    pub fn num_downloads(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    pub fn progress_list(&self) -> Vec<u8> {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|(_, percent)| *percent)
            .collect()
    }

    pub fn progress(&self) -> u8 {
        lock(&self.inner.state).aggregate()
    }

    fn observer(&self) -> ProgressObserver {
        let weak: Weak<WatcherInner> = Arc::downgrade(&self.inner);
        Arc::new(move |path: &Path, percent: u8| {
            if let Some(inner) = weak.upgrade() {
                inner.update_path(path, percent);
            }
        })
    }
}

impl WatcherInner {
    fn update_path(&self, path: &Path, percent: u8) {
        let notify = {
            let mut state = lock(&self.state);
            let entry = state
                .entries
                .iter_mut()
                .find(|(download, _)| download.destination == path);
            match entry {
                Some((_, stored)) => *stored = percent.min(100),
                None => return,
            }
            state.refresh()
        };
        if let Some(value) = notify {
            (self.callback)(value);
        }
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        let state = lock(&self.state);
        for (download, _) in &state.entries {
            download.remove_progress_observer(self.id);
        }
    }
}

impl WatcherState {
    fn aggregate(&self) -> u8 {
        if self.entries.is_empty() {
            return 0;
        }
        let sum: u64 = self.entries.iter().map(|(_, percent)| u64::from(*percent)).sum();
        (sum / self.entries.len() as u64) as u8
    }

    fn refresh(&mut self) -> Option<u8> {
        let value = self.aggregate();
        if value == self.last_reported {
            return None;
        }
        self.last_reported = value;
        Some(value)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value| sink.lock().expect("recorder lock").push(value))
    }

    fn download(name: &str) -> Download {
        Download::new("https://cdn.example/pkg", format!("/tmp/watcher/{name}"))
    }

    #[test]
    fn aggregate_is_floor_of_mean() {
        let first = download("a");
        let second = download("b");
        let third = download("c");
        let list = Arc::new(Mutex::new(vec![first.clone(), second.clone(), third.clone()]));
        let (seen, callback) = recorder();
        let watcher = CombinedProgressWatcher::new(list, callback);

        watcher.update_progress(&first, 100);
        watcher.update_progress(&second, 50);
        watcher.update_progress(&third, 1);

        assert_eq!(watcher.progress(), 50);
        assert_eq!(watcher.progress_list(), vec![100, 50, 1]);
        assert_eq!(*seen.lock().expect("seen"), vec![33, 50]);
    }

    #[test]
    fn unchanged_aggregate_does_not_refire() {
        let first = download("a");
        let second = download("b");
        let list = Arc::new(Mutex::new(vec![first.clone(), second.clone()]));
        let (seen, callback) = recorder();
        let watcher = CombinedProgressWatcher::new(list, callback);

        watcher.update_progress(&first, 12);
        watcher.update_progress(&second, 88);
        watcher.update_progress(&first, 13);
        watcher.update_progress(&second, 87);

        assert_eq!(watcher.progress(), 50);
        assert_eq!(*seen.lock().expect("seen"), vec![6, 50]);
    }

    #[test]
    fn emptying_the_list_is_silent() {
        let only = download("a");
        let list = Arc::new(Mutex::new(vec![only.clone()]));
        let (seen, callback) = recorder();
        let watcher = CombinedProgressWatcher::new(Arc::clone(&list), callback);

        watcher.update_progress(&only, 40);
        list.lock().expect("list").clear();
        watcher.list_updated();

        assert_eq!(watcher.num_downloads(), 0);
        assert_eq!(watcher.progress(), 0);
        assert_eq!(*seen.lock().expect("seen"), vec![40]);
    }

    #[test]
    fn membership_tracks_list_and_observers_follow() {
        let first = download("a");
        let second = download("b");
        let list = Arc::new(Mutex::new(vec![first.clone()]));
        let (seen, callback) = recorder();
        let watcher = CombinedProgressWatcher::new(Arc::clone(&list), callback);

        first.set_progress(80);
        assert_eq!(watcher.progress(), 80);

        list.lock().expect("list").push(second.clone());
        watcher.list_updated();
        watcher.list_updated();
        assert_eq!(watcher.num_downloads(), 2);
        assert_eq!(watcher.progress_list(), vec![80, 0]);

        list.lock().expect("list").retain(|item| item != &first);
        watcher.list_updated();
        first.set_progress(100);
        second.set_progress(30);

        assert_eq!(watcher.progress_list(), vec![30]);
        assert_eq!(*seen.lock().expect("seen"), vec![80, 40, 0, 30]);
    }

    #[test]
    fn updates_for_unknown_downloads_are_ignored() {
        let list = Arc::new(Mutex::new(vec![download("a")]));
        let (seen, callback) = recorder();
        let watcher = CombinedProgressWatcher::new(list, callback);

        watcher.update_progress(&download("zzz"), 90);

        assert_eq!(watcher.progress(), 0);
        assert!(seen.lock().expect("seen").is_empty());
    }
}
