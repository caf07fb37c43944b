use std::collections::{HashMap, VecDeque};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use sysinfo::Disks;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{watch, Notify};

use crate::config::DownloadConfig;
use crate::errors::{LauncherError, Result};
use crate::services::download::{
    CancelTarget, Download, DownloadCallbacks, DownloadEvent, DownloadGroup, DownloadListener,
    DownloadState, ListenerId,
};
use crate::services::manifest_service::{self, DownloadManifest};
use crate::services::progress_watcher::CombinedProgressWatcher;
use crate::utils::crypto::{compute_file_hex, matches_checksum};
use crate::utils::file::remove_file_if_exists;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DownloadControl {
    Running,
    Paused,
    Stopped,
    Cancelled,
}

impl DownloadControl {
    fn from_target(target: CancelTarget) -> Self {
        match target {
            CancelTarget::Canceled => DownloadControl::Cancelled,
            CancelTarget::Stopped => DownloadControl::Stopped,
            CancelTarget::Paused => DownloadControl::Paused,
        }
    }

    fn interruption(self) -> Option<CancelTarget> {
        match self {
            DownloadControl::Running => None,
            DownloadControl::Paused => Some(CancelTarget::Paused),
            DownloadControl::Stopped => Some(CancelTarget::Stopped),
            DownloadControl::Cancelled => Some(CancelTarget::Canceled),
        }
    }
}

enum TransferOutcome {
    Completed,
    Interrupted(CancelTarget),
}

enum MemberEnd {
    Interrupted(CancelTarget),
    Failed(String),
}

impl MemberEnd {
    fn state(&self) -> DownloadState {
        match self {
            MemberEnd::Interrupted(target) => target.state(),
            MemberEnd::Failed(_) => DownloadState::Failed,
        }
    }

    fn message(&self) -> Option<String> {
        match self {
            MemberEnd::Interrupted(_) => None,
            MemberEnd::Failed(message) => Some(message.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lane {
    Game,
    Asset,
}

struct GroupState {
    members: Vec<Download>,
    callbacks: Option<Arc<dyn DownloadCallbacks>>,
    // Keeps the member observers alive for the lifetime of the group.
    _watcher: CombinedProgressWatcher,
    completed: AtomicUsize,
    settled: AtomicBool,
}

impl GroupState {
    fn new(group: DownloadGroup) -> Arc<Self> {
        let DownloadGroup {
            downloads,
            callbacks,
        } = group;
        let progress_callbacks = callbacks.clone();
        let watcher = CombinedProgressWatcher::new(
            Arc::new(Mutex::new(downloads.clone())),
            move |percent| {
                if let Some(callbacks) = progress_callbacks.as_ref() {
                    callbacks.on_progress(percent);
                }
            },
        );
        Arc::new(Self {
            members: downloads,
            callbacks,
            _watcher: watcher,
            completed: AtomicUsize::new(0),
            settled: AtomicBool::new(false),
        })
    }

    fn lane(&self) -> Lane {
        if !self.members.is_empty() && self.members.iter().all(|member| member.kind.is_asset()) {
            Lane::Asset
        } else {
            Lane::Game
        }
    }

    fn first_path(&self) -> PathBuf {
        self.members
            .first()
            .map(|member| member.destination.clone())
            .unwrap_or_default()
    }

    /// Marks the group as reported. Returns false if it already was.
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct QueuedDownload {
    download: Download,
    group: Arc<GroupState>,
}

struct ActiveTransfer {
    download: Download,
    group: Arc<GroupState>,
    control: watch::Sender<DownloadControl>,
}

struct ActiveJob {
    download: Download,
    group: Arc<GroupState>,
    control: watch::Receiver<DownloadControl>,
}

#[derive(Default)]
struct ManagerState {
    game_queue: VecDeque<QueuedDownload>,
    asset_queue: VecDeque<QueuedDownload>,
    active: HashMap<PathBuf, ActiveTransfer>,
    paused: Vec<QueuedDownload>,
}

impl ManagerState {
    fn queue_mut(&mut self, lane: Lane) -> &mut VecDeque<QueuedDownload> {
        match lane {
            Lane::Game => &mut self.game_queue,
            Lane::Asset => &mut self.asset_queue,
        }
    }

    fn find(&self, path: &Path) -> Option<Download> {
        if let Some(active) = self.active.get(path) {
            return Some(active.download.clone());
        }
        self.game_queue
            .iter()
            .chain(self.asset_queue.iter())
            .chain(self.paused.iter())
            .find(|job| job.download.destination == path)
            .map(|job| job.download.clone())
    }

    fn take_queued(&mut self, group: &Arc<GroupState>) -> Vec<QueuedDownload> {
        let mut taken = Vec::new();
        for lane in [Lane::Game, Lane::Asset] {
            let queue = self.queue_mut(lane);
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(job) = queue.pop_front() {
                if Arc::ptr_eq(&job.group, group) {
                    taken.push(job);
                } else {
                    kept.push_back(job);
                }
            }
            *queue = kept;
        }
        taken
    }

    fn take_queued_path(&mut self, path: &Path) -> Option<QueuedDownload> {
        for lane in [Lane::Game, Lane::Asset] {
            let queue = self.queue_mut(lane);
            if let Some(index) = queue.iter().position(|job| job.download.destination == path) {
                return queue.remove(index);
            }
        }
        None
    }
}

struct ManagerInner {
    client: reqwest::Client,
    config: DownloadConfig,
    state: Mutex<ManagerState>,
    game_signal: Arc<Notify>,
    asset_signal: Arc<Notify>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn DownloadListener>)>>,
    next_listener: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.game_signal.notify_waiters();
        self.asset_signal.notify_waiters();
    }
}

/// Queue-driven transfer engine. One worker drains the game queue in FIFO
/// order, `asset_workers` workers drain the asset queue, and `download_now`
/// transfers run on their own tasks.
///
/// Must be constructed inside a tokio runtime.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let mut client_builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .tcp_nodelay(true);

        if config.disable_system_proxy {
            client_builder = client_builder.no_proxy();
        }

        if let Some(proxy_url) = config.proxy.as_deref() {
            match reqwest::Proxy::all(proxy_url) {
                Ok(proxy) => {
                    client_builder = client_builder.proxy(proxy);
                    tracing::info!("using launcher proxy: {}", proxy_url);
                }
                Err(err) => tracing::warn!("invalid LAUNCHER_PROXY '{}': {}", proxy_url, err),
            }
        }

        let client = client_builder.build()?;
        let asset_workers = config.asset_workers.max(1);
        let manager = Self {
            inner: Arc::new(ManagerInner {
                client,
                config,
                state: Mutex::new(ManagerState::default()),
                game_signal: Arc::new(Notify::new()),
                asset_signal: Arc::new(Notify::new()),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        };

        let weak = Arc::downgrade(&manager.inner);
        tokio::spawn(worker_loop(
            weak.clone(),
            Arc::clone(&manager.inner.game_signal),
            Lane::Game,
        ));
        for _ in 0..asset_workers {
            tokio::spawn(worker_loop(
                weak.clone(),
                Arc::clone(&manager.inner.asset_signal),
                Lane::Asset,
            ));
        }
        Ok(manager)
    }

    pub async fn fetch_manifest(&self, url: &str) -> Result<DownloadManifest> {
        manifest_service::fetch_manifest(&self.inner.client, url).await
    }

    pub fn enqueue(&self, download: Download) -> bool {
        self.enqueue_group(DownloadGroup::from(download))
    }

    /// Queues every member of `group` in order. A group with any member whose
    /// destination is already queued, active or paused is ignored as a whole.
    pub fn enqueue_group(&self, group: DownloadGroup) -> bool {
        if group.downloads.is_empty() {
            return false;
        }
        let group = GroupState::new(group);
        let lane = group.lane();

        let duplicate = {
            let mut state = self.lock_state();
            let duplicate = group
                .members
                .iter()
                .find_map(|member| state.find(&member.destination));
            if duplicate.is_none() {
                for member in &group.members {
                    member.set_state(DownloadState::Queued);
                    state.queue_mut(lane).push_back(QueuedDownload {
                        download: member.clone(),
                        group: Arc::clone(&group),
                    });
                }
            }
            duplicate
        };

        if let Some(existing) = duplicate {
            tracing::info!(
                "download already tracked path={} state={}",
                existing.destination.display(),
                existing.state()
            );
            self.emit(
                &existing,
                existing.state(),
                Some("duplicate submission ignored".to_string()),
            );
            return false;
        }

        for member in &group.members {
            tracing::info!(
                "download queued path={} url={} part={}/{}",
                member.destination.display(),
                member.url,
                member.group_index + 1,
                member.group_size
            );
            self.emit(member, DownloadState::Queued, None);
        }
        self.signal(lane);
        true
    }

    /// Starts `download` right away on its own task, outside both queues.
    pub fn download_now(&self, download: Download) -> bool {
        let group = GroupState::new(DownloadGroup::from(download));
        let Some(download) = group.members.first().cloned() else {
            return false;
        };

        let control = {
            let mut state = self.lock_state();
            if state.find(&download.destination).is_some() {
                return false;
            }
            let (tx, rx) = watch::channel(DownloadControl::Running);
            state.active.insert(
                download.destination.clone(),
                ActiveTransfer {
                    download: download.clone(),
                    group: Arc::clone(&group),
                    control: tx,
                },
            );
            rx
        };

        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .run_job(ActiveJob {
                    download,
                    group,
                    control,
                })
                .await;
        });
        true
    }

    /// Interrupts `download`. Returns false when the manager does not track it.
    pub fn cancel(&self, download: &Download, target: CancelTarget) -> bool {
        let path = download.destination.clone();
        let mut state = self.lock_state();

        if let Some(active) = state.active.get(&path) {
            let _ = active.control.send(DownloadControl::from_target(target));
            tracing::info!("download interrupt requested path={} target={:?}", path.display(), target);
            return true;
        }

        if let Some(job) = state.take_queued_path(&path) {
            drop(state);
            self.end_member(&job.download, &job.group, MemberEnd::Interrupted(target));
            return true;
        }

        let Some(group) = state
            .paused
            .iter()
            .find(|job| job.download.destination == path)
            .map(|job| Arc::clone(&job.group))
        else {
            return false;
        };
        if target == CancelTarget::Paused {
            return true;
        }

        let mut members = Vec::new();
        state.paused.retain(|job| {
            if Arc::ptr_eq(&job.group, &group) {
                members.push(job.download.clone());
                false
            } else {
                true
            }
        });
        drop(state);

        for member in &members {
            if target == CancelTarget::Canceled {
                self.remove_partial(&member.destination);
            }
            member.set_state(target.state());
            self.emit(member, target.state(), None);
        }
        if let Some(callbacks) = group.callbacks.as_ref() {
            callbacks.on_cancel();
        }
        true
    }

    /// Re-queues the paused remainder of the group `download` belongs to.
    pub fn resume(&self, download: &Download) -> bool {
        let (lane, jobs) = {
            let mut state = self.lock_state();
            let Some(group) = state
                .paused
                .iter()
                .find(|job| job.download.destination == download.destination)
                .map(|job| Arc::clone(&job.group))
            else {
                return false;
            };

            let mut jobs = Vec::new();
            state.paused.retain(|job| {
                if Arc::ptr_eq(&job.group, &group) {
                    jobs.push(job.clone());
                    false
                } else {
                    true
                }
            });
            jobs.sort_by_key(|job| job.download.group_index);
            group.settled.store(false, Ordering::SeqCst);

            let lane = group.lane();
            for job in &jobs {
                job.download.set_state(DownloadState::Queued);
                state.queue_mut(lane).push_back(job.clone());
            }
            (lane, jobs)
        };

        for job in &jobs {
            tracing::info!("download resumed path={}", job.download.destination.display());
            self.emit(&job.download, DownloadState::Queued, None);
        }
        self.signal(lane);
        true
    }

    /// Stops every queued and active transfer, keeping partial files.
    pub fn stop_all(&self) {
        let (queued, controls) = {
            let mut state = self.lock_state();
            let mut queued: Vec<QueuedDownload> = state.game_queue.drain(..).collect();
            queued.extend(state.asset_queue.drain(..));
            let controls: Vec<watch::Sender<DownloadControl>> = state
                .active
                .values()
                .map(|active| active.control.clone())
                .collect();
            (queued, controls)
        };

        tracing::info!(
            "stopping downloads queued={} active={}",
            queued.len(),
            controls.len()
        );
        for control in controls {
            let _ = control.send(DownloadControl::Stopped);
        }
        for job in queued {
            self.end_member(&job.download, &job.group, MemberEnd::Interrupted(CancelTarget::Stopped));
        }
    }

    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: DownloadListener + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        lock(&self.inner.listeners).retain(|(existing, _)| *existing != id);
    }

    pub fn active_downloads(&self) -> Vec<Download> {
        self.lock_state()
            .active
            .values()
            .map(|active| active.download.clone())
            .collect()
    }

    pub fn queued_downloads(&self) -> Vec<Download> {
        let state = self.lock_state();
        state
            .game_queue
            .iter()
            .chain(state.asset_queue.iter())
            .map(|job| job.download.clone())
            .collect()
    }

    pub fn paused_downloads(&self) -> Vec<Download> {
        self.lock_state()
            .paused
            .iter()
            .map(|job| job.download.clone())
            .collect()
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        lock(&self.inner.state)
    }

    fn signal(&self, lane: Lane) {
        match lane {
            Lane::Game => self.inner.game_signal.notify_waiters(),
            Lane::Asset => self.inner.asset_signal.notify_waiters(),
        }
    }

    fn emit(&self, download: &Download, state: DownloadState, message: Option<String>) {
        let listeners: Vec<Arc<dyn DownloadListener>> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let event = DownloadEvent {
            state,
            download: download.clone(),
            message,
        };
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn next_job(&self, lane: Lane) -> Option<ActiveJob> {
        let mut state = self.lock_state();
        loop {
            let job = state.queue_mut(lane).pop_front()?;
            if job.group.is_settled() {
                continue;
            }
            let (tx, rx) = watch::channel(DownloadControl::Running);
            state.active.insert(
                job.download.destination.clone(),
                ActiveTransfer {
                    download: job.download.clone(),
                    group: Arc::clone(&job.group),
                    control: tx,
                },
            );
            return Some(ActiveJob {
                download: job.download,
                group: job.group,
                control: rx,
            });
        }
    }

    fn release(&self, download: &Download) {
        self.lock_state().active.remove(&download.destination);
    }

    async fn run_job(&self, job: ActiveJob) {
        let download = job.download.clone();
        let group = Arc::clone(&job.group);
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.execute(job.download, job.group, job.control).await;
        });
        if let Err(err) = handle.await {
            tracing::error!(
                "download task aborted path={} error={}",
                download.destination.display(),
                err
            );
            self.release(&download);
            self.end_member(
                &download,
                &group,
                MemberEnd::Failed(format!("download task aborted: {}", err)),
            );
        }
    }

    async fn execute(
        &self,
        download: Download,
        group: Arc<GroupState>,
        control: watch::Receiver<DownloadControl>,
    ) {
        download.set_state(DownloadState::Started);
        self.emit(&download, DownloadState::Started, None);

        let result = self.transfer(&download, control).await;
        self.release(&download);

        match result {
            Ok(TransferOutcome::Completed) => self.complete_member(&download, &group).await,
            Ok(TransferOutcome::Interrupted(target)) => {
                tracing::info!(
                    "download interrupted path={} target={:?}",
                    download.destination.display(),
                    target
                );
                self.end_member(&download, &group, MemberEnd::Interrupted(target));
            }
            Err(err) => {
                tracing::warn!(
                    "download failed path={} url={} error={}",
                    download.destination.display(),
                    download.url,
                    err
                );
                if matches!(err, LauncherError::Integrity(_)) && !self.inner.config.keep_corrupt_files {
                    self.remove_partial(&download.destination);
                }
                self.end_member(&download, &group, MemberEnd::Failed(err.to_string()));
            }
        }
    }

    async fn transfer(
        &self,
        download: &Download,
        mut control: watch::Receiver<DownloadControl>,
    ) -> Result<TransferOutcome> {
        let config = &self.inner.config;
        let path = download.destination.clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let total_hint = download
            .expected_size
            .or_else(|| download.manifest.as_ref().map(|manifest| manifest.total_size));
        let offset = {
            let path = path.clone();
            let manifest = download.manifest.clone();
            let min_resume = config.min_resume_size;
            tokio::task::spawn_blocking(move || {
                resume_offset(&path, total_hint, manifest.as_deref(), min_resume)
            })
            .await
            .map_err(|err| LauncherError::Config(format!("resume check aborted: {}", err)))??
        };

        if config.check_disk_space {
            if let Some(total) = total_hint {
                ensure_disk_space(&path, total.saturating_sub(offset)).await?;
            }
        }

        let pending = control.borrow().interruption();
        if let Some(target) = pending {
            return Ok(TransferOutcome::Interrupted(target));
        }

        let mut request = self.inner.client.get(&download.url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }
        tracing::info!(
            "download started path={} offset={} total={:?}",
            path.display(),
            offset,
            total_hint
        );
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            let remote_total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.rsplit('/').next())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let complete = match remote_total.or(total_hint) {
                Some(total) => total == offset,
                None => true,
            };
            if !complete {
                return Err(LauncherError::Http(format!(
                    "range {} not satisfiable for {}",
                    offset, download.url
                )));
            }
            tracing::info!("download already complete path={} size={}", path.display(), offset);
            self.verify_checksum(download).await?;
            return Ok(TransferOutcome::Completed);
        }

        if !status.is_success() {
            return Err(LauncherError::Http(format!(
                "{} -> HTTP {}",
                download.url, status
            )));
        }

        let offset = if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
            tracing::warn!(
                "server ignored range request path={} offset={}, restarting",
                path.display(),
                offset
            );
            0
        } else {
            offset
        };
        let total = total_hint.or_else(|| response.content_length().map(|length| length + offset));

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let chunk_size = config.chunk_size.max(1) as usize;
        let mut written = offset;
        let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                changed = control.changed() => {
                    let target = match changed {
                        Ok(()) => control.borrow().interruption(),
                        Err(_) => Some(CancelTarget::Stopped),
                    };
                    if let Some(target) = target {
                        file.write_all(&buffer).await?;
                        file.flush().await?;
                        return Ok(TransferOutcome::Interrupted(target));
                    }
                }
                next = stream.next() => {
                    let Some(next) = next else { break; };
                    let bytes = next?;
                    buffer.extend_from_slice(&bytes);
                    while buffer.len() >= chunk_size {
                        let rest = buffer.split_off(chunk_size);
                        file.write_all(&buffer).await?;
                        written += buffer.len() as u64;
                        buffer = rest;
                        self.report_progress(download, written, total);
                        let pending = control.borrow().interruption();
                        if let Some(target) = pending {
                            file.write_all(&buffer).await?;
                            file.flush().await?;
                            return Ok(TransferOutcome::Interrupted(target));
                        }
                    }
                }
            }
        }

        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            self.report_progress(download, written, total);
        }
        file.flush().await?;
        drop(file);

        if let Some(total) = total {
            if written != total {
                return Err(LauncherError::Http(format!(
                    "transfer ended at {} of {} bytes for {}",
                    written, total, download.url
                )));
            }
        }

        self.verify_checksum(download).await?;
        Ok(TransferOutcome::Completed)
    }

    fn report_progress(&self, download: &Download, written: u64, total: Option<u64>) {
        let Some(total) = total.filter(|total| *total > 0) else {
            return;
        };
        let percent = (written.min(total).saturating_mul(100) / total) as u8;
        download.set_progress(percent);
        self.emit(download, DownloadState::Progress, None);
    }

    async fn verify_checksum(&self, download: &Download) -> Result<()> {
        if !self.inner.config.verify_checksums {
            return Ok(());
        }
        let Some(manifest) = download.manifest.clone() else {
            return Ok(());
        };
        let path = download.destination.clone();
        let algorithm = manifest.file_algorithm();
        let actual = tokio::task::spawn_blocking(move || compute_file_hex(&path, algorithm))
            .await
            .map_err(|err| LauncherError::Config(format!("checksum task aborted: {}", err)))??;
        if !matches_checksum(&actual, &manifest.md5) {
            return Err(LauncherError::Integrity(format!(
                "{} expected {} got {}",
                download.destination.display(),
                manifest.md5,
                actual
            )));
        }
        tracing::info!(
            "download verified path={} checksum={}",
            download.destination.display(),
            actual
        );
        Ok(())
    }

    async fn complete_member(&self, download: &Download, group: &Arc<GroupState>) {
        download.set_progress(100);
        let done = group.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let last = done >= group.members.len();

        if last && !group.is_settled() {
            if let Some(callbacks) = group.callbacks.clone() {
                let path = group.first_path();
                let hook = Arc::clone(&callbacks);
                let outcome = tokio::task::spawn_blocking(move || hook.on_finish(&path)).await;
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) if err.is_cancellation_cause() => {
                        tracing::warn!(
                            "finish hook rejected download path={} error={}",
                            download.destination.display(),
                            err
                        );
                        for member in &group.members {
                            self.remove_partial(&member.destination);
                        }
                        group.settle();
                        download.set_state(DownloadState::Canceled);
                        self.emit(download, DownloadState::Canceled, Some(err.to_string()));
                        callbacks.on_cancel();
                        return;
                    }
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(err) => Some(format!("finish hook aborted: {}", err)),
                };
                if let Some(message) = failure {
                    tracing::warn!(
                        "finish hook failed path={} error={}",
                        download.destination.display(),
                        message
                    );
                    group.settle();
                    download.set_state(DownloadState::Failed);
                    self.emit(download, DownloadState::Failed, Some(message.clone()));
                    callbacks.on_failure(&message);
                    return;
                }
            }
            group.settle();
        }

        tracing::info!(
            "download completed path={} part={}/{}",
            download.destination.display(),
            download.group_index + 1,
            download.group_size
        );
        download.set_state(DownloadState::Completed);
        self.emit(download, DownloadState::Completed, None);
    }

    fn end_member(&self, download: &Download, group: &Arc<GroupState>, end: MemberEnd) {
        if matches!(end, MemberEnd::Interrupted(CancelTarget::Canceled)) {
            self.remove_partial(&download.destination);
        }
        let state = end.state();
        download.set_state(state);
        if state == DownloadState::Paused {
            self.lock_state().paused.push(QueuedDownload {
                download: download.clone(),
                group: Arc::clone(group),
            });
        }
        self.emit(download, state, end.message());

        if !group.settle() {
            return;
        }

        let dropped = {
            let mut state_guard = self.lock_state();
            let dropped = state_guard.take_queued(group);
            let sibling_control = match &end {
                MemberEnd::Interrupted(target) => DownloadControl::from_target(*target),
                MemberEnd::Failed(_) => DownloadControl::Cancelled,
            };
            for active in state_guard.active.values() {
                if Arc::ptr_eq(&active.group, group) && active.download != *download {
                    let _ = active.control.send(sibling_control);
                }
            }
            if state == DownloadState::Paused {
                state_guard.paused.extend(dropped.iter().cloned());
            }
            dropped
        };

        for job in &dropped {
            job.download.set_state(state);
            self.emit(&job.download, state, end.message());
        }

        let Some(callbacks) = group.callbacks.as_ref() else {
            return;
        };
        match &end {
            MemberEnd::Interrupted(CancelTarget::Paused) => {}
            MemberEnd::Interrupted(_) => callbacks.on_cancel(),
            MemberEnd::Failed(message) => callbacks.on_failure(message),
        }
    }

    fn remove_partial(&self, path: &Path) {
        if let Err(err) = remove_file_if_exists(path) {
            tracing::warn!("failed to remove partial file path={} error={}", path.display(), err);
        }
    }
}

async fn worker_loop(inner: Weak<ManagerInner>, signal: Arc<Notify>, lane: Lane) {
    loop {
        let notified = signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let manager = match inner.upgrade() {
            Some(inner) => DownloadManager { inner },
            None => return,
        };
        match manager.next_job(lane) {
            Some(job) => manager.run_job(job).await,
            None => {
                drop(manager);
                notified.await;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Byte offset a transfer restarts from, truncating anything past it.
fn resume_offset(
    path: &Path,
    expected_size: Option<u64>,
    manifest: Option<&DownloadManifest>,
    min_resume_size: u64,
) -> Result<u64> {
    let present = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    if present == 0 {
        return Ok(0);
    }
    let oversized = expected_size.map(|total| present > total).unwrap_or(false);
    if present < min_resume_size || oversized {
        tracing::info!(
            "discarding partial file path={} size={} min_resume={}",
            path.display(),
            present,
            min_resume_size
        );
        remove_file_if_exists(path)?;
        return Ok(0);
    }

    let Some(manifest) = manifest else {
        return Ok(present);
    };
    let verified = manifest.verified_prefix_len(path)?;
    if verified < present {
        tracing::info!(
            "truncating partial file to verified prefix path={} size={} verified={}",
            path.display(),
            present,
            verified
        );
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_len(verified)?;
    }
    Ok(verified)
}

fn nearest_existing_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}

fn available_disk_space(path: &Path) -> Option<u64> {
    let target = nearest_existing_path(path);
    let target = std::fs::canonicalize(&target).unwrap_or(target);
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

async fn ensure_disk_space(path: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let probe = path.to_path_buf();
    let available = tokio::task::spawn_blocking(move || available_disk_space(&probe))
        .await
        .map_err(|err| LauncherError::Config(format!("disk probe aborted: {}", err)))?;
    match available {
        Some(available) if available < required => {
            Err(LauncherError::NotEnoughSpace { required, available })
        }
        _ => Ok(()),
    }
}
