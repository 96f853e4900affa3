// Parser pipeline
//
// Owns the persistent task queue and drives each task through the ordered
// service chain: MetadataExtractor -> MetadataAnalyzer -> Thumbnailer. Step
// completion is persisted per service; on startup, incomplete tasks are
// recovered from the task table and restarted from their recorded step.

pub(crate) mod metadata_analyzer;
pub(crate) mod metadata_extractor;
pub(crate) mod service;
pub(crate) mod thumbnailer;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::catalog::task::{self, Task};
use crate::constants::TASK_MAX_RETRIES;
use crate::core::Core;
use crate::error::Result;

use service::{ParserService, ServiceQueue, Status};

struct ServiceEntry {
    service: Box<dyn ParserService>,
    queue: Arc<ServiceQueue>,
}

struct ParserInner {
    core: Arc<Core>,
    services: Vec<ServiceEntry>,
    ops_scheduled: AtomicUsize,
    ops_done: AtomicUsize,
    last_percent: AtomicU32,
}

pub(crate) struct Parser {
    inner: Arc<ParserInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Parser {
    pub fn new(core: Arc<Core>) -> Parser {
        let services: Vec<Box<dyn ParserService>> = vec![
            Box::new(metadata_extractor::MetadataExtractor),
            Box::new(metadata_analyzer::MetadataAnalyzer),
            Box::new(thumbnailer::Thumbnailer),
        ];
        let services = services
            .into_iter()
            .map(|service| ServiceEntry {
                service,
                queue: Arc::new(ServiceQueue::new()),
            })
            .collect();
        Parser {
            inner: Arc::new(ParserInner {
                core,
                services,
                ops_scheduled: AtomicUsize::new(0),
                ops_done: AtomicUsize::new(0),
                last_percent: AtomicU32::new(100),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Initialize services, recover persisted tasks and spawn the workers.
    pub fn start(&self) -> Result<()> {
        for entry in &self.inner.services {
            if !entry.service.initialize(&self.inner.core) {
                log::error!("Failed to initialize service {}", entry.service.name());
            }
        }
        self.restore_tasks()?;

        let mut threads = self.threads.lock().unwrap();
        for (idx, entry) in self.inner.services.iter().enumerate() {
            for n in 0..entry.service.nb_threads().max(1) {
                let inner = Arc::clone(&self.inner);
                let queue = Arc::clone(&entry.queue);
                let thread = std::thread::Builder::new()
                    .name(format!("ml-{}-{}", entry.service.name(), n))
                    .spawn(move || service_loop(inner, queue, idx))
                    .expect("Failed to spawn parser service thread");
                threads.push(thread);
            }
        }
        Ok(())
    }

    /// Re-enqueue every unfinished task from the database.
    pub fn restore_tasks(&self) -> Result<()> {
        let tasks = self
            .inner
            .core
            .db
            .with_conn(|conn| task::fetch_unparsed(conn))?;
        if !tasks.is_empty() {
            log::info!("Restoring {} unfinished parsing tasks", tasks.len());
        }
        for mut task in tasks {
            // Relink persisted state; probing state is rebuilt lazily by the
            // services themselves.
            if let Some(file_id) = task.file_id {
                let file = crate::catalog::file::fetch(&self.inner.core, file_id)?;
                task.media_id = file.and_then(|f| f.media_id);
            }
            self.parse(task);
        }
        Ok(())
    }

    /// Entry point for freshly discovered tasks.
    pub fn parse(&self, task: Task) {
        self.inner.schedule(task);
    }

    pub fn pause(&self) {
        for entry in &self.inner.services {
            entry.queue.pause();
        }
    }

    pub fn resume(&self) {
        for entry in &self.inner.services {
            entry.queue.resume();
        }
    }

    /// Drop all queued work (rescan); running tasks finish on their own.
    pub fn flush(&self) {
        let mut dropped = 0;
        for entry in &self.inner.services {
            dropped += entry.queue.clear();
        }
        if dropped > 0 {
            self.inner
                .ops_done
                .fetch_add(dropped, Ordering::SeqCst);
            self.inner.check_idle();
        }
    }

    /// Ask every worker to terminate without waiting for them.
    pub fn signal_stop(&self) {
        for entry in &self.inner.services {
            entry.queue.signal_stop();
        }
    }

    /// Join the workers.
    pub fn stop(&self) {
        self.signal_stop();
        let mut threads = self.threads.lock().unwrap();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.ops_done.load(Ordering::SeqCst)
            == self.inner.ops_scheduled.load(Ordering::SeqCst)
    }

    /// Queue depth per service, in chain order.
    #[cfg(test)]
    pub fn queue_lengths(&self) -> Vec<usize> {
        self.inner
            .services
            .iter()
            .map(|entry| entry.queue.len())
            .collect()
    }
}

impl ParserInner {
    /// Index of the first service whose step the task has not completed.
    fn first_pending_service(&self, task: &Task) -> Option<usize> {
        (0..self.services.len())
            .find(|&idx| !self.services[idx].service.is_completed(task))
    }

    fn schedule(&self, mut task: Task) {
        let Some(idx) = self.first_pending_service(&task) else {
            return;
        };
        self.ops_scheduled.fetch_add(1, Ordering::SeqCst);
        self.core.on_parser_idle_changed(false);
        self.update_stats();
        task.current_service = idx;
        self.services[idx].queue.push(task);
    }

    /// Sink called by every worker after a service ran.
    fn done(&self, mut task: Task, status: Status, service_idx: usize) {
        let children = std::mem::take(&mut task.children);

        match status {
            Status::Success => match self.next_pending_service(&task, service_idx) {
                Some(next) => {
                    task.current_service = next;
                    self.services[next].queue.push(task);
                }
                None => {
                    self.link_playlist_member(&task);
                    self.task_finished();
                }
            },
            Status::Error => {
                if task.retry_count < TASK_MAX_RETRIES {
                    log::warn!(
                        "Service {} failed on {} (attempt {}), retrying",
                        self.services[service_idx].service.name(),
                        task.mrl,
                        task.retry_count
                    );
                    self.services[service_idx].queue.push(task);
                } else {
                    log::error!(
                        "Service {} failed on {} too many times, giving up",
                        self.services[service_idx].service.name(),
                        task.mrl
                    );
                    self.task_finished();
                }
            }
            Status::Fatal => {
                log::error!(
                    "Service {} fatally failed on {}",
                    self.services[service_idx].service.name(),
                    task.mrl
                );
                // Exhaust the budget so recovery does not re-enqueue it
                let _ = self.core.db.with_conn(|conn| {
                    conn.execute(
                        "UPDATE tasks SET retry_count = ?1 WHERE id = ?2",
                        rusqlite::params![TASK_MAX_RETRIES, task.id],
                    )?;
                    Ok(())
                });
                self.task_finished();
            }
            Status::Discarded => {
                let _ = self.core.db.with_conn(|conn| task::delete(conn, task.id));
                self.task_finished();
            }
        }

        for child in children {
            self.schedule(child);
        }
        self.update_stats();
    }

    fn next_pending_service(&self, task: &Task, after: usize) -> Option<usize> {
        ((after + 1)..self.services.len())
            .find(|&idx| !self.services[idx].service.is_completed(task))
    }

    /// A completed task spawned by a playlist file lands at its recorded
    /// position in the playlist.
    fn link_playlist_member(&self, task: &Task) {
        let (Some(playlist_id), Some(media_id)) = (task.parent_playlist_id, task.media_id) else {
            return;
        };
        let res = self.core.db.with_conn(|conn| {
            crate::catalog::playlist::add_at(conn, playlist_id, media_id, task.parent_playlist_index)
        });
        match res {
            Ok(()) => {
                self.core
                    .notifier
                    .notify(crate::notifier::Entity::Playlist, crate::notifier::Change::Modified, playlist_id);
            }
            Err(e) if e.is_constraint() => {}
            Err(e) => log::warn!(
                "Failed to attach media {} to playlist {}: {}",
                media_id,
                playlist_id,
                e
            ),
        }
    }

    fn task_finished(&self) {
        self.ops_done.fetch_add(1, Ordering::SeqCst);
        self.check_idle();
    }

    fn check_idle(&self) {
        let done = self.ops_done.load(Ordering::SeqCst);
        let scheduled = self.ops_scheduled.load(Ordering::SeqCst);
        if done >= scheduled {
            self.core.on_parser_idle_changed(true);
        }
    }

    fn update_stats(&self) {
        let scheduled = self.ops_scheduled.load(Ordering::SeqCst);
        let done = self.ops_done.load(Ordering::SeqCst);
        let percent = if scheduled == 0 {
            100
        } else {
            (done * 100 / scheduled) as u32
        };
        if self.last_percent.swap(percent, Ordering::SeqCst) != percent {
            self.core.cb.on_parsing_stats_updated(percent);
        }
    }
}

fn service_loop(inner: Arc<ParserInner>, queue: Arc<ServiceQueue>, service_idx: usize) {
    log::info!(
        "Entering {} service thread",
        inner.services[service_idx].service.name()
    );
    while let Some(mut task) = queue.pop() {
        // Consume one attempt up front so a crash mid-run is still bounded
        task.retry_count += 1;
        let _ = inner
            .core
            .db
            .with_conn(|conn| task::start_step(conn, task.id));

        let service = &inner.services[service_idx].service;
        let core = Arc::clone(&inner.core);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            service.run(&core, &mut task)
        }));
        let status = match result {
            Ok(status) => status,
            Err(_) => {
                log::error!("Service {} panicked on {}", service.name(), task.mrl);
                Status::Fatal
            }
        };
        inner.done(task, status, service_idx);
    }
    log::info!(
        "Exiting {} service thread",
        inner.services[service_idx].service.name()
    );
}
