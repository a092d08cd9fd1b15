//! Trigger sources: filesystem notification or interval timers

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::config::{WatchMode, WatcherConfig};

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// New records may be waiting in the store
    Events,
    /// Poll timer tick; arms an idle debouncer but never extends a window
    Poll,
    /// Pause or presence state may have changed
    Signals,
}

/// Directories to observe
#[derive(Debug, Clone, Default)]
pub struct WatchTargets {
    /// Record directory, when the backend has one that can be watched
    pub events_dir: Option<PathBuf>,
    /// Directories holding the pause file and presence records
    pub signal_dirs: Vec<PathBuf>,
}

/// Running trigger producers; stopped on drop
#[derive(Debug)]
pub struct TriggerSource {
    tasks: Vec<JoinHandle<()>>,
    watcher: Option<NotifyThread>,
}

/// The inotify reader thread and its stop flag
#[derive(Debug)]
struct NotifyThread {
    stop: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Forward a trigger without blocking; a full channel already holds one
fn offer(tx: &mpsc::Sender<Trigger>, trigger: Trigger) -> bool {
    match tx.try_send(trigger) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Closed(_)) => false,
    }
}

impl TriggerSource {
    /// Start producing triggers into `tx`
    ///
    /// Signal state is always re-read on a timer, since a pause goes stale
    /// and a participant dies without touching the filesystem. Events come
    /// from inotify when the mode and backend allow it, otherwise from a
    /// poll timer.
    pub fn spawn(config: &WatcherConfig, targets: WatchTargets, tx: mpsc::Sender<Trigger>) -> Self {
        debug!(?config.mode, ?targets, "TriggerSource::spawn: called");
        let mut tasks = vec![spawn_timer(config.signal_refresh(), Trigger::Signals, tx.clone())];

        let watcher = match (&config.mode, &targets.events_dir) {
            (WatchMode::Notify, Some(_)) => match notify::spawn(&targets, tx.clone()) {
                Ok(watcher) => {
                    info!(?targets.events_dir, "Watching for new events via inotify");
                    Some(watcher)
                }
                Err(e) => {
                    warn!(error = %e, "Filesystem notification unavailable, polling instead");
                    None
                }
            },
            _ => None,
        };

        if watcher.is_none() {
            info!(interval_ms = config.poll_interval_ms, "Polling for new events");
            tasks.push(spawn_timer(config.poll_interval(), Trigger::Poll, tx));
        }

        Self { tasks, watcher }
    }

    /// Whether events are detected by notification rather than polling
    pub fn is_notifying(&self) -> bool {
        self.watcher.is_some()
    }

    /// Abort the timers and tell the inotify thread to exit
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(watcher) = &self.watcher {
            watcher.stop.store(true, Ordering::Release);
        }
    }
}

impl Drop for TriggerSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_timer(period: Duration, trigger: Trigger, tx: mpsc::Sender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !offer(&tx, trigger) {
                debug!(?trigger, "spawn_timer: receiver gone, stopping");
                break;
            }
        }
    })
}

#[cfg(target_os = "linux")]
mod notify {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use nix::errno::Errno;
    use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
    use tokio::sync::mpsc;
    use tracing::{debug, warn};

    use super::{NotifyThread, Trigger, WatchTargets, offer};

    /// How long the reader sleeps when no events are queued
    const IDLE_SLEEP: Duration = Duration::from_millis(50);

    /// Watch the target directories from a dedicated thread
    ///
    /// The descriptor is non-blocking so the thread notices its stop flag
    /// within one idle sleep and releases the descriptor.
    pub(super) fn spawn(targets: &WatchTargets, tx: mpsc::Sender<Trigger>) -> io::Result<NotifyThread> {
        // Drains delete records, so deletions in the events directory are not news
        let events_mask = AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_MOVED_TO;
        let signals_mask = AddWatchFlags::IN_CREATE
            | AddWatchFlags::IN_CLOSE_WRITE
            | AddWatchFlags::IN_DELETE
            | AddWatchFlags::IN_MOVED_TO;

        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)?;
        let mut events_watch: Option<WatchDescriptor> = None;
        if let Some(dir) = &targets.events_dir {
            events_watch = Some(inotify.add_watch(dir, events_mask)?);
        }
        for dir in &targets.signal_dirs {
            if let Err(e) = inotify.add_watch(dir, signals_mask) {
                // The signal timer still covers this directory
                warn!(?dir, error = %e, "Failed to watch signal directory");
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("tripwire-inotify".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    let events = match inotify.read_events() {
                        Ok(events) => events,
                        Err(Errno::EAGAIN) => {
                            std::thread::sleep(IDLE_SLEEP);
                            continue;
                        }
                        Err(Errno::EINTR) => continue,
                        Err(e) => {
                            warn!(error = %e, "inotify read failed, watcher thread exiting");
                            break;
                        }
                    };

                    let mut events_changed = false;
                    let mut signals_changed = false;
                    for event in events {
                        if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                            events_changed = true;
                            signals_changed = true;
                        } else if Some(event.wd) == events_watch {
                            events_changed = true;
                        } else {
                            signals_changed = true;
                        }
                    }

                    if events_changed && !offer(&tx, Trigger::Events) {
                        break;
                    }
                    if signals_changed && !offer(&tx, Trigger::Signals) {
                        break;
                    }
                }
                debug!("notify: thread exiting");
            })?;

        Ok(NotifyThread { stop, thread })
    }
}

#[cfg(not(target_os = "linux"))]
mod notify {
    use std::io;

    use tokio::sync::mpsc;

    use super::{NotifyThread, Trigger, WatchTargets};

    pub(super) fn spawn(_targets: &WatchTargets, _tx: mpsc::Sender<Trigger>) -> io::Result<NotifyThread> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "inotify is Linux-only"))
    }
}
