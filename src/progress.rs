// src/progress.rs

//! Weighted progress reporting, decoupled from the applier
//!
//! The applier enqueues weighted ticks and advisory messages; dedicated
//! consumer threads translate them into calls on a [`ProgressHandler`].
//! Keeping the handler behind queues means the applier never blocks on
//! a slow UI, and percent emission stays strictly monotone because a
//! single consumer owns the counters.
//!
//! Weights are expressed in hundredths of a byte-equivalent so that
//! integer math suffices: a copy of `n` bytes is worth `n * COPY_PRICE / 100`
//! units of the precomputed grand total.

use std::cmp;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Price of copying one byte, in hundredths of a byte-equivalent
pub const COPY_PRICE: u64 = 100;
/// Price of a rename, same as a copy
pub const RENAME_PRICE: u64 = COPY_PRICE;
/// Flat price for deleting one backup during cleanup
pub const REMOVE_BACKUP_PRICE: u64 = 30;
/// A remove is one rename into the backup
pub const REMOVE_FACTOR: u64 = RENAME_PRICE;
/// An update is a backup rename plus a copy in
pub const UPDATE_FACTOR: u64 = RENAME_PRICE + COPY_PRICE;
/// An add is a single copy
pub const ADD_FACTOR: u64 = COPY_PRICE;

/// Sink for progress events emitted during an install
///
/// Implementations must be thread-safe: events are delivered from the
/// reporter's consumer threads, not from the applier.
pub trait ProgressHandler: Send + Sync {
    /// Advisory banner for the current phase
    fn handle_system_message(&self, message: &str);

    /// Integer percent in 1..=100, strictly increasing per install
    fn handle_percent_change(&self, percent: u32);

    /// Invoked exactly once per install, after all other events
    fn handle_finish(&self);
}

/// Progress handler that writes events to the log
#[derive(Debug, Default)]
pub struct LogProgressHandler;

impl ProgressHandler for LogProgressHandler {
    fn handle_system_message(&self, message: &str) {
        info!("System message: {}", message);
    }

    fn handle_percent_change(&self, percent: u32) {
        info!("Completed {}%", percent);
    }

    fn handle_finish(&self) {
        info!("Finished");
    }
}

/// Translates weighted ticks into a monotone percentage stream
///
/// One reporter lives for exactly one install call. Producers enqueue
/// ticks via the `account_*` methods; [`ProgressReporter::finish`]
/// closes both queues, waits for the consumers to drain, and fires the
/// one-shot finish event.
pub struct ProgressReporter {
    ticks: Sender<u64>,
    messages: Sender<String>,
    tick_worker: JoinHandle<()>,
    message_worker: JoinHandle<()>,
    handler: Arc<dyn ProgressHandler>,
}

impl ProgressReporter {
    /// Spawn the consumer threads for a run worth `grand_total` weighted units
    pub fn start(handler: Arc<dyn ProgressHandler>, grand_total: u64) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel::<u64>();
        let (msg_tx, msg_rx) = mpsc::channel::<String>();

        let tick_handler = Arc::clone(&handler);
        let tick_worker = thread::spawn(move || {
            let mut current: u64 = 0;
            let mut percent: u64 = 0;

            for chunk in tick_rx {
                current += chunk;

                if grand_total == 0 {
                    continue;
                }

                let next = cmp::min(100, current * 100 / grand_total);
                if next > percent {
                    percent = next;
                    tick_handler.handle_percent_change(percent as u32);
                }
            }

            debug!("Reporting loop finished");
        });

        let msg_handler = Arc::clone(&handler);
        let message_worker = thread::spawn(move || {
            for message in msg_rx {
                msg_handler.handle_system_message(&message);
            }

            debug!("System message handling finished");
        });

        Self {
            ticks: tick_tx,
            messages: msg_tx,
            tick_worker,
            message_worker,
            handler,
        }
    }

    /// Account one removed file: a rename into its backup
    pub fn account_remove(&self, size: u64) {
        self.tick(size * REMOVE_FACTOR / 100);
    }

    /// Account one updated file: backup rename plus copy in
    pub fn account_update(&self, size: u64) {
        self.tick(size * UPDATE_FACTOR / 100);
    }

    /// Account one added file: a single copy
    pub fn account_add(&self, size: u64) {
        self.tick(size * ADD_FACTOR / 100);
    }

    /// Account one deleted backup.
    ///
    /// Backup sizes are no longer known when cleanup runs, so every
    /// backup costs the same flat price.
    pub fn account_backup_remove(&self) {
        self.tick(REMOVE_BACKUP_PRICE);
    }

    /// Enqueue an advisory banner for the handler
    pub fn system_message(&self, message: &str) {
        let _ = self.messages.send(message.to_string());
    }

    fn tick(&self, amount: u64) {
        let _ = self.ticks.send(amount);
    }

    /// Close both queues, drain the consumers, and fire the finish event.
    ///
    /// Queue closure is the only completion signal: dropping the senders
    /// ends the consumer loops once every enqueued item is handled, so
    /// `handle_finish` is guaranteed to run after every other event.
    pub fn finish(self) {
        let Self {
            ticks,
            messages,
            tick_worker,
            message_worker,
            handler,
        } = self;

        drop(ticks);
        drop(messages);

        let _ = tick_worker.join();
        let _ = message_worker.join();

        handler.handle_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingHandler {
        percents: Mutex<Vec<u32>>,
        messages: Mutex<Vec<String>>,
        finishes: AtomicUsize,
    }

    impl ProgressHandler for RecordingHandler {
        fn handle_system_message(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }

        fn handle_percent_change(&self, percent: u32) {
            self.percents.lock().unwrap().push(percent);
        }

        fn handle_finish(&self) {
            self.finishes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_percent_steps_are_strictly_increasing() {
        let handler = Arc::new(RecordingHandler::default());
        let reporter = ProgressReporter::start(handler.clone(), 400);

        for _ in 0..4 {
            reporter.account_add(100);
        }
        reporter.finish();

        let percents = handler.percents.lock().unwrap();
        assert_eq!(*percents, vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_sub_percent_ticks_do_not_emit() {
        let handler = Arc::new(RecordingHandler::default());
        let reporter = ProgressReporter::start(handler.clone(), 100_000);

        // 100 weighted units out of 100_000 is 0 whole percent
        reporter.account_add(100);
        reporter.finish();

        assert!(handler.percents.lock().unwrap().is_empty());
        assert_eq!(handler.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_percent_is_capped_and_emitted_once() {
        let handler = Arc::new(RecordingHandler::default());
        // Flat backup prices can overshoot a tiny grand total
        let reporter = ProgressReporter::start(handler.clone(), 10);

        reporter.account_backup_remove();
        reporter.account_backup_remove();
        reporter.finish();

        let percents = handler.percents.lock().unwrap();
        assert_eq!(*percents, vec![100]);
    }

    #[test]
    fn test_zero_grand_total_emits_nothing_but_finishes() {
        let handler = Arc::new(RecordingHandler::default());
        let reporter = ProgressReporter::start(handler.clone(), 0);

        reporter.account_backup_remove();
        reporter.finish();

        assert!(handler.percents.lock().unwrap().is_empty());
        assert_eq!(handler.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_system_messages_arrive_in_order() {
        let handler = Arc::new(RecordingHandler::default());
        let reporter = ProgressReporter::start(handler.clone(), 100);

        reporter.system_message("Removing components...");
        reporter.system_message("Updating components...");
        reporter.system_message("Adding components...");
        reporter.finish();

        let messages = handler.messages.lock().unwrap();
        assert_eq!(
            *messages,
            vec![
                "Removing components...",
                "Updating components...",
                "Adding components...",
            ]
        );
    }

    #[test]
    fn test_finish_fires_exactly_once() {
        let handler = Arc::new(RecordingHandler::default());
        let reporter = ProgressReporter::start(handler.clone(), 100);

        reporter.account_add(50);
        reporter.finish();

        assert_eq!(handler.finishes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_weight_schedule() {
        assert_eq!(REMOVE_FACTOR, 100);
        assert_eq!(UPDATE_FACTOR, 200);
        assert_eq!(ADD_FACTOR, 100);
        assert_eq!(REMOVE_BACKUP_PRICE, 30);
    }
}
