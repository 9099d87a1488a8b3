//! # Scan Session
//!
//! Bounded discovery. Results are keyed by address: a device seen twice is
//! updated in place, never listed twice, and first-seen order is kept.
//!
//! ```text
//! DeviceScanned ──► filter ──► merge by address ──┬──► results()  (latest name / RSSI)
//!                                                 └──► next()     (first sighting only)
//! ```

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use eld_core::DeviceIdentity;

use crate::error::LinkResult;
use crate::events::{LinkEvent, Subscription};
use crate::link::{DeviceLink, ScanFilter};

type Results = Arc<Mutex<Vec<DeviceIdentity>>>;

/// A running scan. Ends when its duration elapses or [`Self::stop`] is called.
pub struct ScanSession {
    rx: mpsc::UnboundedReceiver<DeviceIdentity>,
    results: Results,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ScanSession {
    pub(crate) async fn start(
        link: Arc<dyn DeviceLink>,
        duration: Duration,
        filter: ScanFilter,
        on_finish: Box<dyn FnOnce() + Send>,
    ) -> LinkResult<Self> {
        let events = link.events().subscribe();

        if let Err(err) = link.start_scan(duration, &filter).await {
            drop(events);
            on_finish();
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let results: Results = Arc::default();
        let token = CancellationToken::new();

        let task = tokio::spawn(run_scan(
            events,
            link,
            duration,
            filter,
            tx,
            Arc::clone(&results),
            token.clone(),
            on_finish,
        ));

        Ok(ScanSession {
            rx,
            results,
            token,
            task,
        })
    }

    /// Next newly discovered device. `None` once the scan has ended.
    pub async fn next(&mut self) -> Option<DeviceIdentity> {
        self.rx.recv().await
    }

    /// Snapshot of everything discovered so far.
    pub fn results(&self) -> Vec<DeviceIdentity> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ends the scan early and returns the final result set.
    pub async fn stop(self) -> Vec<DeviceIdentity> {
        self.token.cancel();
        self.finish().await
    }

    /// Waits for the scan duration to elapse and returns the result set.
    pub async fn finish(self) -> Vec<DeviceIdentity> {
        if let Err(err) = self.task.await {
            warn!(error = %err, "Scan task failed");
        }
        let results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        results.clone()
    }

    /// First sightings as a stream. Dropping the stream stops the scan.
    pub fn into_stream(self) -> ScanStream {
        ScanStream {
            inner: UnboundedReceiverStream::new(self.rx),
            _guard: self.token.drop_guard(),
        }
    }
}

/// Stream of newly discovered devices, ended by the scan deadline or by
/// dropping it.
pub struct ScanStream {
    inner: UnboundedReceiverStream<DeviceIdentity>,
    _guard: DropGuard,
}

impl Stream for ScanStream {
    type Item = DeviceIdentity;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Inserts or updates `identity`. Returns it if the address is new.
fn merge(results: &Results, identity: DeviceIdentity) -> Option<DeviceIdentity> {
    let mut results = results.lock().unwrap_or_else(PoisonError::into_inner);
    match results.iter_mut().find(|d| d.address == identity.address) {
        Some(existing) => {
            existing.merge(identity);
            None
        }
        None => {
            results.push(identity.clone());
            Some(identity)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_scan(
    mut events: Subscription,
    link: Arc<dyn DeviceLink>,
    duration: Duration,
    filter: ScanFilter,
    tx: mpsc::UnboundedSender<DeviceIdentity>,
    results: Results,
    token: CancellationToken,
    on_finish: Box<dyn FnOnce() + Send>,
) {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = &mut deadline => break,
            event = events.recv() => event,
        };

        match event {
            Some(LinkEvent::DeviceScanned(identity)) if filter.matches(&identity) => {
                if let Some(new) = merge(&results, identity) {
                    debug!(address = %new.address, name = ?new.display_name, "Discovered device");
                    let _ = tx.send(new);
                }
            }
            Some(_) => {}
            None => break,
        }
    }

    drop(events);
    if let Err(err) = link.stop_scan().await {
        warn!(error = %err, "Failed to stop scan");
    }
    on_finish();
}
