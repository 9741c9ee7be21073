//! Per-instrument acquisition worker.
//!
//! Each acquiring instrument gets its own thread so a slow device never
//! stalls the others. The worker loop:
//!
//! 1. Waits to be armed (or aborted).
//! 2. Blocks in `acquire_waveforms` until a capture, a timeout or an abort.
//! 3. Hands the capture to the evaluation engine and waits to be re-armed.
//!
//! Timeouts and device faults are reported and retried. `Disconnected` or an
//! abort ends the loop, after which the worker detaches from the engine.

use super::evaluator::{publish, EngineMessage};
use super::types::{InstrumentCapture, SessionEvent};
use crate::graph::InstrumentId;
use crate::instrument::{abort_pair, AbortHandle, AbortSignal, AcquireOptions, AcquisitionError, InstrumentDriver};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A driver shared between the session table and its worker.
pub(crate) type SharedDriver = Arc<Mutex<Box<dyn InstrumentDriver>>>;

/// Everything the worker thread owns.
pub(crate) struct WorkerContext {
    pub instrument: InstrumentId,
    pub driver: SharedDriver,
    pub options: AcquireOptions,
    pub retry_backoff: Duration,
    pub arm: Receiver<()>,
    pub engine: Sender<EngineMessage>,
    pub events: Sender<SessionEvent>,
}

/// Owner side of a running worker. Dropping it aborts and joins the thread.
pub(crate) struct WorkerHandle {
    instrument: InstrumentId,
    abort: Option<AbortHandle>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    /// Abort any in-flight acquisition and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Acquisition worker for {} panicked", self.instrument);
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn spawn_worker(ctx: WorkerContext) -> std::io::Result<WorkerHandle> {
    let (abort, signal) = abort_pair();
    let instrument = ctx.instrument;
    let thread = std::thread::Builder::new()
        .name(format!("scopegraph-acq-{}", instrument.0))
        .spawn(move || acquisition_loop(ctx, signal))?;
    Ok(WorkerHandle {
        instrument,
        abort: Some(abort),
        thread: Some(thread),
    })
}

fn acquisition_loop(ctx: WorkerContext, abort: AbortSignal) {
    tracing::debug!("Acquisition worker for {} started", ctx.instrument);

    'armed: loop {
        crossbeam_channel::select! {
            recv(ctx.arm) -> msg => if msg.is_err() { break 'armed },
            recv(abort.receiver()) -> _ => break 'armed,
        }

        loop {
            if abort.is_aborted() {
                break 'armed;
            }
            let result = match ctx.driver.lock() {
                Ok(mut driver) => driver.acquire_waveforms(&ctx.options, &abort),
                Err(_) => {
                    tracing::error!("Driver lock for {} poisoned", ctx.instrument);
                    break 'armed;
                }
            };

            match result {
                Ok(acquisition) => {
                    let capture = InstrumentCapture::from_acquisition(ctx.instrument, acquisition);
                    if ctx.engine.send(EngineMessage::Captured(capture)).is_err() {
                        break 'armed;
                    }
                    continue 'armed;
                }
                Err(AcquisitionError::Disconnected) => {
                    if !abort.is_aborted() {
                        tracing::warn!("{} disconnected during acquisition", ctx.instrument);
                        publish(
                            &ctx.events,
                            SessionEvent::AcquisitionFailed {
                                instrument: ctx.instrument,
                                error: AcquisitionError::Disconnected,
                            },
                        );
                    }
                    break 'armed;
                }
                Err(error) => {
                    tracing::debug!("{} acquisition failed: {}", ctx.instrument, error);
                    let backoff = matches!(error, AcquisitionError::DeviceFault(_));
                    publish(
                        &ctx.events,
                        SessionEvent::AcquisitionFailed {
                            instrument: ctx.instrument,
                            error,
                        },
                    );
                    if backoff && abort.wait(ctx.retry_backoff) {
                        break 'armed;
                    }
                }
            }
        }
    }

    let _ = ctx.engine.send(EngineMessage::Detach(ctx.instrument));
    tracing::debug!("Acquisition worker for {} stopped", ctx.instrument);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{ModelProfile, ScpiInstrument};
    use crate::transport::SimTransport;
    use std::time::Instant;

    fn driver(path: &str) -> SharedDriver {
        let transport = Box::new(SimTransport::from_path(path).unwrap());
        let scpi = ScpiInstrument::connect(ModelProfile::SIM_DMM, transport, Duration::from_millis(100)).unwrap();
        Arc::new(Mutex::new(Box::new(scpi)))
    }

    fn context(
        path: &str,
        timeout: Duration,
    ) -> (WorkerContext, Sender<()>, Receiver<EngineMessage>, Receiver<SessionEvent>) {
        let (arm_tx, arm_rx) = crossbeam_channel::bounded(1);
        let (engine_tx, engine_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::bounded(64);
        let ctx = WorkerContext {
            instrument: InstrumentId(1),
            driver: driver(path),
            options: AcquireOptions {
                timeout,
                poll_interval: Duration::from_millis(2),
            },
            retry_backoff: Duration::from_millis(5),
            arm: arm_rx,
            engine: engine_tx,
            events: events_tx,
        };
        (ctx, arm_tx, engine_rx, events_rx)
    }

    #[test]
    fn test_worker_captures_once_per_arm() {
        let (ctx, arm, engine, _events) = context("SIMDMM:trigger_ms=1", Duration::from_secs(1));
        let worker = spawn_worker(ctx).unwrap();

        arm.send(()).unwrap();
        let first = engine.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, EngineMessage::Captured(ref c) if c.instrument == InstrumentId(1)));
        // Not re-armed yet, so nothing else arrives
        assert!(engine.recv_timeout(Duration::from_millis(50)).is_err());

        arm.send(()).unwrap();
        assert!(matches!(
            engine.recv_timeout(Duration::from_secs(5)).unwrap(),
            EngineMessage::Captured(_)
        ));

        worker.stop();
        assert!(matches!(engine.recv().unwrap(), EngineMessage::Detach(InstrumentId(1))));
    }

    #[test]
    fn test_timeouts_are_reported_and_retried() {
        let (ctx, arm, _engine, events) = context("SIMDMM:trigger_ms=5000", Duration::from_millis(10));
        let worker = spawn_worker(ctx).unwrap();
        arm.send(()).unwrap();

        let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(
            event,
            SessionEvent::AcquisitionFailed {
                error: AcquisitionError::Timeout { .. },
                ..
            }
        ));
        assert!(events.recv_timeout(Duration::from_secs(5)).is_ok());
        worker.stop();
    }

    #[test]
    fn test_stop_aborts_blocked_acquisition() {
        let (ctx, arm, engine, _events) = context("SIMDMM:trigger_ms=5000", Duration::from_secs(30));
        let worker = spawn_worker(ctx).unwrap();
        arm.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        worker.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(engine.recv().unwrap(), EngineMessage::Detach(_)));
    }
}
