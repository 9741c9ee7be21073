//! scopegraph - headless session runner
//!
//! Connects the instruments listed in the session config (or a simulated
//! bench when none are configured), builds a small decoding graph on the
//! first oscilloscope, runs a number of epochs and logs what history holds.
//!
//! Usage: `scopegraph [epochs]`

use anyhow::Context;
use scopegraph::config::{self, SessionConfig};
use scopegraph::graph::decoders::{PulseDecoder, UartDecoder};
use scopegraph::graph::filters::{GainFilter, ThresholdFilter};
use scopegraph::{Capability, Session, SessionEvent, StreamId};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEMO_BENCH: &[&str] = &[
    "scope:sim_scope:sim:SIMSCOPE-2:pattern=uart:rate=4608000:points=2000:trigger_ms=20",
    "dmm:sim_dmm:sim:SIMDMM:trigger_ms=50",
    "psu:sim_psu:sim:SIMPSU-1:trigger_ms=50",
    "awg:sim_awg:sim:SIMAWG",
];

fn init_logging(config: &SessionConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match config.log_to_file.then(config::ensure_app_data_dir) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir.join(config::LOG_DIR), "scopegraph.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("File logging disabled: {}", e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,scopegraph=debug")))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// CH1 -> threshold -> UART, and CH1 -> gain x2 -> pulse detector.
fn build_demo_graph(session: &Session) -> anyhow::Result<()> {
    let Some(scope) = session
        .instruments()
        .find(|i| i.capabilities.contains(Capability::Oscilloscope))
        .map(|i| i.id)
    else {
        tracing::warn!("No oscilloscope connected; graph left empty");
        return Ok(());
    };
    let ch1 = session
        .source_node(scope, 0)?
        .context("oscilloscope has no channel 1")?;

    session.edit_graph(|g| -> scopegraph::Result<()> {
        let digital = g.add_filter("CH1 logic", ThresholdFilter::new(1.65));
        let uart = g.add_filter("UART", UartDecoder::new(115_200.0));
        let gain = g.add_filter("CH1 x2", GainFilter::new(2.0));
        let pulses = g.add_filter("Pulses", PulseDecoder::new(3.0));
        g.bind(digital, 0, StreamId::new(ch1, 0))?;
        g.bind(uart, 0, StreamId::new(digital, 0))?;
        g.bind(gain, 0, StreamId::new(ch1, 0))?;
        g.bind(pulses, 0, StreamId::new(gain, 0))?;
        Ok(())
    })??;

    let stats = session.graph()?.plan().stats.clone();
    tracing::info!("Demo graph ready: {:?}", stats);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config = SessionConfig::load_or_default();
    let _log_guard = init_logging(&config);

    let epochs: usize = std::env::args()
        .nth(1)
        .map(|s| s.parse())
        .transpose()
        .context("epoch count must be a positive number")?
        .unwrap_or(5);

    tracing::info!("Starting scopegraph ({} epochs)", epochs);
    let targets: Vec<String> = if config.instruments.is_empty() {
        DEMO_BENCH.iter().map(|s| s.to_string()).collect()
    } else {
        config.instruments.clone()
    };

    let mut session = Session::new(config);
    for target in &targets {
        if let Err(e) = session.connect(target) {
            tracing::warn!("Skipping {}: {}", target, e);
        }
    }
    build_demo_graph(&session)?;

    let events = session.events();
    session.start()?;
    let mut seen = 0;
    while seen < epochs {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent::EpochEvaluated(summary)) => {
                seen += 1;
                tracing::info!(
                    "Epoch {}: {} node(s), {} packet(s), {} failure(s) in {:?}",
                    summary.epoch,
                    summary.evaluated,
                    summary.packets,
                    summary.failed.len(),
                    summary.elapsed
                );
            }
            Ok(SessionEvent::AcquisitionFailed { instrument, error }) => {
                tracing::warn!("{}: {}", instrument, error);
            }
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("No epoch within 5 s, giving up");
                break;
            }
        }
    }
    session.stop();

    let history = session.history()?;
    tracing::info!(
        "History holds {} epoch(s), {} bytes",
        history.len(),
        history.total_bytes()
    );
    if let Some(latest) = history.latest() {
        for packet in latest.packets().iter().take(8) {
            let fields: Vec<String> = packet
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            tracing::info!(
                "  [{} .. {}] {}",
                scopegraph::graph::decoders::format_duration(packet.start_fs),
                scopegraph::graph::decoders::format_duration(packet.end_fs),
                fields.join(" ")
            );
        }
    }
    Ok(())
}
