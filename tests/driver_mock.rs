//! Driver identification against scripted transports

mod common;

use common::builders::StaticDriverBuilder;
use common::mock_helpers::{link_replying, profile, MockLink};
use scopegraph::instrument::{DriverError, ScpiInstrument};
use scopegraph::transport::TransportError;
use scopegraph::{Capability, CapabilitySet, DriverRegistry, InstrumentDriver};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(50);

fn connect(link: MockLink) -> Result<ScpiInstrument, DriverError> {
    ScpiInstrument::connect(profile("sim_dmm"), Box::new(link), TIMEOUT)
}

#[test]
fn test_silent_device_is_unresponsive() {
    let mut link = MockLink::new();
    link.expect_send()
        .withf(|bytes| bytes.starts_with(b"*IDN?"))
        .times(1)
        .returning(|_| Ok(()));
    link.expect_receive()
        .returning(|timeout| Err(TransportError::Timeout(timeout)));

    assert!(matches!(connect(link), Err(DriverError::Unresponsive(_))));
}

#[test]
fn test_garbage_identity_is_a_protocol_violation() {
    let link = link_replying(b"\x7f\x03garbage");
    assert!(matches!(connect(link), Err(DriverError::ProtocolViolation(_))));
}

#[test]
fn test_foreign_model_is_unsupported() {
    let link = link_replying(b"SCOPEGRAPH,SIMSCOPE-2,0001,1.0\n");
    match connect(link) {
        Err(DriverError::Unsupported { driver, identity }) => {
            assert_eq!(driver, "sim_dmm");
            assert!(identity.contains("SIMSCOPE-2"));
        }
        other => panic!("expected Unsupported, got {:?}", other.err()),
    }
}

#[test]
fn test_closed_transport_is_reported() {
    let mut link = MockLink::new();
    link.expect_send().returning(|_| Err(TransportError::Closed));
    assert!(matches!(
        connect(link),
        Err(DriverError::Transport(TransportError::Closed))
    ));
}

#[test]
fn test_custom_driver_registration() {
    let mut registry = DriverRegistry::with_builtin_drivers();
    registry.register(
        "bench_meter",
        CapabilitySet::of(&[Capability::Multimeter]),
        |_transport, _timeout| {
            Ok(StaticDriverBuilder::new("BM")
                .capabilities(&[Capability::Multimeter])
                .channel(&[1.0])
                .boxed())
        },
    );

    assert!(registry
        .list_drivers(Capability::Multimeter)
        .contains("bench_meter"));
    let driver = registry
        .create("bench_meter", Box::new(MockLink::new()))
        .unwrap();
    assert_eq!(driver.identity().model, "BM");
    assert!(matches!(
        registry.create("nope", Box::new(MockLink::new())),
        Err(DriverError::UnknownDriver(_))
    ));
}
