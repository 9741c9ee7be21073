//! Mock construction helpers

use mockall::mock;
use scopegraph::instrument::ModelProfile;
use scopegraph::transport::TransportError;
use scopegraph::Transport;
use std::time::Duration;

mock! {
    pub Link {}

    impl Transport for Link {
        fn name(&self) -> &str;
        fn path(&self) -> &str;
        fn is_open(&self) -> bool;
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
        fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;
        fn close(&mut self);
    }
}

/// A link that accepts one command and answers it with `reply`.
pub fn link_replying(reply: &'static [u8]) -> MockLink {
    let mut link = MockLink::new();
    link.expect_send().times(1).returning(|_| Ok(()));
    link.expect_receive()
        .times(1)
        .returning(move |_| Ok(reply.to_vec()));
    link
}

/// Built-in SCPI profile for `driver`.
pub fn profile(driver: &str) -> ModelProfile {
    ModelProfile::builtin()
        .iter()
        .find(|p| p.driver == driver)
        .copied()
        .unwrap_or_else(|| panic!("no built-in profile for {}", driver))
}
