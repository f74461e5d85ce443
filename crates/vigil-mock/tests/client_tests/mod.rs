//! Mock client tests against the in-process fake backend.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod mutations;
mod reads;

use vigil_mock::MockClient;
use vigil_mock::fake::FakeBackend;

/// Starts a fake and a client pointed at it.
async fn fake_and_client() -> (FakeBackend, MockClient) {
    let fake = FakeBackend::start().await.unwrap();
    let client = MockClient::new(fake.base_url());
    (fake, client)
}
