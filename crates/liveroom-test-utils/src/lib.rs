//! # Live-room Test Utilities
//!
//! Mocks and fixtures for exercising the load harness without a session
//! service.
//!
//! ## Modules
//!
//! - `fixtures` - account pools and accounts files of any size
//! - `harness` - [`TestHarness`] builder wiring mocks into a runnable harness
//!
//! The in-memory capability mocks live in `liveroom_load::mock` behind the
//! `test-utils` feature and are re-exported here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use liveroom_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let client = Arc::new(MockSessionClient::new());
//!     let harness = TestHarness::new(2, 8)
//!         .client(Arc::clone(&client))
//!         .script(Choreography::live_classroom(PacingPlan::default()))
//!         .build()
//!         .unwrap();
//!
//!     let report = harness.runner(&CancellationToken::new()).run().await;
//!     assert!(report.is_success());
//! }
//! ```

pub mod fixtures;
pub mod harness;

pub use fixtures::{accounts_file, test_pool};
pub use harness::TestHarness;
pub use liveroom_load::mock::{
    identity, token_for, MockIdentityProvider, MockSessionClient, RecordedCall, RecordingPacer,
};
