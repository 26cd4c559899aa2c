//! Builder wiring mocks into a runnable [`Harness`].

use crate::fixtures::test_pool;
use liveroom_load::accounts::AccountSelection;
use liveroom_load::bootstrap::{SessionBootstrapper, SessionPlan};
use liveroom_load::choreography::{Choreography, ChoreographyEngine};
use liveroom_load::clients::{IdentityProvider, SessionClient};
use liveroom_load::entry::EntrySynchronizer;
use liveroom_load::errors::LoadError;
use liveroom_load::mock::{MockIdentityProvider, MockSessionClient, RecordingPacer};
use liveroom_load::pacing::{Pacer, PacingMode};
use liveroom_load::runner::{Harness, PhaseDeadlines, WatchSettings};
use std::sync::Arc;
use std::time::Duration;

/// Builds a harness over a pool of `t*`/`s*` accounts.
///
/// Defaults: fresh mocks, a recording pacer (no real waits), an empty script,
/// one second RPC deadlines.
pub struct TestHarness {
    teachers: usize,
    students: usize,
    client: Arc<MockSessionClient>,
    identity: Arc<MockIdentityProvider>,
    pacer: Arc<dyn Pacer>,
    mode: PacingMode,
    script: Choreography,
    watch: WatchSettings,
    deadlines: PhaseDeadlines,
    rpc_timeout: Duration,
    max_in_flight: Option<usize>,
}

impl TestHarness {
    /// A harness whose sessions hold `teachers` teachers and `students`
    /// students, drawn from a pool of exactly that size.
    #[must_use]
    pub fn new(teachers: usize, students: usize) -> Self {
        Self {
            teachers,
            students,
            client: Arc::new(MockSessionClient::new()),
            identity: Arc::new(MockIdentityProvider::new()),
            pacer: Arc::new(RecordingPacer::new()),
            mode: PacingMode::Uninterruptible,
            script: Choreography::new(),
            watch: WatchSettings::default(),
            deadlines: PhaseDeadlines::default(),
            rpc_timeout: Duration::from_secs(1),
            max_in_flight: None,
        }
    }

    #[must_use]
    pub fn client(mut self, client: Arc<MockSessionClient>) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn identity(mut self, identity: Arc<MockIdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    #[must_use]
    pub fn pacing_mode(mut self, mode: PacingMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn script(mut self, script: Choreography) -> Self {
        self.script = script;
        self
    }

    #[must_use]
    pub fn watch(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    #[must_use]
    pub fn deadlines(mut self, deadlines: PhaseDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    #[must_use]
    pub fn rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    #[must_use]
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Build the harness. Fails like [`Harness::new`] does.
    pub fn build(self) -> Result<Arc<Harness>, LoadError> {
        let identity: Arc<dyn IdentityProvider> = self.identity;
        let client: Arc<dyn SessionClient> = self.client;
        let plan = SessionPlan {
            num_teachers: self.teachers,
            num_students: self.students,
            course_id: "course-1".to_string(),
            location_id: "location-1".to_string(),
            selection: AccountSelection::Leading,
        };

        let bootstrapper = SessionBootstrapper::new(
            test_pool(self.teachers.max(1), self.students.max(1)),
            Arc::clone(&identity),
            Arc::clone(&client),
            plan,
            self.rpc_timeout,
        )?;
        let entry = EntrySynchronizer::new(identity, Arc::clone(&client), self.rpc_timeout)
            .with_max_in_flight(self.max_in_flight);
        let engine = ChoreographyEngine::new(client, self.pacer, self.rpc_timeout)
            .with_pacing_mode(self.mode)
            .with_max_in_flight(self.max_in_flight);

        let harness = Harness::new(bootstrapper, entry, engine, self.script, self.rpc_timeout)?
            .with_watch(self.watch)
            .with_deadlines(self.deadlines);
        Ok(Arc::new(harness))
    }
}
