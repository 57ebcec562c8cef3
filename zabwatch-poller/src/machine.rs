//! The timeout-governed poll state machine.
//!
//! One cooperative loop drives the machine by calling [`PollStateMachine::tick`]
//! with the current time; no call blocks the caller. Each cycle opens
//! exactly one transport request, watches its phase progression under a
//! per-phase deadline, hands a successful payload to the configured parser,
//! and publishes the parsed list as the new alert snapshot. Every failure
//! path - synthesized timeout, transport failure, non-200 status - converges
//! on the same fixed-delay re-poll.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use zabwatch_ingest::AlertParser;
use zabwatch_types::AlertRecord;

use crate::change::snapshots_equal;
use crate::config::PollerConfig;
use crate::transport::{
    Transport, TransportHandle, TransportPhase, TransportRequest, TransportStatus,
};

/// HTTP status synthesized when an in-flight phase overruns its deadline.
const STATUS_TIMEOUT: u16 = 408;

/// Status recorded for an outright transport failure.
const STATUS_FAILED: u16 = 0;

/// The machine's current state. It runs forever; there is no terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Open the next request.
    Request,
    /// A request is outstanding; watch its phases.
    AwaitResponse,
    /// A terminal outcome is in hand; parse or discard it.
    HandleResponse,
    /// Reserved for animating the delta between snapshots; currently a
    /// pass-through that schedules the re-poll.
    Transition,
    /// Wait out the re-poll delay.
    Sleep,
}

/// Terminal outcome of one fetch, uniform across success, failure, and
/// synthesized timeout.
#[derive(Debug)]
struct FetchOutcome {
    status: u16,
    body: Option<String>,
}

/// Poll-fetch controller.
///
/// Invariant: `active_request` is `Some` iff the state is
/// [`PollState::AwaitResponse`], at every tick boundary. The handle is
/// dropped on every terminal exit - including the synthesized timeout, so
/// the transport's resources are never left dangling behind one.
#[derive(Debug)]
pub struct PollStateMachine {
    transport: Box<dyn Transport>,
    parser: Box<dyn AlertParser>,
    config: PollerConfig,

    state: PollState,
    active_request: Option<Box<dyn TransportHandle>>,
    phase: TransportPhase,
    deadline: Option<Instant>,
    wait_until: Option<Instant>,
    outcome: Option<FetchOutcome>,

    alerts: Vec<AlertRecord>,
    last_success: Option<Instant>,
    changed_on_last_fetch: bool,
}

impl PollStateMachine {
    /// Create a machine in the `Request` state; the first tick opens the
    /// first request.
    pub fn new(
        transport: Box<dyn Transport>,
        parser: Box<dyn AlertParser>,
        config: PollerConfig,
    ) -> Self {
        Self {
            transport,
            parser,
            config,
            state: PollState::Request,
            active_request: None,
            phase: TransportPhase::Idle,
            deadline: None,
            wait_until: None,
            outcome: None,
            alerts: Vec::new(),
            last_success: None,
            changed_on_last_fetch: false,
        }
    }

    /// Advance the machine by one tick. Never blocks.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            PollState::Request => self.tick_request(),
            PollState::AwaitResponse => self.tick_await_response(now),
            PollState::HandleResponse => self.tick_handle_response(now),
            PollState::Transition => self.state = self.schedule_repoll(now),
            PollState::Sleep => {
                if self.wait_until.map_or(true, |until| now >= until) {
                    self.state = PollState::Request;
                }
            }
        }
    }

    /// The current alert snapshot, replaced wholesale on every successful
    /// fetch and retained unchanged across failed ones.
    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    /// Whether the most recent successful fetch differed from the snapshot
    /// it replaced.
    pub fn changed_on_last_fetch(&self) -> bool {
        self.changed_on_last_fetch
    }

    /// When the last fully successful fetch happened, if ever.
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Whether the published snapshot is recent enough to display as live
    /// data. Goes false `staleness_window` after the last success.
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.last_success
            .is_some_and(|at| now.duration_since(at) < self.config.staleness_window)
    }

    /// The machine's current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Whether a transport request is outstanding.
    pub fn has_active_request(&self) -> bool {
        self.active_request.is_some()
    }

    fn tick_request(&mut self) {
        if self.active_request.is_some() {
            // Opening a second request while one is outstanding is a
            // programming error; drop the stray open and keep going.
            warn!("request already active entering Request state; dropping stray open");
        } else {
            let request = feed_request(&self.config);
            self.active_request = Some(self.transport.open(&request));
            self.phase = TransportPhase::Idle;
            self.deadline = None;
        }
        self.state = PollState::AwaitResponse;
    }

    fn tick_await_response(&mut self, now: Instant) {
        let status = match self.active_request.as_mut() {
            Some(handle) => handle.poll(),
            None => {
                error!("no active request in AwaitResponse state");
                self.state = PollState::Request;
                return;
            }
        };

        match status {
            TransportStatus::Pending(phase) => {
                if phase != self.phase {
                    debug!(from = ?self.phase, to = ?phase, "transport phase change");
                    if phase.is_deadline_governed() {
                        // Every transition into or between in-flight
                        // phases re-arms the deadline.
                        self.deadline = Some(now + self.config.phase_timeout);
                    } else {
                        self.deadline = None;
                    }
                    self.phase = phase;
                }
                if self.phase.is_deadline_governed()
                    && self.deadline.is_some_and(|deadline| now > deadline)
                {
                    warn!(phase = ?self.phase, "transport stalled past phase deadline");
                    self.finish_fetch(FetchOutcome {
                        status: STATUS_TIMEOUT,
                        body: None,
                    });
                }
            }
            TransportStatus::Complete { status, body } => {
                info!(status, bytes = body.len(), "response complete");
                self.finish_fetch(FetchOutcome {
                    status,
                    body: Some(body),
                });
            }
            TransportStatus::Truncated { status, body } => {
                if self.config.salvage_truncated {
                    warn!(status, bytes = body.len(), "response truncated; salvaging partial payload");
                    self.finish_fetch(FetchOutcome {
                        status,
                        body: Some(body),
                    });
                } else {
                    warn!(status, "response truncated; treating as transport failure");
                    self.finish_fetch(FetchOutcome {
                        status: STATUS_FAILED,
                        body: None,
                    });
                }
            }
            TransportStatus::Failed { reason } => {
                warn!(%reason, "transport failure");
                self.finish_fetch(FetchOutcome {
                    status: STATUS_FAILED,
                    body: None,
                });
            }
        }
    }

    /// Record the terminal outcome and release the request handle. This is
    /// the single exit path out of `AwaitResponse`.
    fn finish_fetch(&mut self, outcome: FetchOutcome) {
        self.outcome = Some(outcome);
        self.active_request = None;
        self.deadline = None;
        self.state = PollState::HandleResponse;
    }

    fn tick_handle_response(&mut self, now: Instant) {
        let Some(outcome) = self.outcome.take() else {
            error!("no fetch outcome in HandleResponse state");
            self.state = self.schedule_repoll(now);
            return;
        };

        if outcome.status == 200 {
            let payload = outcome.body.unwrap_or_default();
            let results = self.parser.parse(&payload);

            let changed = !snapshots_equal(&self.alerts, &results);
            if changed {
                info!(count = results.len(), "alerts changed");
            } else {
                debug!("no changes");
            }

            // Replacement is unconditional; the comparison above is
            // observability only.
            self.alerts = results;
            self.changed_on_last_fetch = changed;
            self.last_success = Some(now);

            // Transition runs in the same tick as a successful
            // HandleResponse; it is currently a pass-through.
            self.state = self.schedule_repoll(now);
        } else {
            debug!(status = outcome.status, "discarding failed fetch");
            self.state = self.schedule_repoll(now);
        }
    }

    /// The single transition function out of `Transition`: schedule the
    /// fixed re-poll delay and drop into `Sleep`.
    fn schedule_repoll(&mut self, now: Instant) -> PollState {
        self.wait_until = Some(now + self.config.retry_delay);
        PollState::Sleep
    }
}

/// The GET request for the delimited alert feed, with the static bearer
/// token attached.
fn feed_request(config: &PollerConfig) -> TransportRequest {
    TransportRequest::get(&config.url)
        .header("Authorization", format!("Bearer {}", config.token))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use zabwatch_ingest::TextAlertParser;
    use zabwatch_types::HostRef;

    /// Transport whose handles replay a scripted status sequence; the last
    /// entry repeats forever, so a single `Pending(Connect)` models a
    /// stalled connection.
    #[derive(Debug)]
    struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<TransportStatus>>>,
        opens: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<TransportStatus>) -> (Self, Arc<AtomicUsize>) {
            let opens = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: Arc::new(Mutex::new(script.into())),
                    opens: opens.clone(),
                },
                opens,
            )
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self, request: &TransportRequest) -> Box<dyn TransportHandle> {
            assert_eq!(request.method, "GET");
            self.opens.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedHandle {
                script: self.script.clone(),
            })
        }
    }

    #[derive(Debug)]
    struct ScriptedHandle {
        script: Arc<Mutex<VecDeque<TransportStatus>>>,
    }

    impl TransportHandle for ScriptedHandle {
        fn poll(&mut self) -> TransportStatus {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script
                    .front()
                    .cloned()
                    .unwrap_or(TransportStatus::Pending(TransportPhase::Idle))
            }
        }
    }

    /// Wraps the real text parser, counting invocations.
    #[derive(Debug)]
    struct CountingParser {
        calls: Arc<AtomicUsize>,
        inner: TextAlertParser,
    }

    impl CountingParser {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    inner: TextAlertParser::new(),
                },
                calls,
            )
        }
    }

    impl AlertParser for CountingParser {
        fn parse(&self, payload: &str) -> Vec<AlertRecord> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.parse(payload)
        }
    }

    fn machine_with(
        script: Vec<TransportStatus>,
    ) -> (PollStateMachine, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let (transport, opens) = ScriptedTransport::new(script);
        let (parser, parses) = CountingParser::new();
        let machine = PollStateMachine::new(
            Box::new(transport),
            Box::new(parser),
            PollerConfig::default(),
        );
        (machine, opens, parses)
    }

    fn complete(status: u16, body: &str) -> TransportStatus {
        TransportStatus::Complete {
            status,
            body: body.to_string(),
        }
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_successful_fetch_end_to_end() {
        let (mut machine, _, parses) = machine_with(vec![
            TransportStatus::Pending(TransportPhase::Connect),
            TransportStatus::Pending(TransportPhase::Body),
            complete(200, "1;5;0;10;host;msg\n"),
        ]);
        let base = Instant::now();

        machine.tick(base);
        assert_eq!(machine.state(), PollState::AwaitResponse);
        assert!(machine.has_active_request());

        machine.tick(base + ms(10)); // Connect
        machine.tick(base + ms(20)); // Body
        machine.tick(base + ms(30)); // Complete -> HandleResponse
        assert_eq!(machine.state(), PollState::HandleResponse);
        assert!(!machine.has_active_request());

        machine.tick(base + ms(40)); // parse + transition -> Sleep
        assert_eq!(machine.state(), PollState::Sleep);
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert!(machine.changed_on_last_fetch());
        assert!(machine.is_fresh(base + ms(50)));

        assert_eq!(
            machine.alerts(),
            &[AlertRecord::new(1, HostRef::Id(10), 5, false)]
        );
    }

    #[test]
    fn test_timeout_synthesizes_408_without_parsing() {
        let (mut machine, _, parses) =
            machine_with(vec![TransportStatus::Pending(TransportPhase::Connect)]);
        let base = Instant::now();

        machine.tick(base); // open
        machine.tick(base + ms(10)); // Connect arms deadline at +15010ms
        machine.tick(base + ms(14_000)); // not yet stalled
        assert_eq!(machine.state(), PollState::AwaitResponse);

        machine.tick(base + ms(15_100)); // past deadline -> synthesized 408
        assert_eq!(machine.state(), PollState::HandleResponse);
        assert!(!machine.has_active_request(), "timeout must release the handle");

        machine.tick(base + ms(15_110)); // non-200 path -> Sleep for 10s
        assert_eq!(machine.state(), PollState::Sleep);
        assert_eq!(parses.load(Ordering::SeqCst), 0);
        assert!(!machine.is_fresh(base + ms(15_200)));

        machine.tick(base + ms(20_000)); // still sleeping
        assert_eq!(machine.state(), PollState::Sleep);

        machine.tick(base + ms(25_200)); // wait elapsed -> Request
        assert_eq!(machine.state(), PollState::Request);
    }

    #[test]
    fn test_phase_change_rearms_deadline() {
        let (mut machine, _, _) = machine_with(vec![
            TransportStatus::Pending(TransportPhase::Dns),
            TransportStatus::Pending(TransportPhase::Connect),
        ]);
        let base = Instant::now();

        machine.tick(base); // open
        machine.tick(base + ms(10)); // Dns, deadline +15010
        machine.tick(base + ms(14_000)); // Connect, deadline re-armed to +29000
        machine.tick(base + ms(16_000)); // old deadline passed, new one not
        assert_eq!(machine.state(), PollState::AwaitResponse);

        machine.tick(base + ms(29_100));
        assert_eq!(machine.state(), PollState::HandleResponse);
    }

    #[test]
    fn test_pre_connection_phases_have_no_deadline() {
        let (mut machine, _, _) =
            machine_with(vec![TransportStatus::Pending(TransportPhase::NetworkInit)]);
        let base = Instant::now();

        machine.tick(base);
        machine.tick(base + ms(10));
        machine.tick(base + Duration::from_secs(300));
        assert_eq!(machine.state(), PollState::AwaitResponse);
    }

    #[test]
    fn test_non_200_keeps_previous_snapshot() {
        let (mut machine, _, parses) = machine_with(vec![complete(200, "1;5;0;10;host;msg\n")]);
        let base = Instant::now();
        run_one_cycle(&mut machine, base);
        assert_eq!(machine.alerts().len(), 1);

        // Swap in a failing script for the next cycle.
        let (transport, _) = ScriptedTransport::new(vec![complete(503, "oops")]);
        machine.transport = Box::new(transport);

        machine.tick(base + ms(10_100)); // Sleep elapsed -> Request
        machine.tick(base + ms(10_110)); // open
        machine.tick(base + ms(10_120)); // 503 -> HandleResponse
        machine.tick(base + ms(10_130)); // discard -> Sleep
        assert_eq!(machine.state(), PollState::Sleep);

        assert_eq!(machine.alerts().len(), 1, "failed fetch must not touch the snapshot");
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert!(machine.changed_on_last_fetch(), "flag reflects the last successful fetch");
    }

    #[test]
    fn test_refetching_same_payload_reports_no_change() {
        let (mut machine, _, _) = machine_with(vec![complete(200, "1;5;0;10;host;msg\n")]);
        let base = Instant::now();

        run_one_cycle(&mut machine, base);
        assert!(machine.changed_on_last_fetch());

        let second = base + ms(10_100);
        run_one_cycle(&mut machine, second);
        assert!(!machine.changed_on_last_fetch());
        assert_eq!(machine.alerts().len(), 1);
    }

    #[test]
    fn test_truncated_payload_is_a_failure_by_default() {
        let (mut machine, _, parses) = machine_with(vec![TransportStatus::Truncated {
            status: 200,
            body: "1;5;0;10;ho".to_string(),
        }]);
        let base = Instant::now();

        machine.tick(base);
        machine.tick(base + ms(10));
        assert_eq!(machine.state(), PollState::HandleResponse);
        machine.tick(base + ms(20));
        assert_eq!(machine.state(), PollState::Sleep);
        assert_eq!(parses.load(Ordering::SeqCst), 0);
        assert!(machine.alerts().is_empty());
    }

    #[test]
    fn test_truncated_payload_salvaged_when_configured() {
        let (transport, _) = ScriptedTransport::new(vec![TransportStatus::Truncated {
            status: 200,
            body: "1;5;0;10;host;msg\n2;4;1;11;trunca".to_string(),
        }]);
        let (parser, parses) = CountingParser::new();
        let config = PollerConfig {
            salvage_truncated: true,
            ..PollerConfig::default()
        };
        let mut machine = PollStateMachine::new(Box::new(transport), Box::new(parser), config);
        let base = Instant::now();

        machine.tick(base);
        machine.tick(base + ms(10));
        machine.tick(base + ms(20));
        assert_eq!(parses.load(Ordering::SeqCst), 1);
        assert_eq!(machine.alerts().len(), 2);
        assert_eq!(machine.alerts()[0], AlertRecord::new(1, HostRef::Id(10), 5, false));
    }

    #[test]
    fn test_handle_present_iff_awaiting_response() {
        let (mut machine, _, _) = machine_with(vec![
            TransportStatus::Pending(TransportPhase::Connect),
            complete(200, ""),
        ]);
        let base = Instant::now();

        for i in 0..8 {
            machine.tick(base + ms(i * 10));
            assert_eq!(
                machine.has_active_request(),
                machine.state() == PollState::AwaitResponse,
                "invariant violated at tick {i} in {:?}",
                machine.state()
            );
        }
    }

    #[test]
    fn test_each_cycle_opens_exactly_one_request() {
        let (mut machine, opens, _) = machine_with(vec![complete(200, "")]);
        let base = Instant::now();

        run_one_cycle(&mut machine, base);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        run_one_cycle(&mut machine, base + ms(10_100));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    /// Drive the machine from `Request`/`Sleep` through one full fetch back
    /// into `Sleep`.
    fn run_one_cycle(machine: &mut PollStateMachine, start: Instant) {
        for i in 0..10 {
            machine.tick(start + ms(i * 10));
            if machine.state() == PollState::Sleep {
                return;
            }
        }
        panic!("cycle did not finish, stuck in {:?}", machine.state());
    }
}
