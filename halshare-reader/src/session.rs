use std::sync::Arc;
use std::time::Duration;

use halshare_core::{FrameResult, Sample, SessionId, decode_frame};
use jiff::Zoned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::ProtocolConfig;
use crate::transport::{Connection, RawFrame, TransportError};

/// Lifecycle of a single data acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    NotifyEnabled,
    AwaitingCompletion,
    Completed,
    TimedOut,
    Failed,
}

/// How an acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The completion marker arrived.
    Completed,
    /// No completion marker within the timeout. Samples are partial but valid.
    TimedOut,
    /// The transport failed or the session was cancelled.
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Connection lost while awaiting data")]
    ConnectionLost,

    #[error("Session cancelled")]
    Cancelled,
}

/// Everything a finished session hands back to its caller.
#[derive(Debug)]
pub struct Acquisition {
    pub session_id: SessionId,
    /// Samples in arrival order, oldest first.
    pub samples: Vec<Sample>,
    /// Wall-clock time the completion marker arrived.
    pub completed_at: Option<Zoned>,
    pub outcome: SessionOutcome,
    /// Set exactly when `outcome` is `Failed`.
    pub error: Option<SessionError>,
    /// Frames that were neither samples nor the completion marker.
    pub ignored_frames: usize,
    /// Every state the session passed through, starting at `Idle`.
    pub states: Vec<SessionState>,
}

impl Acquisition {
    pub fn final_state(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Idle)
    }
}

/// Drives one data dump over an established connection.
///
/// A session owns its connection and subscription for its whole lifetime and
/// always tears both down before `acquire` returns.
pub struct Session<C: Connection> {
    id: SessionId,
    connection: C,
    protocol: ProtocolConfig,
    clock: Arc<dyn Clock>,
    states: Vec<SessionState>,
    /// Set as soon as a subscription is requested, so teardown also covers a
    /// request interrupted by cancellation.
    subscribed: bool,
    samples: Vec<Sample>,
    completed_at: Option<Zoned>,
    ignored_frames: usize,
}

impl<C: Connection> Session<C> {
    pub fn new(
        id: SessionId,
        connection: C,
        protocol: ProtocolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            connection,
            protocol,
            clock,
            states: vec![SessionState::Idle],
            subscribed: false,
            samples: Vec::new(),
            completed_at: None,
            ignored_frames: 0,
        }
    }

    /// Run the acquisition to completion, timeout, failure or cancellation.
    ///
    /// Consumes the session: one session performs exactly one acquisition.
    #[instrument(name = "session", skip_all, fields(session_id = %self.id))]
    pub async fn acquire(mut self, timeout: Duration, cancel: &CancellationToken) -> Acquisition {
        let result = self.run(timeout, cancel).await;

        let (outcome, error) = match result {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                warn!(error = %e, samples = self.samples.len(), "Session failed");
                self.transition(SessionState::Failed);
                (SessionOutcome::Failed, Some(e))
            }
        };

        self.teardown().await;

        info!(
            ?outcome,
            samples = self.samples.len(),
            ignored_frames = self.ignored_frames,
            "Session finished"
        );

        Acquisition {
            session_id: self.id,
            samples: self.samples,
            completed_at: self.completed_at,
            outcome,
            error,
            ignored_frames: self.ignored_frames,
            states: self.states,
        }
    }

    pub fn state(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Idle)
    }

    async fn run(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let mut frames = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            frames = self.enable_notifications() => frames?,
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            sent = self.send_command() => sent?,
        };

        info!(timeout_secs = timeout.as_secs(), "Awaiting data");
        self.await_completion(&mut frames, timeout, cancel).await
    }

    async fn enable_notifications(&mut self) -> Result<mpsc::Receiver<RawFrame>, SessionError> {
        let characteristic = self.protocol.notify_characteristic;

        self.subscribed = true;
        let frames = match self.connection.subscribe(characteristic).await {
            Ok(frames) => frames,
            Err(e) => {
                self.subscribed = false;
                return Err(e.into());
            }
        };

        self.transition(SessionState::NotifyEnabled);
        Ok(frames)
    }

    async fn send_command(&mut self) -> Result<(), SessionError> {
        let payload = self.protocol.command_payload();
        debug!(command = %self.protocol.command, bytes = payload.len(), "Sending command");

        self.connection
            .write(self.protocol.command_characteristic, &payload)
            .await?;

        self.transition(SessionState::AwaitingCompletion);
        Ok(())
    }

    async fn await_completion(
        &mut self,
        frames: &mut mpsc::Receiver<RawFrame>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return Err(SessionError::ConnectionLost);
                    };
                    if self.handle_frame(&frame) {
                        self.transition(SessionState::Completed);
                        return Ok(SessionOutcome::Completed);
                    }
                }
                _ = &mut deadline => {
                    warn!(
                        timeout_secs = timeout.as_secs(),
                        samples = self.samples.len(),
                        "Timed out waiting for end of data"
                    );
                    self.transition(SessionState::TimedOut);
                    return Ok(SessionOutcome::TimedOut);
                }
            }
        }
    }

    /// Decode one frame into the buffer. Returns true on the completion marker.
    fn handle_frame(&mut self, frame: &[u8]) -> bool {
        match decode_frame(frame) {
            FrameResult::Completion => {
                let completed_at = self.clock.now();
                info!(%completed_at, samples = self.samples.len(), "End of data received");
                self.completed_at = Some(completed_at);
                true
            }
            FrameResult::Samples(samples) => {
                debug!(count = samples.len(), "Decoded samples");
                self.samples.extend(samples);
                false
            }
            FrameResult::Ignored => {
                self.ignored_frames += 1;
                warn!(len = frame.len(), frame = %hex(frame), "Ignoring malformed frame");
                false
            }
        }
    }

    /// Best-effort cleanup. Failures are logged, never raised.
    async fn teardown(&mut self) {
        if self.subscribed {
            self.subscribed = false;
            let characteristic = self.protocol.notify_characteristic;
            if let Err(e) = self.connection.unsubscribe(characteristic).await {
                warn!(error = %e, "Failed to disable notifications");
            }
        }

        if let Err(e) = self.connection.disconnect().await {
            warn!(error = %e, "Failed to disconnect");
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state(), to = ?next, "Session state change");
        self.states.push(next);
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use halshare_core::DeviceAddress;
    use jiff::civil::date;
    use jiff::tz::TimeZone;
    use uuid::Uuid;

    use super::SessionState::*;
    use super::*;
    use crate::clock::FixedClock;
    use crate::transport::mock::{MockCall, MockScript, MockTransport};
    use crate::transport::{ConnectionError, Transport};

    const ADDRESS: &str = "D6:74:4F:68:2B:05";

    fn completion_time() -> Zoned {
        date(2024, 1, 1)
            .at(10, 0, 0, 0)
            .to_zoned(TimeZone::UTC)
            .unwrap()
    }

    async fn run_session(
        transport: &MockTransport,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Acquisition {
        let connection = transport
            .connect(&DeviceAddress::new(ADDRESS))
            .await
            .unwrap();
        let clock = Arc::new(FixedClock(completion_time()));
        Session::new(SessionId::new(), connection, ProtocolConfig::default(), clock)
            .acquire(timeout, cancel)
            .await
    }

    /// Connection whose handshake steps take a while, for interrupting them.
    #[derive(Default)]
    struct SlowConnection {
        subscribe_delay: Duration,
        write_delay: Duration,
        log: Arc<Mutex<Vec<&'static str>>>,
        notify: Option<mpsc::Sender<RawFrame>>,
    }

    impl SlowConnection {
        fn record(&self, step: &'static str) {
            self.log.lock().unwrap().push(step);
        }
    }

    #[async_trait]
    impl Connection for SlowConnection {
        async fn subscribe(
            &mut self,
            _characteristic: Uuid,
        ) -> Result<mpsc::Receiver<RawFrame>, TransportError> {
            self.record("subscribe");
            tokio::time::sleep(self.subscribe_delay).await;
            let (tx, rx) = mpsc::channel(4);
            self.notify = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&mut self, _characteristic: Uuid) -> Result<(), TransportError> {
            self.record("unsubscribe");
            self.notify = None;
            Ok(())
        }

        async fn write(
            &mut self,
            _characteristic: Uuid,
            _payload: &[u8],
        ) -> Result<(), TransportError> {
            self.record("write");
            tokio::time::sleep(self.write_delay).await;
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<(), ConnectionError> {
            self.record("disconnect");
            Ok(())
        }
    }

    async fn run_slow(connection: SlowConnection, cancel_after: Option<Duration>) -> Acquisition {
        let cancel = CancellationToken::new();
        match cancel_after {
            Some(delay) => {
                let trigger = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    trigger.cancel();
                });
            }
            None => cancel.cancel(),
        }

        let clock = Arc::new(FixedClock(completion_time()));
        Session::new(SessionId::new(), connection, ProtocolConfig::default(), clock)
            .acquire(Duration::from_secs(60), &cancel)
            .await
    }

    fn teardown_calls(calls: &[MockCall]) -> (usize, usize) {
        let unsubscribes = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Unsubscribe(_)))
            .count();
        let disconnects = calls
            .iter()
            .filter(|c| matches!(c, MockCall::Disconnect))
            .count();
        (unsubscribes, disconnects)
    }

    #[tokio::test]
    async fn completes_on_marker() {
        let script = MockScript::new(vec![vec![0x05, 0x28], vec![0x0A, 0x30], b"EN".to_vec()]);
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Completed);
        assert!(acquisition.error.is_none());
        assert_eq!(acquisition.completed_at, Some(completion_time()));
        assert_eq!(
            acquisition.samples,
            vec![Sample::from_pair(0x05, 0x28), Sample::from_pair(0x0A, 0x30)]
        );
        assert_eq!(acquisition.samples[0].temperature_celsius, 27.5);
        assert_eq!(acquisition.samples[1].temperature_celsius, 28.0);
        assert_eq!(
            acquisition.states,
            vec![Idle, NotifyEnabled, AwaitingCompletion, Completed]
        );
    }

    #[tokio::test]
    async fn drives_protocol_in_order() {
        let transport = MockTransport::single(ADDRESS, MockScript::new(vec![b"EN".to_vec()]));
        let protocol = ProtocolConfig::default();

        run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(
            transport.calls(),
            vec![
                MockCall::Connect(DeviceAddress::new(ADDRESS)),
                MockCall::Subscribe(protocol.notify_characteristic),
                MockCall::Write(protocol.command_characteristic, b"GETDATA\n".to_vec()),
                MockCall::Unsubscribe(protocol.notify_characteristic),
                MockCall::Disconnect,
            ]
        );
    }

    #[tokio::test]
    async fn ignored_frames_do_not_abort() {
        let script = MockScript::new(vec![
            vec![],
            vec![0x01],
            vec![0x05, 0x28],
            vec![0x01, 0x02, 0x03],
            b"EN".to_vec(),
        ]);
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Completed);
        assert_eq!(acquisition.ignored_frames, 3);
        assert_eq!(acquisition.samples, vec![Sample::from_pair(0x05, 0x28)]);
    }

    #[tokio::test]
    async fn frames_after_marker_are_not_buffered() {
        let script = MockScript::new(vec![vec![0x05, 0x28], b"EN".to_vec(), vec![0x01, 0x30]]);
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.samples.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_partial_samples_in_order() {
        let script = MockScript::new(vec![vec![0x05, 0x28, 0x06, 0x29], vec![0x07, 0x2A]]);
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(30), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::TimedOut);
        assert!(acquisition.error.is_none());
        assert!(acquisition.completed_at.is_none());
        let intervals: Vec<u8> = acquisition
            .samples
            .iter()
            .map(|s| s.interval_minutes)
            .collect();
        assert_eq!(intervals, vec![0x05, 0x06, 0x07]);
        assert_eq!(teardown_calls(&transport.calls()), (1, 1));
        assert_eq!(
            acquisition.states,
            vec![Idle, NotifyEnabled, AwaitingCompletion, TimedOut]
        );
    }

    #[tokio::test]
    async fn rejected_subscription_fails_without_unsubscribe() {
        let script = MockScript {
            fail_subscribe: true,
            ..Default::default()
        };
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Failed);
        assert!(matches!(
            acquisition.error,
            Some(SessionError::Transport(TransportError::Subscribe { .. }))
        ));
        assert_eq!(teardown_calls(&transport.calls()), (0, 1));
        assert_eq!(acquisition.states, vec![Idle, Failed]);
        assert_eq!(acquisition.final_state(), Failed);
    }

    #[tokio::test]
    async fn failed_write_still_unsubscribes() {
        let script = MockScript {
            fail_write: true,
            ..Default::default()
        };
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Failed);
        assert!(matches!(
            acquisition.error,
            Some(SessionError::Transport(TransportError::Write { .. }))
        ));
        assert_eq!(teardown_calls(&transport.calls()), (1, 1));
        assert_eq!(acquisition.states, vec![Idle, NotifyEnabled, Failed]);
    }

    #[tokio::test]
    async fn lost_link_keeps_partial_samples() {
        let script = MockScript {
            frames: vec![vec![0x05, 0x28]],
            drop_link: true,
            ..Default::default()
        };
        let transport = MockTransport::single(ADDRESS, script);

        let acquisition =
            run_session(&transport, Duration::from_secs(5), &CancellationToken::new()).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Failed);
        assert!(matches!(acquisition.error, Some(SessionError::ConnectionLost)));
        assert_eq!(acquisition.samples, vec![Sample::from_pair(0x05, 0x28)]);
        assert_eq!(teardown_calls(&transport.calls()), (1, 1));
        assert_eq!(acquisition.final_state(), Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_tears_down_before_returning() {
        let script = MockScript::new(vec![vec![0x05, 0x28]]);
        let transport = MockTransport::single(ADDRESS, script);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let acquisition = run_session(&transport, Duration::from_secs(60), &cancel).await;

        assert_eq!(acquisition.outcome, SessionOutcome::Failed);
        assert!(matches!(acquisition.error, Some(SessionError::Cancelled)));
        assert_eq!(acquisition.samples.len(), 1);
        assert_eq!(teardown_calls(&transport.calls()), (1, 1));
        assert_eq!(
            acquisition.states,
            vec![Idle, NotifyEnabled, AwaitingCompletion, Failed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_subscribe_still_unsubscribes() {
        let connection = SlowConnection {
            subscribe_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let log = Arc::clone(&connection.log);

        let acquisition = run_slow(connection, Some(Duration::from_millis(50))).await;

        assert!(matches!(acquisition.error, Some(SessionError::Cancelled)));
        assert_eq!(acquisition.states, vec![Idle, Failed]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["subscribe", "unsubscribe", "disconnect"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_write_still_unsubscribes() {
        let connection = SlowConnection {
            write_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let log = Arc::clone(&connection.log);

        let acquisition = run_slow(connection, Some(Duration::from_millis(50))).await;

        assert!(matches!(acquisition.error, Some(SessionError::Cancelled)));
        assert_eq!(acquisition.states, vec![Idle, NotifyEnabled, Failed]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["subscribe", "write", "unsubscribe", "disconnect"]
        );
    }

    #[tokio::test]
    async fn pre_cancelled_session_skips_handshake() {
        for _ in 0..20 {
            let connection = SlowConnection::default();
            let log = Arc::clone(&connection.log);

            let acquisition = run_slow(connection, None).await;

            assert!(matches!(acquisition.error, Some(SessionError::Cancelled)));
            assert_eq!(acquisition.states, vec![Idle, Failed]);
            assert_eq!(*log.lock().unwrap(), vec!["disconnect"]);
        }
    }

    #[test]
    fn hex_renders_lowercase_pairs() {
        assert_eq!(hex(&[0x05, 0xAB, 0x00]), "05ab00");
    }
}
