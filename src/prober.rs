use std::convert::Infallible;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Instant};

use crate::correlate::{correlate, Correlation, Mismatch, Outstanding};
use crate::error::{Error, Result};
use crate::event::{Outcome, OutcomeEvent};
use crate::packet;
use crate::socket::SocketKind;
use crate::target::Target;
use crate::transport::Transport;

/// Large enough for an IPv4 header plus a reply to a full-MTU request.
const RECV_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy)]
pub struct ProberConfig {
    /// Pause before every request.
    pub interval: Duration,
    /// Upper bound for one attempt, measured from the send.
    pub timeout: Duration,
    /// Echo payload length in bytes.
    pub payload_size: usize,
}

/// How a probe cycle ended, as far as the run loop is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Completed,
    /// The socket was replaced; the next request goes out immediately.
    Reopened,
}

/// Sends echo requests to a single target, one outstanding at a time,
/// and reports one outcome per request.
#[derive(Debug)]
pub struct Prober<T> {
    target: Target,
    transport: T,
    config: ProberConfig,
    identifier: u16,
    sequence: u16,
    last_delivered: Option<(u16, Instant)>,
    events: mpsc::Sender<OutcomeEvent>,
    buf: Vec<u8>,
}

impl<T: Transport> Prober<T> {
    pub fn new(
        target: Target,
        transport: T,
        config: ProberConfig,
        events: mpsc::Sender<OutcomeEvent>,
    ) -> Self {
        Self {
            target,
            transport,
            config,
            identifier: random_identifier(),
            sequence: 0,
            last_delivered: None,
            events,
            buf: vec![0; RECV_BUFFER_SIZE],
        }
    }

    pub fn with_identifier(mut self, identifier: u16) -> Self {
        self.identifier = identifier;
        self
    }

    /// Sequence number the next request will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Probes forever. Returns only when the socket cannot be re-opened
    /// or the event consumer has gone away.
    pub async fn run(mut self) -> Result<Infallible> {
        let mut cycle = Cycle::Completed;
        loop {
            if cycle == Cycle::Completed {
                sleep(self.config.interval).await;
            }
            cycle = self.probe().await?;
        }
    }

    /// Performs one send-and-wait cycle and emits its outcome.
    pub async fn probe(&mut self) -> Result<Cycle> {
        let destination = self.target.addr();
        let outstanding = Outstanding {
            destination,
            sequence: self.sequence,
            identifier: match self.transport.kind() {
                SocketKind::Raw => Some(self.identifier),
                SocketKind::Datagram => None,
            },
        };
        let request = packet::make_echo_request(
            destination,
            self.identifier,
            outstanding.sequence,
            self.config.payload_size,
        )?;

        let sent_at = Instant::now();
        let deadline = sent_at + self.config.timeout;
        let (outcome, cycle) =
            match timeout_at(deadline, self.transport.send_to(&request, destination)).await {
                Ok(Ok(_)) => (
                    self.await_reply(&outstanding, sent_at, deadline).await?,
                    Cycle::Completed,
                ),
                Ok(Err(e)) => {
                    warn!(
                        "{}: sending icmp_seq {} failed: {}",
                        self.target, outstanding.sequence, e
                    );
                    (Outcome::Dropped, Cycle::Completed)
                }
                Err(_) => {
                    // ICMP is connectionless, a write that cannot finish
                    // means the socket itself is broken.
                    warn!(
                        "{}: write deadline exceeded for icmp_seq {}, re-opening socket",
                        self.target, outstanding.sequence
                    );
                    self.transport.reopen().map_err(Error::SocketReopen)?;
                    (Outcome::Dropped, Cycle::Reopened)
                }
            };

        if let Outcome::Delivered(_) = outcome {
            self.last_delivered = Some((outstanding.sequence, sent_at));
        }
        self.emit(outstanding.sequence, sent_at, outcome).await?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(cycle)
    }

    async fn await_reply(
        &mut self,
        outstanding: &Outstanding,
        sent_at: Instant,
        deadline: Instant,
    ) -> Result<Outcome> {
        loop {
            let (size, source) =
                match timeout_at(deadline, self.transport.recv_from(&mut self.buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        warn!(
                            "{}: receive for icmp_seq {} failed: {}",
                            self.target, outstanding.sequence, e
                        );
                        return Ok(Outcome::Dropped);
                    }
                    Err(_) => {
                        debug!(
                            "{}: request timeout for icmp_seq {}",
                            self.target, outstanding.sequence
                        );
                        return Ok(Outcome::Dropped);
                    }
                };
            let received_at = Instant::now();

            let parsed = packet::parse(outstanding.destination, &self.buf[..size]);
            match correlate(parsed, source, outstanding) {
                Correlation::Match if received_at <= deadline => {
                    return Ok(Outcome::Delivered(received_at - sent_at));
                }
                Correlation::Match => {
                    debug!(
                        "{}: reply for icmp_seq {} arrived after the deadline",
                        self.target, outstanding.sequence
                    );
                    return Ok(Outcome::Dropped);
                }
                Correlation::NotMatch(Mismatch::Sequence(sequence)) => {
                    match self.last_delivered {
                        Some((answered, answered_sent_at)) if answered == sequence => {
                            debug!("{}: duplicate reply for icmp_seq {}", self.target, sequence);
                            self.emit(sequence, answered_sent_at, Outcome::DuplicateReply)
                                .await?;
                        }
                        _ => trace!("{}: stale reply for icmp_seq {}", self.target, sequence),
                    }
                }
                Correlation::NotMatch(mismatch) => {
                    trace!("{}: ignoring datagram: {:?}", self.target, mismatch);
                }
                Correlation::Malformed(e) => {
                    debug!("{}: malformed datagram from {}: {}", self.target, source, e);
                }
            }
        }
    }

    async fn emit(&self, sequence: u16, sent_at: Instant, outcome: Outcome) -> Result<()> {
        let event = OutcomeEvent {
            target: self.target.name().clone(),
            sequence,
            sent_at,
            outcome,
        };
        // A full queue blocks here rather than losing the measurement.
        self.events
            .send(event)
            .await
            .map_err(|_| Error::ChannelClosed)
    }
}

fn random_identifier() -> u16 {
    let mut u16_buf = [0; 2];
    match getrandom::getrandom(&mut u16_buf) {
        Ok(()) => u16::from_ne_bytes(u16_buf),
        Err(_) => std::process::id() as u16,
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::IpAddr;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::packet::icmpv4;

    const TARGET: &str = "192.0.2.10";
    const IDENT: u16 = 0x4242;

    type Responder = dyn Fn(u16) -> Vec<(Duration, Vec<u8>, IpAddr)> + Send + Sync;

    struct Pending {
        due: Instant,
        bytes: Vec<u8>,
        source: IpAddr,
    }

    #[derive(Default)]
    struct State {
        pending: Vec<Pending>,
        sent: Vec<u16>,
        fail_sends: usize,
        stall_sends: usize,
        fail_reopen: bool,
        reopened: usize,
    }

    /// In-memory transport that answers each request according to a script.
    struct MockTransport {
        kind: SocketKind,
        state: Arc<Mutex<State>>,
        responder: Arc<Responder>,
    }

    impl Transport for MockTransport {
        fn kind(&self) -> SocketKind {
            self.kind
        }

        async fn send_to(&self, packet: &[u8], dst: IpAddr) -> io::Result<usize> {
            let stall = {
                let mut state = self.state.lock().unwrap();
                if state.fail_sends > 0 {
                    state.fail_sends -= 1;
                    return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
                }
                if state.stall_sends > 0 {
                    state.stall_sends -= 1;
                    true
                } else {
                    let sequence = packet::parse(dst, packet).unwrap().echo.unwrap().sequence;
                    state.sent.push(sequence);
                    let now = Instant::now();
                    for (delay, bytes, source) in (self.responder)(sequence) {
                        state.pending.push(Pending {
                            due: now + delay,
                            bytes,
                            source,
                        });
                    }
                    false
                }
            };
            if stall {
                std::future::pending::<()>().await;
            }
            Ok(packet.len())
        }

        async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
            let due = {
                let state = self.state.lock().unwrap();
                state.pending.iter().map(|p| p.due).min()
            };
            let Some(due) = due else {
                return std::future::pending().await;
            };
            tokio::time::sleep_until(due).await;
            let reply = {
                let mut state = self.state.lock().unwrap();
                let index = state
                    .pending
                    .iter()
                    .position(|p| p.due == due)
                    .unwrap();
                state.pending.remove(index)
            };
            buf[..reply.bytes.len()].copy_from_slice(&reply.bytes);
            Ok((reply.bytes.len(), reply.source))
        }

        fn reopen(&mut self) -> io::Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_reopen {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "no raw sockets"));
            }
            state.reopened += 1;
            Ok(())
        }
    }

    fn target_addr() -> IpAddr {
        TARGET.parse().unwrap()
    }

    fn reply(sequence: u16) -> Vec<u8> {
        icmpv4::make_echo_reply(IDENT, sequence, 56).unwrap()
    }

    fn config() -> ProberConfig {
        ProberConfig {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            payload_size: 56,
        }
    }

    fn setup(
        kind: SocketKind,
        responder: impl Fn(u16) -> Vec<(Duration, Vec<u8>, IpAddr)> + Send + Sync + 'static,
    ) -> (
        Prober<MockTransport>,
        Arc<Mutex<State>>,
        mpsc::Receiver<OutcomeEvent>,
    ) {
        setup_with_capacity(kind, 16, responder)
    }

    fn setup_with_capacity(
        kind: SocketKind,
        capacity: usize,
        responder: impl Fn(u16) -> Vec<(Duration, Vec<u8>, IpAddr)> + Send + Sync + 'static,
    ) -> (
        Prober<MockTransport>,
        Arc<Mutex<State>>,
        mpsc::Receiver<OutcomeEvent>,
    ) {
        let state = Arc::new(Mutex::new(State::default()));
        let transport = MockTransport {
            kind,
            state: Arc::clone(&state),
            responder: Arc::new(responder),
        };
        let (tx, rx) = mpsc::channel(capacity);
        let prober = Prober::new(Target::new(TARGET, target_addr()), transport, config(), tx)
            .with_identifier(IDENT);
        (prober, state, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<OutcomeEvent>) -> Vec<(u16, Outcome)> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((event.sequence, event.outcome));
        }
        events
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn matching_reply_is_delivered() {
        let (mut prober, state, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(ms(10), reply(seq), target_addr())]);

        assert_eq!(prober.probe().await.unwrap(), Cycle::Completed);
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Delivered(ms(10)))]);
        assert_eq!(prober.sequence(), 1);
        assert_eq!(state.lock().unwrap().sent, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reply_does_not_end_the_attempt() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |seq| {
            vec![
                (ms(5), reply(seq.wrapping_sub(1)), target_addr()),
                (ms(20), reply(seq), target_addr()),
            ]
        });

        prober.probe().await.unwrap();
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Delivered(ms(20)))]);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_is_dropped_after_the_timeout() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |_| Vec::new());

        let start = Instant::now();
        prober.probe().await.unwrap();
        assert_eq!(start.elapsed(), config().timeout);
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Dropped)]);
        assert_eq!(prober.sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_not_credited_to_the_next_request() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |seq| match seq {
            0 => vec![(ms(1500), reply(0), target_addr())],
            _ => vec![(ms(800), reply(seq), target_addr())],
        });

        prober.probe().await.unwrap();
        prober.probe().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![(0, Outcome::Dropped), (1, Outcome::Delivered(ms(800)))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_answer_is_reported_as_duplicate() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |seq| match seq {
            0 => vec![
                (ms(10), reply(0), target_addr()),
                (ms(50), reply(0), target_addr()),
            ],
            _ => vec![(ms(100), reply(seq), target_addr())],
        });

        prober.probe().await.unwrap();
        prober.probe().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                (0, Outcome::Delivered(ms(10))),
                (0, Outcome::DuplicateReply),
                (1, Outcome::Delivered(ms(100))),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_and_malformed_datagrams_are_skipped() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |seq| {
            let stranger: IpAddr = "198.51.100.7".parse().unwrap();
            vec![
                (ms(1), vec![1, 2, 3], target_addr()),
                (ms(2), reply(seq), stranger),
                (
                    ms(3),
                    icmpv4::make_echo_reply(IDENT + 1, seq, 56).unwrap(),
                    target_addr(),
                ),
                (ms(4), icmpv4::make_echo_request(IDENT, seq, 56).unwrap(), target_addr()),
                (ms(5), reply(seq), target_addr()),
            ]
        });

        prober.probe().await.unwrap();
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Delivered(ms(5)))]);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_sockets_ignore_the_identifier() {
        let (mut prober, _, mut rx) = setup(SocketKind::Datagram, |seq| {
            vec![(
                ms(7),
                icmpv4::make_echo_reply(0x0001, seq, 56).unwrap(),
                target_addr(),
            )]
        });

        prober.probe().await.unwrap();
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Delivered(ms(7)))]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_error_counts_as_dropped() {
        let (mut prober, state, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(ms(1), reply(seq), target_addr())]);
        state.lock().unwrap().fail_sends = 1;

        assert_eq!(prober.probe().await.unwrap(), Cycle::Completed);
        assert_eq!(prober.probe().await.unwrap(), Cycle::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![(0, Outcome::Dropped), (1, Outcome::Delivered(ms(1)))]
        );
        assert_eq!(state.lock().unwrap().reopened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_write_reopens_the_socket() {
        let (mut prober, state, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(ms(1), reply(seq), target_addr())]);
        state.lock().unwrap().stall_sends = 1;

        assert_eq!(prober.probe().await.unwrap(), Cycle::Reopened);
        assert_eq!(drain(&mut rx), vec![(0, Outcome::Dropped)]);
        assert_eq!(state.lock().unwrap().reopened, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reopen_is_fatal() {
        let (mut prober, state, _rx) = setup(SocketKind::Raw, |_| Vec::new());
        {
            let mut state = state.lock().unwrap();
            state.stall_sends = 1;
            state.fail_reopen = true;
        }

        assert!(matches!(
            prober.probe().await,
            Err(Error::SocketReopen(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_is_fatal() {
        let (mut prober, _, rx) = setup(SocketKind::Raw, |_| Vec::new());
        drop(rx);

        assert!(matches!(prober.probe().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn every_send_is_accounted_for() {
        let (mut prober, _, mut rx) = setup(SocketKind::Raw, |seq| {
            if seq % 3 == 0 {
                Vec::new()
            } else {
                vec![(ms(u64::from(seq) * 7 % 900), reply(seq), target_addr())]
            }
        });

        let mut delivered = 0;
        let mut dropped = 0;
        for _ in 0..30 {
            prober.probe().await.unwrap();
            for (_, outcome) in drain(&mut rx) {
                match outcome {
                    Outcome::Delivered(rtt) => {
                        assert!(rtt <= config().timeout);
                        delivered += 1;
                    }
                    Outcome::Dropped => dropped += 1,
                    Outcome::DuplicateReply => panic!("unexpected duplicate"),
                }
            }
        }
        assert_eq!(delivered, 20);
        assert_eq!(dropped, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_wraps_after_65536_requests() {
        let (mut prober, state, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(Duration::ZERO, reply(seq), target_addr())]);

        for _ in 0..=65536u32 {
            prober.probe().await.unwrap();
            let event = rx.try_recv().unwrap();
            assert!(matches!(event.outcome, Outcome::Delivered(_)));
        }

        let state = state.lock().unwrap();
        assert_eq!(state.sent.len(), 65537);
        assert_eq!(state.sent[65535], 65535);
        assert_eq!(state.sent[65536], 0);
        assert_eq!(prober.sequence(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_the_interval_before_each_request() {
        let (prober, _, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(ms(30), reply(seq), target_addr())]);

        let start = Instant::now();
        let task = tokio::spawn(prober.run());
        let mut sent_at = Vec::new();
        for _ in 0..3 {
            sent_at.push(rx.recv().await.unwrap().sent_at - start);
        }
        task.abort();

        assert_eq!(sent_at, vec![ms(1000), ms(2030), ms(3060)]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_holds_back_the_next_request() {
        let (prober, state, mut rx) = setup_with_capacity(SocketKind::Raw, 1, |_| Vec::new());

        let task = tokio::spawn(prober.run());
        // Nobody reads: seq 0 fills the queue and emitting seq 1 blocks.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(state.lock().unwrap().sent, vec![0, 1]);

        let mut sequences = Vec::new();
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.outcome, Outcome::Dropped);
            sequences.push(event.sequence);
        }
        task.abort();

        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sends_right_after_a_reopen() {
        let (prober, state, mut rx) =
            setup(SocketKind::Raw, |seq| vec![(Duration::ZERO, reply(seq), target_addr())]);
        state.lock().unwrap().stall_sends = 1;

        let start = Instant::now();
        let task = tokio::spawn(prober.run());
        let mut events = Vec::new();
        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            events.push((event.sequence, event.sent_at - start, event.outcome));
        }
        task.abort();

        let timeout = config().timeout;
        let interval = config().interval;
        assert_eq!(
            events,
            vec![
                (0, ms(1000), Outcome::Dropped),
                (1, ms(1000) + timeout, Outcome::Delivered(Duration::ZERO)),
                (2, ms(1000) + timeout + interval, Outcome::Delivered(Duration::ZERO)),
            ]
        );
        assert_eq!(state.lock().unwrap().reopened, 1);
        assert_eq!(state.lock().unwrap().sent, vec![1, 2]);
    }
}
