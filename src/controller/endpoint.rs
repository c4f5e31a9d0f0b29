//! # Controller endpoints.
//!
//! One [`Endpoint`] per connected controller. The reader task assembles
//! lines within a fixed budget and feeds them into the supervisor's merged
//! command channel; the writer task drains a bounded outbound queue. The
//! main loop never awaits either side.
//!
//! ## Overflow behavior
//! - **Inbound**: a line longer than the budget is dropped, the parser
//!   resyncs at the next newline, and one overflow marker is reported.
//! - **Outbound**: a full queue marks the endpoint unresponsive; events are
//!   dropped from then on, and a single `overflow` line is queued the
//!   moment space returns, so the first thing a lagging controller reads
//!   after catching up is the fact that it lagged.

use std::os::fd::OwnedFd;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Ts;
use crate::events::Event;

use super::dump::DumpCursor;
use super::stream::RawStream;

pub type CtlId = u64;

/// Traffic from the I/O pumps and the acceptor into the main loop.
#[derive(Debug)]
pub enum CtlMsg {
    /// A complete protocol line from a controller.
    Line { ctl: CtlId, line: String },
    /// An overlong line was dropped on this controller's input.
    LineOverflow { ctl: CtlId },
    /// A stream hit EOF or an I/O error; the endpoint is dead.
    Closed { ctl: CtlId },
    /// The listening socket accepted a new connection.
    Conn { fd: OwnedFd },
}

/// Output of the line assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    Line(String),
    Overflow,
}

/// Fixed-budget line assembly with drop-and-resync on overflow.
pub struct LineAssembler {
    buf: Vec<u8>,
    max: usize,
    skipping: bool,
}

impl LineAssembler {
    /// `limit` is the protocol's line buffer size; the longest accepted
    /// line is one byte shorter, leaving room for the newline.
    pub fn new(limit: usize) -> LineAssembler {
        LineAssembler {
            buf: Vec::new(),
            max: limit.saturating_sub(1).max(1),
            skipping: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<Assembled>) {
        for &b in bytes {
            if b == b'\n' {
                if self.skipping {
                    self.skipping = false;
                } else {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    out.push(Assembled::Line(line));
                }
            } else if self.skipping {
                continue;
            } else if self.buf.len() >= self.max {
                self.buf.clear();
                self.skipping = true;
                out.push(Assembled::Overflow);
            } else {
                self.buf.push(b);
            }
        }
    }
}

/// The main loop's handle on one controller.
pub struct Endpoint {
    id: CtlId,
    out_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    has_output: bool,
    overflowed: bool,
    overflow_since: Option<Ts>,
    closed: bool,
    /// In-progress statedump, if any.
    pub dump: Option<DumpCursor>,
    /// Set when this endpoint belongs to a service's control socket.
    pub owner: Option<String>,
}

impl Endpoint {
    /// Build an endpoint over pre-created channel halves. The I/O pumps are
    /// spawned separately by [`Endpoint::spawn`]; tests drive this directly
    /// with a bare channel.
    pub fn new(
        id: CtlId,
        out_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
        has_output: bool,
        owner: Option<String>,
    ) -> Endpoint {
        Endpoint {
            id,
            out_tx,
            cancel,
            has_output,
            overflowed: false,
            overflow_since: None,
            closed: false,
            dump: None,
            owner,
        }
    }

    /// Spawn the reader and writer pumps for a stream pair and return the
    /// endpoint. Either side may be absent for one-way controllers.
    pub fn spawn(
        id: CtlId,
        input: Option<OwnedFd>,
        output: Option<OwnedFd>,
        cmd_tx: mpsc::Sender<CtlMsg>,
        line_limit: usize,
        queue_depth: usize,
        owner: Option<String>,
    ) -> std::io::Result<Endpoint> {
        let cancel = CancellationToken::new();
        let (out_tx, out_rx) = mpsc::channel(queue_depth.max(1));

        if let Some(fd) = input {
            let stream = RawStream::new(fd)?;
            tokio::spawn(read_pump(
                stream,
                id,
                cmd_tx.clone(),
                line_limit,
                cancel.clone(),
            ));
        }
        let has_output = output.is_some();
        if let Some(fd) = output {
            let stream = RawStream::new(fd)?;
            tokio::spawn(write_pump(stream, id, out_rx, cmd_tx, cancel.clone()));
        }
        Ok(Endpoint::new(id, out_tx, cancel, has_output, owner))
    }

    pub fn id(&self) -> CtlId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// How long this endpoint has been unresponsive, if it is.
    pub fn overflow_since(&self) -> Option<Ts> {
        self.overflow_since
    }

    /// Stop the pumps; dropping their streams closes the descriptors.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn send_event(&mut self, event: &Event, now: Ts) {
        self.send_line(event.to_line(), now);
    }

    /// Queue one line, applying the lossy overflow protocol.
    pub fn send_line(&mut self, line: String, now: Ts) {
        if self.closed || !self.has_output {
            return;
        }
        if self.overflowed {
            match self.out_tx.try_send(Event::Overflow.to_line()) {
                Ok(()) => {
                    self.overflowed = false;
                    self.overflow_since = None;
                }
                Err(mpsc::error::TrySendError::Full(_)) => return,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.closed = true;
                    return;
                }
            }
        }
        match self.out_tx.try_send(line) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflowed = true;
                self.overflow_since = Some(now);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.closed = true,
        }
    }

    /// True once every queued line has been handed to the writer.
    pub fn drained(&self) -> bool {
        self.out_tx.capacity() == self.out_tx.max_capacity()
    }
}

async fn read_pump(
    stream: RawStream,
    ctl: CtlId,
    cmd_tx: mpsc::Sender<CtlMsg>,
    line_limit: usize,
    cancel: CancellationToken,
) {
    let mut assembler = LineAssembler::new(line_limit);
    let mut buf = [0u8; 1024];
    let mut out = Vec::new();
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read_some(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        assembler.feed(&buf[..n], &mut out);
        for item in out.drain(..) {
            let msg = match item {
                Assembled::Line(line) => CtlMsg::Line { ctl, line },
                Assembled::Overflow => CtlMsg::LineOverflow { ctl },
            };
            if cmd_tx.send(msg).await.is_err() {
                return;
            }
        }
    }
    let _ = cmd_tx.send(CtlMsg::Closed { ctl }).await;
}

async fn write_pump(
    stream: RawStream,
    ctl: CtlId,
    mut out_rx: mpsc::Receiver<String>,
    cmd_tx: mpsc::Sender<CtlMsg>,
    cancel: CancellationToken,
) {
    loop {
        let mut line = tokio::select! {
            _ = cancel.cancelled() => return,
            next = out_rx.recv() => match next {
                Some(line) => line,
                None => return,
            },
        };
        line.push('\n');
        if stream.write_all(line.as_bytes()).await.is_err() {
            let _ = cmd_tx.send(CtlMsg::Closed { ctl }).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(asm: &mut LineAssembler, bytes: &[u8]) -> Vec<Assembled> {
        let mut out = Vec::new();
        asm.feed(bytes, &mut out);
        out
    }

    #[test]
    fn assembles_lines_across_chunks() {
        let mut asm = LineAssembler::new(64);
        assert!(feed_all(&mut asm, b"state").is_empty());
        let out = feed_all(&mut asm, b"dump\necho\tx\n");
        assert_eq!(
            out,
            vec![
                Assembled::Line("statedump".into()),
                Assembled::Line("echo\tx".into())
            ]
        );
    }

    #[test]
    fn overlong_line_drops_and_resyncs() {
        let mut asm = LineAssembler::new(8);
        let mut out = Vec::new();
        asm.feed(b"aaaaaaaaaaaaaaaa\nnext\n", &mut out);
        assert_eq!(
            out,
            vec![Assembled::Overflow, Assembled::Line("next".into())]
        );
    }

    #[test]
    fn longest_legal_line_is_limit_minus_one() {
        let mut asm = LineAssembler::new(8);
        let out = feed_all(&mut asm, b"1234567\n");
        assert_eq!(out, vec![Assembled::Line("1234567".into())]);
        let out = feed_all(&mut asm, b"12345678\n");
        assert_eq!(out, vec![Assembled::Overflow]);
    }

    #[test]
    fn overflow_reported_once_per_overlong_line() {
        let mut asm = LineAssembler::new(4);
        let out = feed_all(&mut asm, b"aaaaaaaaaa");
        assert_eq!(out, vec![Assembled::Overflow]);
        assert!(feed_all(&mut asm, b"bbbb").is_empty());
        let out = feed_all(&mut asm, b"\nok\n");
        assert_eq!(out, vec![Assembled::Line("ok".into())]);
    }

    #[test]
    fn outbound_overflow_resumes_with_overflow_line() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut ep = Endpoint::new(7, tx, CancellationToken::new(), true, None);
        let now = Ts::from_secs(1);

        ep.send_line("one".into(), now);
        ep.send_line("two".into(), now);
        // Queue full: dropped, endpoint marked unresponsive.
        ep.send_line("three".into(), now);
        assert!(ep.overflow_since().is_some());
        // Still saturated, still dropping.
        ep.send_line("four".into(), now);

        assert_eq!(rx.try_recv().unwrap(), "one");
        assert_eq!(rx.try_recv().unwrap(), "two");

        // Space is back: the next send first announces the gap.
        ep.send_line("five".into(), now);
        assert_eq!(rx.try_recv().unwrap(), "overflow");
        assert_eq!(rx.try_recv().unwrap(), "five");
        assert!(ep.overflow_since().is_none());
    }

    #[test]
    fn closed_queue_marks_endpoint() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut ep = Endpoint::new(1, tx, CancellationToken::new(), true, None);
        ep.send_line("x".into(), Ts::from_secs(1));
        assert!(ep.is_closed());
    }

    #[test]
    fn output_less_endpoint_swallows_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut ep = Endpoint::new(1, tx, CancellationToken::new(), false, None);
        ep.send_line("x".into(), Ts::from_secs(1));
        assert!(rx.try_recv().is_err());
        assert!(!ep.is_closed());
    }
}
