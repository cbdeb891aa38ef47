//! Per-stream lifecycle, priority, and flow control.
//!
//! A [`Stream`] consumes received frames and application-initiated sends,
//! drives both through the same transition table, and reports everything the
//! connection needs through a [`StreamEvent`] queue: lifecycle changes,
//! decoded payloads, and outbound wire frames.
//!
//! The stream never blocks. A DATA send that exceeds the flow-control window
//! leaves its remainder in the send buffer until the next WINDOW_UPDATE, and
//! deferred work sits in a queue the connection drains with
//! [`Stream::pump_queue`].

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::error::{ErrorCode, H2Error};
use crate::flowcontrol::FlowControl;
use crate::frame::{Frame, HeaderBlock, Priority, DEFAULT_WEIGHT, MAX_PAYLOAD};
use crate::hpack::Header;

/// Lifecycle states. `HalfClosing` and `Closing` are transient: they exist
/// between a frame's transition and its completion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    HalfClosing,
    Closing,
    Closed,
}

/// What the stream is closing toward. While a transition completes this
/// holds the pending half-close target; once fully closed it records which
/// side closed the stream and whether it was a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    HalfClosedLocal,
    HalfClosedRemote,
    LocalClosed,
    RemoteClosed,
    LocalRst,
    RemoteRst,
}

/// Events drained from a stream with [`Stream::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream became active.
    Active,
    /// The stream was reserved by a PUSH_PROMISE.
    Reserved,
    /// One direction finished.
    HalfClose,
    /// The stream closed, with the error code if it closed abnormally.
    Close(Option<ErrorCode>),
    Data {
        payload: Bytes,
        end_stream: bool,
    },
    Headers {
        headers: Vec<Header>,
        end_stream: bool,
    },
    PushPromise {
        promised_stream_id: u32,
        headers: Vec<Header>,
    },
    Priority(Priority),
    WindowUpdate(u32),
    /// A wire frame for the connection to serialize and transmit.
    Frame(Frame),
}

/// Yield of a deferred producer: frames to send now and whether to invoke
/// the producer again later.
pub struct Produced {
    pub frames: Vec<Frame>,
    pub again: bool,
}

/// A deferred frame source living in the send queue.
pub type Producer = Box<dyn FnMut() -> Produced>;

/// One send-queue slot.
pub enum QueueEntry {
    Frame(Frame),
    Deferred(Producer),
}

enum Disposition {
    Proceed,
    Ignore,
}

/// A single HTTP/2 stream.
pub struct Stream {
    id: u32,
    state: StreamState,
    closed: Option<CloseKind>,
    error: Option<ErrorCode>,
    weight: u16,
    dependency: Option<u32>,
    window: FlowControl,
    send_buffer: VecDeque<Frame>,
    queue: VecDeque<QueueEntry>,
    events: VecDeque<StreamEvent>,
    /// Stream carrying a CONNECT request.
    connect: bool,
    /// A 2xx response arrived on a CONNECT stream; only tunnel frames are
    /// legal from here on.
    tunnel: bool,
}

impl Stream {
    pub fn new(id: u32, initial_window: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            closed: None,
            error: None,
            weight: DEFAULT_WEIGHT,
            dependency: None,
            window: FlowControl::new(initial_window),
            send_buffer: VecDeque::new(),
            queue: VecDeque::new(),
            events: VecDeque::new(),
            connect: false,
            tunnel: false,
        }
    }

    /// A stream that will carry a CONNECT request.
    pub fn new_connect(id: u32, initial_window: i64) -> Self {
        let mut stream = Self::new(id, initial_window);
        stream.connect = true;
        stream
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn close_kind(&self) -> Option<CloseKind> {
        self.closed
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn dependency(&self) -> Option<u32> {
        self.dependency
    }

    pub(crate) fn set_dependency(&mut self, dependency: Option<u32>) {
        self.dependency = dependency;
    }

    /// Remaining send window in bytes (may be negative).
    pub fn window(&self) -> i64 {
        self.window.window()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Next pending event, in emission order.
    pub fn poll_event(&mut self) -> Option<StreamEvent> {
        self.events.pop_front()
    }

    fn emit(&mut self, event: StreamEvent) {
        self.events.push_back(event);
    }

    // -- Inbound --

    /// Consume a frame received from the peer.
    ///
    /// HEADERS and PUSH_PROMISE frames must carry a
    /// [`HeaderBlock::Decoded`] payload; running HPACK is the connection's
    /// job.
    pub fn receive(&mut self, frame: Frame) -> Result<(), H2Error> {
        self.check_tunnel(&frame)?;
        if let Disposition::Ignore = self.transition(&frame, false)? {
            return Ok(());
        }
        match &frame {
            Frame::Data {
                payload,
                end_stream,
                ..
            } => {
                self.emit(StreamEvent::Data {
                    payload: payload.clone(),
                    end_stream: *end_stream,
                });
            }
            Frame::Headers {
                block,
                priority,
                end_stream,
                ..
            } => {
                if *priority != Priority::default() {
                    self.apply_priority(priority);
                }
                let headers = decoded_headers(block)?;
                if self.connect && !self.tunnel && is_success_response(&headers) {
                    self.tunnel = true;
                }
                self.emit(StreamEvent::Headers {
                    headers,
                    end_stream: *end_stream,
                });
            }
            Frame::PushPromise {
                promised_stream_id,
                block,
                ..
            } => {
                let headers = decoded_headers(block)?;
                self.emit(StreamEvent::PushPromise {
                    promised_stream_id: *promised_stream_id,
                    headers,
                });
            }
            Frame::Priority { priority, .. } => {
                self.apply_priority(priority);
            }
            Frame::RstStream { error, .. } => {
                self.error = Some(*error);
            }
            Frame::WindowUpdate { increment, .. } => {
                if self.window.increase(*increment).is_err() {
                    return Err(self.stream_error(ErrorCode::FlowControlError));
                }
                self.emit(StreamEvent::WindowUpdate(*increment));
                self.drain_send_buffer();
            }
            _ => {}
        }
        self.complete_transition();
        Ok(())
    }

    // -- Outbound --

    /// Send an application-initiated frame.
    pub fn send(&mut self, frame: Frame) -> Result<(), H2Error> {
        self.check_tunnel(&frame)?;
        if let Disposition::Ignore = self.transition(&frame, true)? {
            return Ok(());
        }
        match frame {
            Frame::Data { .. } => self.flow_send(frame),
            Frame::Priority { priority, .. } => {
                self.weight = priority.weight;
                self.emit(StreamEvent::Frame(frame));
            }
            Frame::RstStream { error, .. } => {
                self.error = Some(error);
                self.emit(StreamEvent::Frame(frame));
            }
            other => self.emit(StreamEvent::Frame(other)),
        }
        self.complete_transition();
        Ok(())
    }

    /// Send a DATA payload, splitting it into frame-sized chunks. The last
    /// chunk carries `end_stream`; chunks the window cannot cover wait in
    /// the send buffer for the next WINDOW_UPDATE.
    pub fn send_data(&mut self, mut payload: Bytes, end_stream: bool) -> Result<(), H2Error> {
        loop {
            let chunk = payload.split_to(payload.len().min(MAX_PAYLOAD));
            let last = payload.is_empty();
            self.send(Frame::Data {
                stream_id: self.id,
                payload: chunk,
                end_stream: end_stream && last,
                end_segment: false,
                padded: false,
            })?;
            if last {
                return Ok(());
            }
        }
    }

    /// Append a frame to the send queue.
    pub fn enqueue_frame(&mut self, frame: Frame) {
        self.queue.push_back(QueueEntry::Frame(frame));
    }

    /// Append a deferred producer to the send queue.
    pub fn enqueue_deferred(&mut self, producer: Producer) {
        self.queue.push_back(QueueEntry::Deferred(producer));
    }

    /// Process up to `n` queue entries. Frames are sent directly; a deferred
    /// producer is invoked, its first frame sent immediately, the rest kept
    /// at the head of the queue (in order, ahead of the producer if it asked
    /// to run again).
    pub fn pump_queue(&mut self, n: usize) -> Result<usize, H2Error> {
        let mut pumped = 0;
        for _ in 0..n {
            match self.queue.pop_front() {
                None => break,
                Some(QueueEntry::Frame(frame)) => {
                    self.send_pumped(frame)?;
                    pumped += 1;
                }
                Some(QueueEntry::Deferred(mut producer)) => {
                    let Produced { mut frames, again } = producer();
                    if again {
                        self.queue.push_front(QueueEntry::Deferred(producer));
                    }
                    if !frames.is_empty() {
                        let first = frames.remove(0);
                        while let Some(frame) = frames.pop() {
                            self.queue.push_front(QueueEntry::Frame(frame));
                        }
                        self.send_pumped(first)?;
                    }
                    pumped += 1;
                }
            }
        }
        Ok(pumped)
    }

    fn send_pumped(&mut self, frame: Frame) -> Result<(), H2Error> {
        let ended = frame.end_stream();
        self.send(frame)?;
        // Nudge the peer once the queue runs dry after END_STREAM so it
        // flushes anything still waiting on flow control.
        if ended && self.queue.is_empty() && self.state != StreamState::Closed {
            self.send(Frame::WindowUpdate {
                stream_id: self.id,
                increment: 1,
            })?;
        }
        Ok(())
    }

    fn flow_send(&mut self, frame: Frame) {
        let Frame::Data {
            stream_id,
            mut payload,
            end_stream,
            end_segment,
            padded,
        } = frame
        else {
            unreachable!("flow_send only handles DATA");
        };
        let available = self.window.available();
        if payload.len() <= available {
            let _ = self.window.consume(payload.len());
            self.emit(StreamEvent::Frame(Frame::Data {
                stream_id,
                payload,
                end_stream,
                end_segment,
                padded,
            }));
            return;
        }
        if available > 0 {
            let head = payload.split_to(available);
            let _ = self.window.consume(available);
            self.emit(StreamEvent::Frame(Frame::Data {
                stream_id,
                payload: head,
                end_stream: false,
                end_segment: false,
                padded,
            }));
        }
        self.send_buffer.push_back(Frame::Data {
            stream_id,
            payload,
            end_stream,
            end_segment,
            padded,
        });
    }

    fn drain_send_buffer(&mut self) {
        while let Some(frame) = self.send_buffer.pop_front() {
            let Frame::Data {
                stream_id,
                mut payload,
                end_stream,
                end_segment,
                padded,
            } = frame
            else {
                self.emit(StreamEvent::Frame(frame));
                continue;
            };
            let available = self.window.available();
            if payload.len() <= available {
                let _ = self.window.consume(payload.len());
                self.emit(StreamEvent::Frame(Frame::Data {
                    stream_id,
                    payload,
                    end_stream,
                    end_segment,
                    padded,
                }));
                continue;
            }
            if available > 0 {
                let head = payload.split_to(available);
                let _ = self.window.consume(available);
                self.emit(StreamEvent::Frame(Frame::Data {
                    stream_id,
                    payload: head,
                    end_stream: false,
                    end_segment: false,
                    padded,
                }));
            }
            self.send_buffer.push_front(Frame::Data {
                stream_id,
                payload,
                end_stream,
                end_segment,
                padded,
            });
            break;
        }
    }

    fn apply_priority(&mut self, priority: &Priority) {
        self.weight = priority.weight;
        self.dependency = (priority.dependency != 0).then_some(priority.dependency);
        self.emit(StreamEvent::Priority(*priority));
    }

    // -- Transitions --

    fn check_tunnel(&mut self, frame: &Frame) -> Result<(), H2Error> {
        if !self.tunnel {
            return Ok(());
        }
        match frame {
            Frame::Data { .. }
            | Frame::RstStream { .. }
            | Frame::WindowUpdate { .. }
            | Frame::Priority { .. } => Ok(()),
            _ => Err(self.stream_error(ErrorCode::ProtocolError)),
        }
    }

    fn transition(&mut self, frame: &Frame, sending: bool) -> Result<Disposition, H2Error> {
        use Disposition::{Ignore, Proceed};
        match self.state {
            StreamState::Idle => {
                if sending {
                    match frame {
                        Frame::Headers { end_stream, .. } => {
                            if *end_stream {
                                self.half_close(CloseKind::HalfClosedLocal);
                            } else {
                                self.open_stream();
                            }
                            Ok(Proceed)
                        }
                        Frame::PushPromise { .. } => {
                            self.reserve(StreamState::ReservedLocal);
                            Ok(Proceed)
                        }
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::LocalRst);
                            Ok(Proceed)
                        }
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                } else {
                    match frame {
                        Frame::Headers { end_stream, .. } => {
                            if *end_stream {
                                self.half_close(CloseKind::HalfClosedRemote);
                            } else {
                                self.open_stream();
                            }
                            Ok(Proceed)
                        }
                        Frame::PushPromise { .. } => {
                            self.reserve(StreamState::ReservedRemote);
                            Ok(Proceed)
                        }
                        _ => Err(H2Error::Protocol(format!(
                            "{} on idle stream {}",
                            frame.kind(),
                            self.id
                        ))),
                    }
                }
            }
            StreamState::ReservedLocal => {
                if sending {
                    match frame {
                        Frame::Headers { .. } => {
                            self.half_close(CloseKind::HalfClosedRemote);
                            Ok(Proceed)
                        }
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::LocalRst);
                            Ok(Proceed)
                        }
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                } else {
                    match frame {
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::RemoteRst);
                            Ok(Proceed)
                        }
                        Frame::Priority { .. } => Ok(Proceed),
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                }
            }
            StreamState::ReservedRemote => {
                if sending {
                    match frame {
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::LocalRst);
                            Ok(Proceed)
                        }
                        Frame::Priority { .. } => Ok(Proceed),
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                } else {
                    match frame {
                        Frame::Headers { .. } => {
                            self.half_close(CloseKind::HalfClosedLocal);
                            Ok(Proceed)
                        }
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::RemoteRst);
                            Ok(Proceed)
                        }
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                }
            }
            StreamState::Open => {
                match frame {
                    Frame::Data { .. } | Frame::Headers { .. } | Frame::Continuation { .. } => {
                        if frame.end_stream() {
                            if sending {
                                self.half_close(CloseKind::HalfClosedLocal);
                            } else {
                                self.half_close(CloseKind::HalfClosedRemote);
                            }
                        }
                        Ok(Proceed)
                    }
                    Frame::RstStream { .. } => {
                        self.begin_close(if sending {
                            CloseKind::LocalRst
                        } else {
                            CloseKind::RemoteRst
                        });
                        Ok(Proceed)
                    }
                    _ => Ok(Proceed),
                }
            }
            StreamState::HalfClosedLocal => {
                if sending {
                    match frame {
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::LocalRst);
                            Ok(Proceed)
                        }
                        Frame::WindowUpdate { .. } => Ok(Proceed),
                        _ => Err(self.stream_error(ErrorCode::ProtocolError)),
                    }
                } else {
                    match frame {
                        Frame::Data { .. }
                        | Frame::Headers { .. }
                        | Frame::Continuation { .. } => {
                            if frame.end_stream() {
                                self.begin_close(CloseKind::RemoteClosed);
                            }
                            Ok(Proceed)
                        }
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::RemoteRst);
                            Ok(Proceed)
                        }
                        // WINDOW_UPDATE and PRIORITY cause no transition
                        // here, but their bookkeeping still runs: a DATA
                        // tail may be waiting on the window.
                        Frame::WindowUpdate { .. } | Frame::Priority { .. } => Ok(Proceed),
                        _ => Ok(Proceed),
                    }
                }
            }
            StreamState::HalfClosedRemote => {
                if sending {
                    match frame {
                        Frame::Data { .. }
                        | Frame::Headers { .. }
                        | Frame::Continuation { .. } => {
                            if frame.end_stream() {
                                self.begin_close(CloseKind::LocalClosed);
                            }
                            Ok(Proceed)
                        }
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::LocalRst);
                            Ok(Proceed)
                        }
                        _ => Ok(Proceed),
                    }
                } else {
                    match frame {
                        Frame::RstStream { .. } => {
                            self.begin_close(CloseKind::RemoteRst);
                            Ok(Proceed)
                        }
                        Frame::WindowUpdate { .. } | Frame::Priority { .. } => Ok(Proceed),
                        _ => Err(self.stream_error(ErrorCode::StreamClosed)),
                    }
                }
            }
            StreamState::Closed => {
                if sending {
                    match frame {
                        Frame::RstStream { .. } | Frame::Priority { .. } => Ok(Proceed),
                        _ => Err(self.stream_error(ErrorCode::StreamClosed)),
                    }
                } else {
                    match self.closed {
                        Some(CloseKind::RemoteRst) | Some(CloseKind::RemoteClosed) => {
                            match frame {
                                Frame::RstStream { .. } | Frame::Priority { .. } => Ok(Proceed),
                                _ => Err(self.stream_error(ErrorCode::StreamClosed)),
                            }
                        }
                        Some(CloseKind::LocalRst) | Some(CloseKind::LocalClosed) => {
                            // Frames already in flight when we closed.
                            Ok(Ignore)
                        }
                        _ => Err(self.stream_error(ErrorCode::StreamClosed)),
                    }
                }
            }
            StreamState::HalfClosing | StreamState::Closing => Err(H2Error::Internal(
                "frame delivered during a transition".into(),
            )),
        }
    }

    fn open_stream(&mut self) {
        self.state = StreamState::Open;
        self.emit(StreamEvent::Active);
    }

    fn reserve(&mut self, state: StreamState) {
        self.state = state;
        self.emit(StreamEvent::Reserved);
    }

    fn half_close(&mut self, kind: CloseKind) {
        if self.state != StreamState::Open {
            self.emit(StreamEvent::Active);
        }
        self.closed = Some(kind);
        self.state = StreamState::HalfClosing;
    }

    fn begin_close(&mut self, kind: CloseKind) {
        self.closed = Some(kind);
        self.state = StreamState::Closing;
    }

    fn complete_transition(&mut self) {
        match self.state {
            StreamState::Closing => {
                self.state = StreamState::Closed;
                self.emit(StreamEvent::Close(self.error));
            }
            StreamState::HalfClosing => {
                self.state = match self.closed {
                    Some(CloseKind::HalfClosedLocal) => StreamState::HalfClosedLocal,
                    Some(CloseKind::HalfClosedRemote) => StreamState::HalfClosedRemote,
                    _ => StreamState::Closed,
                };
                self.emit(StreamEvent::HalfClose);
            }
            _ => {}
        }
    }

    /// Record a stream error, emit RST_STREAM unless the stream is already
    /// closed, and hand back the error to surface.
    fn stream_error(&mut self, code: ErrorCode) -> H2Error {
        self.error = Some(code);
        if self.state != StreamState::Closed && self.state != StreamState::Closing {
            self.emit(StreamEvent::Frame(Frame::RstStream {
                stream_id: self.id,
                error: code,
            }));
            self.begin_close(CloseKind::LocalRst);
            self.complete_transition();
        }
        if code == ErrorCode::StreamClosed {
            H2Error::StreamClosed
        } else {
            H2Error::Stream(code)
        }
    }
}

fn decoded_headers(block: &HeaderBlock) -> Result<Vec<Header>, H2Error> {
    match block {
        HeaderBlock::Decoded(headers) => Ok(headers.clone()),
        HeaderBlock::Fragment(_) => Err(H2Error::Internal(
            "header block handed to a stream before HPACK decoding".into(),
        )),
    }
}

fn is_success_response(headers: &[Header]) -> bool {
    headers
        .iter()
        .find(|h| h.name == b":status")
        .is_some_and(|h| h.value.first() == Some(&b'2'))
}

/// The stream table a connection keeps: id-to-stream mapping plus the
/// dependency bookkeeping that needs to see every stream at once.
pub struct Streams {
    streams: HashMap<u32, Stream>,
    initial_window: i64,
}

impl Streams {
    pub fn new(initial_window: i64) -> Self {
        Self {
            streams: HashMap::new(),
            initial_window,
        }
    }

    /// Get or create the stream with this id.
    pub fn open(&mut self, id: u32) -> &mut Stream {
        self.streams
            .entry(id)
            .or_insert_with(|| Stream::new(id, self.initial_window))
    }

    /// Get or create a CONNECT stream with this id.
    pub fn open_connect(&mut self, id: u32) -> &mut Stream {
        self.streams
            .entry(id)
            .or_insert_with(|| Stream::new_connect(id, self.initial_window))
    }

    pub fn get(&self, id: u32) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Route a received frame to its stream and apply dependency
    /// re-parenting when it carried an exclusive priority.
    pub fn receive(&mut self, frame: Frame) -> Result<(), H2Error> {
        let id = frame.stream_id();
        let priority = match &frame {
            Frame::Priority { priority, .. } => Some(*priority),
            Frame::Headers { priority, .. } if *priority != Priority::default() => {
                Some(*priority)
            }
            _ => None,
        };
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or_else(|| H2Error::Protocol(format!("frame for unknown stream {id}")))?;
        stream.receive(frame)?;
        if let Some(priority) = priority {
            self.reparent_exclusive(id, priority);
        }
        Ok(())
    }

    /// Exclusive insertion: every other child of the dependency target is
    /// re-pointed at `id`.
    fn reparent_exclusive(&mut self, id: u32, priority: Priority) {
        if !priority.exclusive
            || priority.dependency == 0
            || !self.streams.contains_key(&priority.dependency)
        {
            return;
        }
        for (&sid, stream) in self.streams.iter_mut() {
            if sid != id && stream.dependency() == Some(priority.dependency) {
                stream.set_dependency(Some(id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowcontrol::DEFAULT_WINDOW_SIZE;

    fn headers_frame(stream_id: u32, end_stream: bool) -> Frame {
        Frame::Headers {
            stream_id,
            block: HeaderBlock::Decoded(vec![Header::new(
                b":method".as_slice(),
                b"GET".as_slice(),
            )]),
            priority: Priority::default(),
            end_stream,
            end_segment: false,
            end_headers: true,
            padded: false,
        }
    }

    fn data_frame(stream_id: u32, payload: &'static [u8], end_stream: bool) -> Frame {
        Frame::Data {
            stream_id,
            payload: Bytes::from_static(payload),
            end_stream,
            end_segment: false,
            padded: false,
        }
    }

    fn drain(stream: &mut Stream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(e) = stream.poll_event() {
            events.push(e);
        }
        events
    }

    #[test]
    fn open_with_end_stream_half_closes() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, true)).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);

        let events = drain(&mut stream);
        let actives = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Active))
            .count();
        assert_eq!(actives, 1);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::HalfClose)));

        // The response with END_STREAM fully closes the stream.
        stream.receive(data_frame(1, b"done", true)).unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        let events = drain(&mut stream);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Close(None))));
    }

    #[test]
    fn open_emits_active_once() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        assert_eq!(stream.state(), StreamState::Open);
        let events = drain(&mut stream);
        let actives = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Active))
            .count();
        assert_eq!(actives, 1);
    }

    #[test]
    fn idle_recv_data_is_protocol_error() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        let err = stream.receive(data_frame(1, b"x", false)).unwrap_err();
        assert!(matches!(err, H2Error::Protocol(_)));
    }

    #[test]
    fn disallowed_send_raises_and_resets() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, true)).unwrap();
        drain(&mut stream);

        // Sending DATA in half-closed-local is a stream error.
        let err = stream.send(data_frame(1, b"late", false)).unwrap_err();
        assert!(matches!(err, H2Error::Stream(ErrorCode::ProtocolError)));
        assert_eq!(stream.state(), StreamState::Closed);
        let events = drain(&mut stream);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Frame(Frame::RstStream {
                error: ErrorCode::ProtocolError,
                ..
            })
        )));
    }

    #[test]
    fn remote_reset_then_data_is_stream_closed() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        stream
            .receive(Frame::RstStream {
                stream_id: 1,
                error: ErrorCode::Cancel,
            })
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(stream.close_kind(), Some(CloseKind::RemoteRst));
        let events = drain(&mut stream);
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Close(Some(ErrorCode::Cancel)))));

        // A late DATA frame from the peer after its own reset.
        let err = stream.receive(data_frame(1, b"late", false)).unwrap_err();
        assert!(matches!(err, H2Error::StreamClosed));
        // Already closed: no RST_STREAM goes out.
        assert!(drain(&mut stream).is_empty());
    }

    #[test]
    fn local_reset_ignores_in_flight_frames() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        stream
            .send(Frame::RstStream {
                stream_id: 1,
                error: ErrorCode::Cancel,
            })
            .unwrap();
        assert_eq!(stream.state(), StreamState::Closed);
        drain(&mut stream);

        // Peer frames racing our reset are dropped silently.
        stream.receive(data_frame(1, b"racing", true)).unwrap();
        assert!(drain(&mut stream).is_empty());
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn reserved_local_flow() {
        let mut stream = Stream::new(2, DEFAULT_WINDOW_SIZE);
        stream
            .send(Frame::PushPromise {
                stream_id: 2,
                promised_stream_id: 2,
                block: HeaderBlock::Decoded(vec![]),
                end_headers: true,
            })
            .unwrap();
        assert_eq!(stream.state(), StreamState::ReservedLocal);
        let events = drain(&mut stream);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Reserved)));

        stream.send(headers_frame(2, false)).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        let events = drain(&mut stream);
        // Entering half-closed from a reserved state still announces the
        // stream as active.
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Active)));
        assert!(events.iter().any(|e| matches!(e, StreamEvent::HalfClose)));
    }

    #[test]
    fn half_closed_remote_recv_data_resets() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        stream.receive(data_frame(1, b"done", true)).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedRemote);
        drain(&mut stream);

        let err = stream.receive(data_frame(1, b"more", false)).unwrap_err();
        assert!(matches!(err, H2Error::StreamClosed));
        let events = drain(&mut stream);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::Frame(Frame::RstStream {
                error: ErrorCode::StreamClosed,
                ..
            })
        )));
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn window_limits_data_and_update_drains() {
        let mut stream = Stream::new(1, 10);
        stream.send(headers_frame(1, false)).unwrap();
        drain(&mut stream);

        stream
            .send_data(Bytes::from_static(b"0123456789abcdef"), false)
            .unwrap();
        let events = drain(&mut stream);
        // Only the first 10 bytes fit the window.
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Frame(Frame::Data {
                payload,
                end_stream,
                ..
            }) => {
                assert_eq!(payload.as_ref(), b"0123456789");
                assert!(!end_stream);
            }
            other => panic!("expected a DATA frame event, got {other:?}"),
        }
        assert_eq!(stream.window(), 0);

        stream
            .receive(Frame::WindowUpdate {
                stream_id: 1,
                increment: 100,
            })
            .unwrap();
        let events = drain(&mut stream);
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::WindowUpdate(100))));
        let sent: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(Frame::Data { payload, .. }) => Some(payload.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![Bytes::from_static(b"abcdef")]);
        assert_eq!(stream.window(), 94);
    }

    #[test]
    fn send_data_splits_large_payloads() {
        let mut stream = Stream::new(1, 1 << 30);
        stream.send(headers_frame(1, false)).unwrap();
        drain(&mut stream);

        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD + 100]);
        stream.send_data(payload, true).unwrap();
        let frames: Vec<_> = drain(&mut stream)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(Frame::Data {
                    payload,
                    end_stream,
                    ..
                }) => Some((payload.len(), end_stream)),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![(MAX_PAYLOAD, false), (100, true)]);
    }

    #[test]
    fn pump_queue_sends_frames_and_nudges() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.enqueue_frame(headers_frame(1, false));
        stream.enqueue_frame(data_frame(1, b"body", true));
        stream.pump_queue(8).unwrap();

        let events = drain(&mut stream);
        let frames: Vec<&Frame> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], Frame::Headers { .. }));
        assert!(matches!(frames[1], Frame::Data { .. }));
        // END_STREAM with an empty queue triggers the one-byte nudge.
        assert!(matches!(
            frames[2],
            Frame::WindowUpdate { increment: 1, .. }
        ));
    }

    #[test]
    fn pump_queue_drives_deferred_producers() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        drain(&mut stream);

        let mut rounds = 0;
        stream.enqueue_deferred(Box::new(move || {
            rounds += 1;
            Produced {
                frames: vec![Frame::Data {
                    stream_id: 1,
                    payload: Bytes::from(format!("chunk{rounds}")),
                    end_stream: false,
                    end_segment: false,
                    padded: false,
                }],
                again: rounds < 3,
            }
        }));

        stream.pump_queue(1).unwrap();
        assert_eq!(stream.queue_len(), 1);
        stream.pump_queue(8).unwrap();
        assert_eq!(stream.queue_len(), 0);

        let chunks: Vec<_> = drain(&mut stream)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(Frame::Data { payload, .. }) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"chunk1"),
                Bytes::from_static(b"chunk2"),
                Bytes::from_static(b"chunk3"),
            ]
        );
    }

    #[test]
    fn producer_frame_list_keeps_order() {
        let mut stream = Stream::new(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        drain(&mut stream);

        stream.enqueue_deferred(Box::new(|| Produced {
            frames: vec![
                data_frame(1, b"one", false),
                data_frame(1, b"two", false),
                data_frame(1, b"three", false),
            ],
            again: false,
        }));
        stream.pump_queue(8).unwrap();

        let chunks: Vec<_> = drain(&mut stream)
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Frame(Frame::Data { payload, .. }) => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(
            chunks,
            vec![
                Bytes::from_static(b"one"),
                Bytes::from_static(b"two"),
                Bytes::from_static(b"three"),
            ]
        );
    }

    #[test]
    fn received_priority_updates_weight_and_dependency() {
        let mut stream = Stream::new(3, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(3, false)).unwrap();
        drain(&mut stream);

        stream
            .receive(Frame::Priority {
                stream_id: 3,
                priority: Priority {
                    exclusive: false,
                    dependency: 1,
                    weight: 100,
                },
            })
            .unwrap();
        assert_eq!(stream.weight(), 100);
        assert_eq!(stream.dependency(), Some(1));
        let events = drain(&mut stream);
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Priority(p) if p.weight == 100)));
    }

    #[test]
    fn sending_priority_updates_local_weight() {
        let mut stream = Stream::new(3, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(3, false)).unwrap();
        stream
            .send(Frame::Priority {
                stream_id: 3,
                priority: Priority {
                    exclusive: false,
                    dependency: 0,
                    weight: 42,
                },
            })
            .unwrap();
        assert_eq!(stream.weight(), 42);
    }

    #[test]
    fn exclusive_insertion_reparents_siblings() {
        let mut streams = Streams::new(DEFAULT_WINDOW_SIZE);
        for id in [1u32, 3, 5, 7] {
            let stream = streams.open(id);
            stream.send(headers_frame(id, false)).unwrap();
        }
        // 3 and 5 depend on 1.
        for id in [3u32, 5] {
            streams
                .receive(Frame::Priority {
                    stream_id: id,
                    priority: Priority {
                        exclusive: false,
                        dependency: 1,
                        weight: 16,
                    },
                })
                .unwrap();
        }
        // 7 takes an exclusive dependency on 1: 3 and 5 move under 7.
        streams
            .receive(Frame::Priority {
                stream_id: 7,
                priority: Priority {
                    exclusive: true,
                    dependency: 1,
                    weight: 16,
                },
            })
            .unwrap();
        assert_eq!(streams.get(7).unwrap().dependency(), Some(1));
        assert_eq!(streams.get(3).unwrap().dependency(), Some(7));
        assert_eq!(streams.get(5).unwrap().dependency(), Some(7));
    }

    #[test]
    fn connect_stream_locks_down_after_2xx() {
        let mut stream = Stream::new_connect(1, DEFAULT_WINDOW_SIZE);
        stream.send(headers_frame(1, false)).unwrap();
        stream
            .receive(Frame::Headers {
                stream_id: 1,
                block: HeaderBlock::Decoded(vec![Header::new(
                    b":status".as_slice(),
                    b"200".as_slice(),
                )]),
                priority: Priority::default(),
                end_stream: false,
                end_segment: false,
                end_headers: true,
                padded: false,
            })
            .unwrap();
        drain(&mut stream);

        // Tunnel established: DATA flows both ways.
        stream.receive(data_frame(1, b"tunnel", false)).unwrap();
        stream.send(data_frame(1, b"bytes", false)).unwrap();
        drain(&mut stream);

        // Any other frame type is now a stream error.
        let err = stream
            .receive(Frame::PushPromise {
                stream_id: 1,
                promised_stream_id: 2,
                block: HeaderBlock::Decoded(vec![]),
                end_headers: true,
            })
            .unwrap_err();
        assert!(matches!(err, H2Error::Stream(ErrorCode::ProtocolError)));
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn window_update_overflow_is_flow_control_error() {
        let mut stream = Stream::new(1, 0x7fff_fff0);
        stream.send(headers_frame(1, false)).unwrap();
        drain(&mut stream);
        let err = stream
            .receive(Frame::WindowUpdate {
                stream_id: 1,
                increment: 0x1000,
            })
            .unwrap_err();
        assert!(matches!(err, H2Error::Stream(ErrorCode::FlowControlError)));
    }

    #[test]
    fn unknown_stream_frame_rejected_by_registry() {
        let mut streams = Streams::new(DEFAULT_WINDOW_SIZE);
        let err = streams.receive(data_frame(9, b"x", false)).unwrap_err();
        assert!(matches!(err, H2Error::Protocol(_)));
    }
}
