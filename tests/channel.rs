use pretty_assertions::assert_eq;
use url::Url;
use ws_channel::{
    channel::client::Transport,
    handshake::derive_accept_key,
    protocol::frame::{
        coding::{Control, Data, OpCode},
        Frame, Role,
    },
    socket::{Event, ReadyState},
    stream::BlobRegistry,
    Channel, Message, WebSocket,
};

#[derive(Debug, Default)]
struct RecordingTransport {
    sent: Vec<Vec<u8>>,
    closed: bool,
    disconnected: bool,
}

impl Transport for RecordingTransport {
    fn connect(&mut self, _url: &Url) -> bool {
        true
    }

    fn send(&mut self, data: &[u8]) -> bool {
        self.sent.push(data.to_vec());
        true
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
    }
}

type Socket = WebSocket<Channel<RecordingTransport, BlobRegistry>>;

fn response(request: &[u8], extra: &str) -> Vec<u8> {
    let request = String::from_utf8_lossy(request);
    let key = request.lines().find_map(|l| l.strip_prefix("Sec-WebSocket-Key: ")).unwrap();
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{extra}\r\n",
        derive_accept_key(key.as_bytes())
    )
    .into_bytes()
}

fn connect(protocols: &[&str], extra: &str) -> Socket {
    let mut ws = WebSocket::new(Channel::new(RecordingTransport::default(), BlobRegistry::new()));
    ws.connect("ws://example.com/chat", protocols).unwrap();

    let channel = ws.channel_mut();
    channel.did_open_stream();
    let request = channel.transport_mut().sent.remove(0);
    let request_text = String::from_utf8_lossy(&request).into_owned();
    assert!(request_text.starts_with("GET /chat HTTP/1.1\r\nHost: example.com\r\n"));
    channel.did_consume(request.len());
    channel.did_receive_data(&response(&request, extra));

    assert_eq!(ws.poll(), Some(Event::Open));
    assert_eq!(ws.ready_state(), ReadyState::Open);
    ws
}

fn server(opcode: OpCode, fin: bool, rsv1: bool, payload: &[u8]) -> Vec<u8> {
    let mut frame = match opcode {
        OpCode::Data(data) => Frame::message(payload.to_vec(), data, fin),
        OpCode::Control(control) => Frame::control(payload.to_vec(), control),
    };
    frame.header_mut().rsv1 = rsv1;
    frame.serialize()
}

fn sent_frames(ws: &mut Socket) -> Vec<Frame> {
    std::mem::take(&mut ws.channel_mut().transport_mut().sent)
        .iter()
        .map(|bytes| Frame::parse(bytes, Role::Server).unwrap().unwrap().0)
        .collect()
}

#[test]
fn fragmented_text_message() {
    let mut ws = connect(&[], "");
    let mut data = server(OpCode::Data(Data::Text), false, false, b"Hel");
    data.extend(server(OpCode::Data(Data::Continuation), true, false, b"lo"));
    ws.channel_mut().did_receive_data(&data);

    assert_eq!(ws.poll(), Some(Event::Message(Message::Text("Hello".into()))));
    assert_eq!(ws.poll(), None);
}

#[test]
fn subprotocol_and_compression_end_to_end() {
    let mut ws = connect(
        &["chat", "superchat"],
        "Sec-WebSocket-Protocol: chat\r\nSec-WebSocket-Extensions: permessage-deflate; client_max_window_bits=10\r\n",
    );
    assert_eq!(ws.protocol(), "chat");
    assert_eq!(ws.extensions(), "permessage-deflate; client_max_window_bits=10");

    // "Hello" compressed as in RFC 7692 section 7.2.3.1, split over two frames.
    let mut data = server(OpCode::Data(Data::Text), false, true, &[0xf2, 0x48, 0xcd]);
    data.extend(server(OpCode::Data(Data::Continuation), true, false, &[0xc9, 0xc9, 0x07, 0x00]));
    ws.channel_mut().did_receive_data(&data);
    assert_eq!(ws.poll(), Some(Event::Message(Message::Text("Hello".into()))));

    let payload = "a fairly repetitive message, a fairly repetitive message".repeat(4);
    ws.send_text(&payload).unwrap();
    assert_eq!(ws.buffered_amount(), payload.len() as u64);

    let frames = sent_frames(&mut ws);
    assert_eq!(frames.len(), 1);
    assert!(frames[0].header().rsv1);
    assert!(frames[0].is_masked());
    assert!(frames[0].len() < payload.len());
}

#[test]
fn ping_is_answered_and_close_completes() {
    let mut ws = connect(&[], "");
    ws.channel_mut().did_receive_data(&server(OpCode::Control(Control::Ping), true, false, b"?"));
    assert_eq!(ws.poll(), None);
    let pong = sent_frames(&mut ws);
    assert_eq!(pong[0].header().opcode, OpCode::Control(Control::Pong));
    assert_eq!(pong[0].payload(), b"?");

    ws.close(Some(3005), "bye").unwrap();
    assert_eq!(ws.ready_state(), ReadyState::Closing);
    let close = sent_frames(&mut ws);
    assert_eq!(close[0].payload(), &[0x0b, 0xbd, b'b', b'y', b'e']);

    ws.channel_mut().did_receive_data(&server(OpCode::Control(Control::Close), true, false, &[0x0b, 0xbd]));
    assert_eq!(ws.poll(), None);
    assert!(ws.channel().transport().closed);

    ws.channel_mut().did_close_stream();
    assert_eq!(ws.poll(), Some(Event::Close { was_clean: true, code: 3005, reason: String::new() }));
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn protocol_violation_surfaces_as_error_then_close() {
    let mut ws = connect(&[], "");
    ws.channel_mut().did_receive_data(&server(OpCode::Data(Data::Reserved(3)), true, false, b""));
    assert_eq!(ws.poll(), Some(Event::Error));
    assert!(ws.channel().transport().disconnected);

    ws.channel_mut().did_close_stream();
    assert_eq!(ws.poll(), Some(Event::Close { was_clean: false, code: 1006, reason: String::new() }));
}

#[test]
fn rejected_handshake() {
    let mut ws = WebSocket::new(Channel::new(RecordingTransport::default(), BlobRegistry::new()));
    ws.connect("ws://example.com/", &["chat"]).unwrap();
    ws.channel_mut().did_open_stream();
    let request = ws.channel_mut().transport_mut().sent.remove(0);

    // No subprotocol in the answer although one was requested.
    ws.channel_mut().did_receive_data(&response(&request, ""));
    assert_eq!(ws.poll(), Some(Event::Error));
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn blob_messages_are_sent_in_order() {
    let mut ws = connect(&[], "");
    let blob = ws.channel_mut().blob_reader_mut().register(b"blob".to_vec(), "text/plain");
    ws.send_text("first").unwrap();
    ws.send_blob(blob).unwrap();
    ws.send_text("last").unwrap();
    assert_eq!(ws.buffered_amount(), 13);

    let payloads: Vec<Vec<u8>> = sent_frames(&mut ws).into_iter().map(|f| f.payload().to_vec()).collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"blob".to_vec(), b"last".to_vec()]);
}
