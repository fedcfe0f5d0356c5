use std::{
    env,
    io,
    net::TcpStream,
    thread,
    time::{Duration, Instant},
};

use ws_channel::{
    channel::client::{ChannelEvent, WebSocketChannel},
    stream::{BlobRegistry, StreamTransport},
    Channel, WebSocketConfig,
};

fn main() -> io::Result<()> {
    let target = env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:8080/".to_owned());
    let message = env::args().nth(2).unwrap_or_else(|| "Hello!".to_owned());

    let url = url::Url::parse(&target).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port_or_known_default().unwrap_or(80);

    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;

    let mut channel = Channel::with_config(StreamTransport::new(stream), BlobRegistry::new(), WebSocketConfig::default());
    if !channel.connect(&url, "") {
        return Err(io::Error::new(io::ErrorKind::Other, "Could not start the opening handshake"));
    }
    println!("Connecting to {url}");

    loop {
        let alive = channel.pump_io();

        while let Some(event) = channel.poll_event() {
            match event {
                ChannelEvent::Connected { protocol, extensions } => {
                    println!("Connected (protocol: {protocol:?}, extensions: {extensions:?})");
                    channel.send_text(&message);
                },
                ChannelEvent::Text(text) => {
                    println!("Received: {text}");
                    channel.close(Some(1000), "done");
                },
                ChannelEvent::Binary(data) => {
                    println!("Received {} bytes", data.len());
                    channel.close(Some(1000), "done");
                },
                ChannelEvent::MessageError => eprintln!("Connection error"),
                ChannelEvent::ConsumedBufferedAmount(n) => println!("Sent {n} bytes"),
                ChannelEvent::StartedClosingHandshake => println!("Closing"),
                ChannelEvent::Closed { status, code, reason } => {
                    println!("Closed ({status:?}): {code} {reason:?}");
                    return Ok(());
                },
            }
        }

        channel.handle_timeout(Instant::now());
        if !alive {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(5));
    }
}
