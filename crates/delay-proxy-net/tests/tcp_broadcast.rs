use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use delay_proxy_codec::decode;
use delay_proxy_net::FramedEndpoint;

const NUM_RECEIVERS: usize = 4;

fn spawn_receiver(port: u16) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect failed");
        decode(&mut stream).expect("decode failed")
    })
}

/// A payload popped from the delay queue is sent to every currently
/// connected downstream client, not just one.
#[test]
fn broadcast_frame_reaches_every_connected_client() {
    let port = 28714;
    let mut endpoint = FramedEndpoint::open(port).expect("open failed");

    let receivers: Vec<_> = (0..NUM_RECEIVERS).map(|_| spawn_receiver(port)).collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && endpoint.connection_count() < NUM_RECEIVERS {
        endpoint.accept_and_recv();
    }
    assert_eq!(endpoint.connection_count(), NUM_RECEIVERS);

    endpoint.broadcast_frame(b"delayed payload");

    for (i, handle) in receivers.into_iter().enumerate() {
        let body = handle.join().unwrap_or_else(|_| panic!("receiver {i} panicked"));
        assert_eq!(body, b"delayed payload");
    }
}
