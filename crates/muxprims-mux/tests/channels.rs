#![cfg(unix)]

mod common;

use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use muxprims_mux::{ChannelState, MuxError, MAX_CHANNELS};
use rand::Rng;

use common::{pattern, started_pair, wait_until};

#[test]
fn echo_of_counter_with_random_delays() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let remote = pair.accept();

    let echo = thread::spawn(move || {
        let mut buf = [0u8; 512];
        loop {
            let n = (&remote).read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            (&remote).write_all(&buf[..n]).unwrap();
            (&remote).flush().unwrap();
        }
        remote.shutdown_write().unwrap();
    });

    let reader = {
        let channel = channel.clone();
        thread::spawn(move || {
            let mut word = [0u8; 4];
            for expected in 0..100i32 {
                (&channel).read_exact(&mut word).unwrap();
                assert_eq!(i32::from_be_bytes(word), expected);
            }
            let mut rest = Vec::new();
            (&channel).read_to_end(&mut rest).unwrap();
            assert!(rest.is_empty());
        })
    };

    let mut rng = rand::rng();
    for i in 0..100i32 {
        (&channel).write_all(&i.to_be_bytes()).unwrap();
        (&channel).flush().unwrap();
        thread::sleep(Duration::from_millis(rng.random_range(0..5)));
    }
    channel.shutdown_write().unwrap();

    reader.join().unwrap();
    echo.join().unwrap();
    channel.close();
    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn data_survives_arbitrary_chunking() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let remote = pair.accept();
    let data = pattern(200_000);

    let sink = thread::spawn(move || {
        let mut rng = rand::rng();
        let mut received = Vec::new();
        loop {
            let mut buf = vec![0u8; rng.random_range(1..4096)];
            let n = (&remote).read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let mut rng = rand::rng();
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + rng.random_range(1..20_000)).min(data.len());
        (&channel).write_all(&data[offset..end]).unwrap();
        if rng.random_bool(0.3) {
            (&channel).flush().unwrap();
        }
        offset = end;
    }
    channel.shutdown_write().unwrap();

    assert_eq!(sink.join().unwrap(), data);
    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn half_close_keeps_other_direction_open() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let remote = pair.accept();

    (&channel).write_all(b"request").unwrap();
    channel.shutdown_write().unwrap();
    assert!(matches!(
        (&channel).write(b"more"),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe
    ));

    let mut got = String::new();
    (&remote).read_to_string(&mut got).unwrap();
    assert_eq!(got, "request");

    (&remote).write_all(b"response").unwrap();
    remote.shutdown_write().unwrap();

    let mut back = String::new();
    (&channel).read_to_string(&mut back).unwrap();
    assert_eq!(back, "response");
    assert!(channel.is_open());

    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn capacity_boundary_and_id_reuse() {
    let pair = started_pair();
    let mut channels = Vec::new();
    for expected in 0..MAX_CHANNELS {
        let channel = pair.client.open_channel().unwrap();
        assert_eq!(channel.id() as usize, expected);
        channels.push(channel);
    }
    assert!(matches!(
        pair.client.open_channel(),
        Err(MuxError::TooManyChannels { max: 256 })
    ));

    let victim = &channels[17];
    victim.close();
    assert_eq!(victim.state(), ChannelState::Closing);
    assert!(
        wait_until(Duration::from_secs(5), || pair.client.channel_count() == 255),
        "CLOSEACK should release the id"
    );
    assert_eq!(victim.state(), ChannelState::Closed);

    let reused = pair.client.open_channel().unwrap();
    assert_eq!(reused.id(), 17);

    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn close_unblocks_a_pending_reader() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let _remote = pair.accept();

    let (done_tx, done_rx) = mpsc::channel();
    let blocked = channel.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 16];
        let result = (&blocked).read(&mut buf).map_err(|err| err.kind());
        done_tx.send(result).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    channel.close();
    let result = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reader should be released by close");
    assert_eq!(result, Ok(0));

    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn peer_close_unblocks_reader_and_notifies_listener() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let remote = pair.accept();

    let (done_tx, done_rx) = mpsc::channel();
    let blocked = remote.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 16];
        done_tx.send((&blocked).read(&mut buf).ok()).unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    channel.close();
    assert_eq!(
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Some(0)
    );
    assert!(wait_until(Duration::from_secs(5), || {
        pair.server_events.closed() == vec![channel.id()]
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        pair.client.channel_count() == 0 && pair.server.channel_count() == 0
    }));

    pair.client.shutdown();
    pair.server.shutdown();
}

#[test]
fn shutdown_unblocks_writer_without_credit() {
    let pair = started_pair();
    let channel = pair.client.open_channel().unwrap();
    let _remote = pair.accept();

    let (done_tx, done_rx) = mpsc::channel();
    let blocked = channel.clone();
    thread::spawn(move || {
        let data = vec![0u8; 3 * blocked.capacity()];
        let result = (&blocked).write_all(&data).map_err(|err| err.kind());
        done_tx.send(result).unwrap();
    });

    // Nobody reads the remote side, so no credit is ever granted.
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    pair.client.shutdown();
    let result = done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("writer should be released by shutdown");
    assert_eq!(result, Err(std::io::ErrorKind::BrokenPipe));
    assert_eq!(channel.state(), ChannelState::Closed);

    pair.server.wait();
    assert!(!pair.server.is_running(), "peer EOF should stop the server");
}

#[test]
fn shutdown_releases_blocked_reader_and_writer_together() {
    let pair = started_pair();
    let reading = pair.client.open_channel().unwrap();
    let _remote_reading = pair.accept();
    let writing = pair.client.open_channel().unwrap();
    let _remote_writing = pair.accept();

    let (read_tx, read_rx) = mpsc::channel();
    let reader = reading.clone();
    thread::spawn(move || {
        let mut buf = [0u8; 16];
        read_tx.send((&reader).read(&mut buf).ok()).unwrap();
    });

    let (write_tx, write_rx) = mpsc::channel();
    let writer = writing.clone();
    thread::spawn(move || {
        let data = vec![0u8; 3 * writer.capacity()];
        let result = (&writer).write_all(&data).map_err(|err| err.kind());
        write_tx.send(result).unwrap();
    });

    assert!(read_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(write_rx.recv_timeout(Duration::from_millis(10)).is_err());

    pair.client.shutdown();
    let read = read_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("reader should be released by shutdown");
    let write = write_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("writer should be released by shutdown");
    assert_eq!(read, Some(0));
    assert_eq!(write, Err(std::io::ErrorKind::BrokenPipe));
    assert_eq!(reading.state(), ChannelState::Closed);
    assert_eq!(writing.state(), ChannelState::Closed);

    pair.server.wait();
}

#[test]
fn command_channel_is_first_registered() {
    let pair = started_pair();
    let first = pair.client.open_channel().unwrap();
    let second = pair.client.open_channel().unwrap();
    assert!(first.is_command());
    assert!(!second.is_command());

    let remote_first = pair.accept();
    let remote_second = pair.accept();
    assert!(remote_first.is_command());
    assert!(!remote_second.is_command());

    let command = pair.server.command_channel().unwrap();
    assert!(command.same_channel(&remote_first));
    assert_eq!(pair.client.command_channel().unwrap().id(), first.id());
    assert_eq!(pair.server.channel(second.id()).unwrap().id(), second.id());

    pair.client.shutdown();
    pair.server.shutdown();
}
