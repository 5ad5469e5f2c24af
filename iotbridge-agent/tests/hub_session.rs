//! Command session wire order against a minimal in-process MQTT endpoint

use iotbridge_agent::config::HubConfig;
use iotbridge_agent::hub::mqtt::{
    reported_topic, DeviceSession, DESIRED_SUBSCRIPTION, METHODS_SUBSCRIPTION, TWIN_RESPONSE_SUBSCRIPTION,
};
use iotbridge_agent::hub::DeviceCredential;
use iotbridge_agent::{CommandHandlers, DeviceState};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

#[derive(Debug, PartialEq)]
enum Packet {
    Subscribe(String),
    Publish(String),
    Other(u8),
}

async fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn decode(header: u8, body: &[u8]) -> Packet {
    let string_at = |offset: usize| {
        let len = u16::from_be_bytes([body[offset], body[offset + 1]]) as usize;
        String::from_utf8_lossy(&body[offset + 2..offset + 2 + len]).into_owned()
    };
    match header >> 4 {
        // packet id, then the first topic filter
        8 => Packet::Subscribe(string_at(2)),
        3 => Packet::Publish(string_at(0)),
        other => Packet::Other(other),
    }
}

/// Accept one client, optionally acknowledge its CONNECT, forward every later packet
async fn hub_endpoint(acknowledge: bool) -> (u16, mpsc::UnboundedReceiver<Packet>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(header >> 4, 1, "first packet must be CONNECT");
        if !acknowledge {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return;
        }
        stream.write_all(&CONNACK).await.unwrap();
        while let Ok((header, body)) = read_packet(&mut stream).await {
            if tx.send(decode(header, &body)).is_err() {
                break;
            }
        }
    });

    (port, rx)
}

fn local_hub(port: u16, connect_timeout_secs: u64) -> (DeviceCredential, HubConfig) {
    let credential = "HostName=127.0.0.1;DeviceId=agent;SharedAccessKey=c2VjcmV0LWtleQ=="
        .parse()
        .unwrap();
    let config = HubConfig {
        port,
        tls: false,
        connect_timeout_secs,
        ..HubConfig::default()
    };
    (credential, config)
}

#[tokio::test]
async fn test_commands_are_subscribed_before_first_report() {
    let (port, mut packets) = hub_endpoint(true).await;
    let (credential, config) = local_hub(port, 5);

    let (session, events) = DeviceSession::connect(&credential, &config).await.unwrap();
    let handlers = Arc::new(CommandHandlers::new(DeviceState::default(), Arc::new(session)));
    events.spawn(handlers.clone());
    handlers.report_initial().await;

    let mut seen = Vec::new();
    while !matches!(seen.last(), Some(Packet::Publish(_))) {
        let packet = timeout(Duration::from_secs(5), packets.recv())
            .await
            .expect("hub endpoint went quiet")
            .expect("hub endpoint closed");
        seen.push(packet);
    }

    assert_eq!(
        seen,
        vec![
            Packet::Subscribe(METHODS_SUBSCRIPTION.to_string()),
            Packet::Subscribe(DESIRED_SUBSCRIPTION.to_string()),
            Packet::Subscribe(TWIN_RESPONSE_SUBSCRIPTION.to_string()),
            Packet::Publish(reported_topic(1)),
        ]
    );
}

#[tokio::test]
async fn test_silent_hub_does_not_block_startup() {
    let (port, _packets) = hub_endpoint(false).await;
    let (credential, config) = local_hub(port, 1);

    let started = std::time::Instant::now();
    let connected = DeviceSession::connect(&credential, &config).await;

    assert!(connected.is_ok());
    assert!(started.elapsed() < Duration::from_secs(5));
}
