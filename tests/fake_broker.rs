//! Minimal in-process MQTT 3.1.1 broker for transport tests
//!
//! Answers CONNECT, SUBSCRIBE and PINGREQ and counts what it sees. Publishes
//! are accepted and dropped.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tether_agent::ConnectOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const CONNECT: u8 = 0x10;
const SUBSCRIBE: u8 = 0x82;
const PINGREQ: u8 = 0xc0;
const DISCONNECT: u8 = 0xe0;

#[derive(Default)]
struct Counters {
    connections: AtomicUsize,
    subscribe_filters: AtomicUsize,
}

pub struct FakeBroker {
    addr: SocketAddr,
    counters: Arc<Counters>,
    accept_loop: JoinHandle<()>,
}

impl FakeBroker {
    /// Broker that keeps sessions open
    pub async fn start() -> io::Result<Self> {
        Self::spawn(false).await
    }

    /// Broker that drops every session right after accepting it
    pub async fn start_closing_after_connack() -> io::Result<Self> {
        Self::spawn(true).await
    }

    async fn spawn(close_after_connack: bool) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let counters = Arc::new(Counters::default());

        let accept_counters = counters.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_counters.connections.fetch_add(1, Ordering::SeqCst);
                let counters = accept_counters.clone();
                tokio::spawn(async move {
                    let _ = serve(socket, counters, close_after_connack).await;
                });
            }
        });

        Ok(Self {
            addr,
            counters,
            accept_loop,
        })
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Topic filters received in SUBSCRIBE packets so far
    pub fn subscribe_filters(&self) -> usize {
        self.counters.subscribe_filters.load(Ordering::SeqCst)
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(mut socket: TcpStream, counters: Arc<Counters>, close_after_connack: bool) -> io::Result<()> {
    while let Some((header, body)) = read_packet(&mut socket).await? {
        match header {
            CONNECT => {
                socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await?;
                if close_after_connack {
                    return Ok(());
                }
            }
            SUBSCRIBE => {
                let granted = subscribe_qos_levels(&body[2..]);
                counters
                    .subscribe_filters
                    .fetch_add(granted.len(), Ordering::SeqCst);

                let mut suback = vec![0x90];
                encode_length(2 + granted.len(), &mut suback);
                suback.extend_from_slice(&body[..2]);
                suback.extend_from_slice(&granted);
                socket.write_all(&suback).await?;
            }
            PINGREQ => socket.write_all(&[0xd0, 0x00]).await?,
            DISCONNECT => return Ok(()),
            _ => {}
        }
    }
    Ok(())
}

async fn read_packet(socket: &mut TcpStream) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 1];
    if socket.read(&mut header).await? == 0 {
        return Ok(None);
    }

    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = socket.read_u8().await?;
        length |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; length];
    socket.read_exact(&mut body).await?;
    Ok(Some((header[0], body)))
}

/// Requested QoS of every filter in a SUBSCRIBE payload, granted as asked
fn subscribe_qos_levels(mut payload: &[u8]) -> Vec<u8> {
    let mut granted = Vec::new();
    while payload.len() >= 3 {
        let topic_len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
        let Some(&qos) = payload.get(2 + topic_len) else {
            break;
        };
        granted.push(qos & 0x03);
        payload = &payload[3 + topic_len..];
    }
    granted
}

fn encode_length(mut length: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_payload_parsing() {
        // "a/b" qos 1, "c" qos 0
        let payload = [0, 3, b'a', b'/', b'b', 1, 0, 1, b'c', 0];
        assert_eq!(subscribe_qos_levels(&payload), vec![1, 0]);
    }

    #[test]
    fn test_remaining_length_encoding() {
        let mut out = Vec::new();
        encode_length(321, &mut out);
        assert_eq!(out, vec![0xc1, 0x02]);
    }
}
