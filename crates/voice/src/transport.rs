//! Datagramm-Transport fuer den Media-Pfad
//!
//! Der Koordinator kennt nur `send(bytes)` und einen Strom eingehender
//! Datagramme. Verlust und Umordnung sind erlaubt; es gibt keine
//! Wiederholung.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

/// Maximale Datagrammgroesse (Header 16 + Extension + Nonce 8 + Nutzdaten + Tag)
pub const MAX_DATAGRAMM: usize = 1500;

/// Unzuverlaessiger Datagramm-Transport
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    async fn send(&self, datagramm: &[u8]) -> io::Result<()>;

    /// Naechstes eingehendes Datagramm
    async fn recv(&self) -> io::Result<Vec<u8>>;

    /// Media-Endpunkt aus Ready setzen
    async fn media_endpoint(&self, _ip: &str, _port: u16) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// UDP-Transport; wird nach Ready mit dem Media-Endpunkt verbunden
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bindet den lokalen Socket (Port 0 = OS waehlt)
    pub async fn binden(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "UDP-Media-Socket gebunden");
        Ok(Self { socket })
    }

    pub fn lokale_adresse(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, datagramm: &[u8]) -> io::Result<()> {
        let gesendet = self.socket.send(datagramm).await?;
        tracing::trace!(bytes = gesendet, "UDP-Paket gesendet");
        Ok(())
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAMM];
        let len = self.socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }

    async fn media_endpoint(&self, ip: &str, port: u16) -> io::Result<()> {
        self.socket.connect((ip, port)).await?;
        tracing::info!(ip, port, "UDP-Media-Endpunkt verbunden");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

/// Speicher-Transport fuer Tests: zwei verbundene Enden
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl LoopbackTransport {
    /// Erstellt zwei Enden; was das eine sendet, empfaengt das andere
    pub fn paar() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl DatagramTransport for LoopbackTransport {
    async fn send(&self, datagramm: &[u8]) -> io::Result<()> {
        self.tx
            .send(datagramm.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Gegenstelle geschlossen"))
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Gegenstelle geschlossen"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn loopback_ist_bidirektional() {
        let (a, b) = LoopbackTransport::paar();
        a.send(&[1, 2, 3]).await.unwrap();
        b.send(&[4]).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(a.recv().await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn loopback_meldet_geschlossene_gegenstelle() {
        let (a, b) = LoopbackTransport::paar();
        drop(b);
        assert!(a.send(&[1]).await.is_err());
        assert_eq!(
            a.recv().await.unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn udp_round_trip() {
        let client = UdpTransport::binden(localhost(0)).await.unwrap();
        let server = UdpSocket::bind(localhost(0)).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        client
            .media_endpoint("127.0.0.1", server_addr.port())
            .await
            .unwrap();
        client.send(&[0x01, 0xAB]).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, absender) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[0x01, 0xAB]);
        assert_eq!(absender, client.lokale_adresse().unwrap());

        server.send_to(&[0xC0, b'{'], absender).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), vec![0xC0, b'{']);
    }
}
