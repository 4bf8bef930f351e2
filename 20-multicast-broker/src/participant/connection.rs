use std::{net::IpAddr, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{net::TcpStream, time::timeout};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
    frame::{framed, read_frame, write_frame},
    protocol::{Reply, Request},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues commands to the coordinator, one short-lived connection per
/// request.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ConnectionManager {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn open(&self) -> Result<CoordinatorSession> {
        let stream = timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| anyhow!("connecting to {}:{} timed out", self.host, self.port))?
            .with_context(|| format!("failed to connect to {}:{}", self.host, self.port))?;
        let local_ip = stream.local_addr()?.ip();

        Ok(CoordinatorSession {
            frames: framed(stream),
            local_ip,
            timeout: self.timeout,
        })
    }

    /// Opens a connection, sends `request` and waits for the reply.
    pub async fn request(&self, request: &Request) -> Result<Reply> {
        self.open().await?.exchange(request).await
    }
}

pub struct CoordinatorSession {
    frames: Framed<TcpStream, LengthDelimitedCodec>,
    local_ip: IpAddr,
    timeout: Duration,
}

impl CoordinatorSession {
    /// Address of this host as seen on the route to the coordinator; it is
    /// what gets advertised as the callback host.
    pub fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    pub async fn exchange(mut self, request: &Request) -> Result<Reply> {
        write_frame(&mut self.frames, &request.to_string())
            .await
            .context("failed to send request")?;
        let reply = timeout(self.timeout, read_frame(&mut self.frames))
            .await
            .map_err(|_| anyhow!("command timed out"))?
            .context("failed to read reply")?
            .context("coordinator closed the connection without replying")?;
        Ok(Reply::parse(&reply))
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn exchange_sends_one_frame_and_parses_the_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = framed(stream);
            let request = read_frame(&mut frames).await.unwrap().unwrap();
            write_frame(&mut frames, "Participant deregistered").await.unwrap();
            request
        });

        let manager = ConnectionManager::new("127.0.0.1", port);
        let reply = manager.request(&Request::Deregister { id: 4 }).await.unwrap();

        assert_eq!(reply, Reply::Deregistered);
        assert_eq!(server.await.unwrap(), "deregister#4");
    }

    #[tokio::test]
    async fn silent_coordinator_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let manager =
            ConnectionManager::new("127.0.0.1", port).with_timeout(Duration::from_millis(100));
        let err = manager
            .request(&Request::Disconnect { id: 1 })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[tokio::test]
    async fn local_ip_matches_the_route_used() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = ConnectionManager::new("127.0.0.1", port).open().await.unwrap();

        assert!(session.local_ip().is_loopback());
    }
}
