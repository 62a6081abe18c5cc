//! Modbus TCP master (FC03 only)

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::frame::{MbapHeader, ReadRequest, MBAP_HEADER_LEN};
use super::RegisterClient;
use crate::error::{AcqSrvError, Result};
use errors::TapgenErrorTrait;

/// Socket timing and retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpClientConfig {
    pub connect_timeout: Duration,
    /// Timeout for each response read
    pub read_timeout: Duration,
    /// Extra attempts after a failed request
    pub retries: u32,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(3000),
            retries: 2,
        }
    }
}

/// One TCP connection to one field device
#[derive(Debug)]
pub struct ModbusTcpClient {
    host: String,
    port: u16,
    config: TcpClientConfig,
    stream: Option<TcpStream>,
    next_transaction_id: u16,
}

impl ModbusTcpClient {
    pub fn new(host: impl Into<String>, port: u16, config: TcpClientConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            stream: None,
            next_transaction_id: 1,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn next_transaction(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    async fn connect(&mut self) -> Result<()> {
        let addr = self.address();
        debug!("TCP connecting: {}", addr);

        match timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                self.stream = Some(stream);
                Ok(())
            },
            Ok(Err(e)) => Err(AcqSrvError::connection(format!(
                "Failed to connect to {addr}: {e}"
            ))),
            Err(_) => Err(AcqSrvError::timeout(format!(
                "Connection to {addr} timed out"
            ))),
        }
    }

    /// One request/response exchange on the current socket
    async fn transact(&mut self, request: ReadRequest) -> Result<Vec<u16>> {
        let adu = request.encode()?;
        let read_timeout = self.config.read_timeout;
        let stream = self.stream.as_mut().ok_or_else(AcqSrvError::not_connected)?;

        timeout(read_timeout, stream.write_all(&adu))
            .await
            .map_err(|_| AcqSrvError::timeout("TCP send timeout"))??;

        let mut header = [0u8; MBAP_HEADER_LEN];
        timeout(read_timeout, stream.read_exact(&mut header))
            .await
            .map_err(|_| AcqSrvError::timeout("TCP header read timeout"))??;
        let header = MbapHeader::parse(&header)?;

        let mut body = vec![0u8; header.length];
        timeout(read_timeout, stream.read_exact(&mut body))
            .await
            .map_err(|_| AcqSrvError::timeout("TCP PDU read timeout"))??;

        request.parse_response(&header, &body)
    }
}

#[async_trait]
impl RegisterClient for ModbusTcpClient {
    async fn init(&mut self) -> Result<()> {
        self.close().await;
        self.connect().await
    }

    fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    async fn read_words(&mut self, unit_id: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        if self.stream.is_none() {
            return Err(AcqSrvError::not_connected());
        }

        let mut last_error = AcqSrvError::not_connected();
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                debug!(
                    "Retry {}/{} for {}",
                    attempt,
                    self.config.retries,
                    self.address()
                );
                self.close().await;
                if let Err(e) = self.connect().await {
                    last_error = e;
                    continue;
                }
            }

            let request = ReadRequest {
                transaction_id: self.next_transaction(),
                unit_id,
                start,
                count,
            };
            match self.transact(request).await {
                Ok(words) => return Ok(words),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("Read {}@{} failed: {}", unit_id, self.address(), e);
                    last_error = e;
                },
            }
        }

        self.stream = None;
        Err(last_error)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown {}: {}", self.address(), e);
            }
        }
    }

    fn endpoint(&self) -> String {
        self.address()
    }
}
