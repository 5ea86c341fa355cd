//! 发送端: 维护一条出站连接, 连接失败时固定间隔重试
//! Sending side: a single outbound connection with fixed-delay reconnects

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::codec::take_json;
use crate::error::ChannelError;

/// 出站连接器
#[derive(Clone, Debug)]
pub struct Connector {
    addr: String,
    retry_delay: Duration,
    ack_timeout: Option<Duration>,
}

impl Connector {
    pub fn new(addr: impl Into<String>, retry_delay: Duration) -> Self {
        Self {
            addr: addr.into(),
            retry_delay,
            ack_timeout: None,
        }
    }

    /// 等待确认的超时 (默认无限等待)
    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// 尝试连接一次
    pub fn try_connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.ack_timeout)?;
        Ok(stream)
    }

    /// 循环重试直到连接成功; 中断时返回 `None`
    pub fn connect(&self, running: &AtomicBool) -> Option<TcpStream> {
        while running.load(Ordering::Relaxed) {
            match self.try_connect() {
                Ok(stream) => {
                    info!("✅ 已连接 {}", self.addr);
                    return Some(stream);
                }
                Err(e) => {
                    debug!("连接 {} 失败: {}, {:?}后重试", self.addr, e, self.retry_delay);
                    thread::sleep(self.retry_delay);
                }
            }
        }
        None
    }
}

/// 阻塞读取一个完整的JSON回复; 多余字节保留在 `buf` 中
pub(crate) fn read_json_reply<T: DeserializeOwned>(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> Result<T, ChannelError> {
    let mut chunk = [0u8; 4096];
    loop {
        if let Some((value, used)) = take_json::<T>(buf)? {
            buf.drain(..used);
            return Ok(value);
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(ChannelError::Disconnected);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// 阻塞读取固定字面量确认
pub(crate) fn read_literal_ack(stream: &mut TcpStream, expected: &[u8]) -> Result<(), ChannelError> {
    let mut got = vec![0u8; expected.len()];
    let mut filled = 0;
    while filled < got.len() {
        let n = stream.read(&mut got[filled..])?;
        if n == 0 {
            return Err(ChannelError::Disconnected);
        }
        filled += n;
        if got[..filled] != expected[..filled] {
            break;
        }
    }
    if got[..filled] != *expected {
        return Err(ChannelError::BadAck(
            String::from_utf8_lossy(&got[..filled]).into_owned(),
        ));
    }
    Ok(())
}
