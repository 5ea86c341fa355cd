//! 接收端: 单线程就绪多路复用, 服务任意数量的已连接对端
//! Receiving side: readiness-based multiplexing over every connected socket

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use crate::error::ChannelError;

const LISTENER: Token = Token(0);
const READ_CHUNK: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 握手推进结果
pub enum Step<M> {
    /// 缓冲区数据不足, 等待更多字节
    NeedMore,
    /// 发送中间确认, 然后继续解析
    Reply(Vec<u8>),
    /// 一条消息接收完毕: 先发送最终确认, 再交付消息 (构造失败则丢弃)
    Complete {
        reply: Vec<u8>,
        message: Result<M, ChannelError>,
    },
}

/// 接收端协议: 按连接维护握手状态, 从缓冲区逐步解析消息
pub trait Handshake: Send + 'static {
    type Message: Send + 'static;
    type State: Default + Send;

    /// 名称 (用于日志)
    fn name(&self) -> &'static str;

    /// 用缓冲区中已有的字节推进握手, 消费掉的字节从 `buf` 头部移除.
    fn advance(&self, state: &mut Self::State, buf: &mut Vec<u8>)
        -> Result<Step<Self::Message>, ChannelError>;

    /// 当前正在等待的载荷长度 (用于判定短读)
    fn expected_len(&self, _state: &Self::State) -> Option<usize> {
        None
    }
}

struct Connection<S> {
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    buf: Vec<u8>,
    /// 尚未写出的确认; 非空时额外关注可写事件
    outbox: Vec<u8>,
    wants_write: bool,
    state: S,
}

/// 已绑定的接收端, `spawn` 后在独立线程中运行
pub struct Receiver<H: Handshake> {
    handshake: H,
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl<H: Handshake> Receiver<H> {
    /// 绑定监听地址 (端口0由系统分配)
    pub fn bind(addr: SocketAddr, handshake: H) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(addr)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            handshake,
            poll,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 启动接收线程, 解码后的消息推入 `tx`
    pub fn spawn(self, tx: Sender<H::Message>, running: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
        let name = format!("{}-receiver", self.handshake.name());
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run(tx, &running))
    }

    /// 接收循环: 每次迭代检查一次中断标志
    pub fn run(mut self, tx: Sender<H::Message>, running: &AtomicBool) {
        info!("✅ {} 接收端启动: {}", self.handshake.name(), self.local_addr);

        let mut events = Events::with_capacity(128);
        let mut connections: HashMap<Token, Connection<H::State>> = HashMap::new();
        let mut next_token = 1;

        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_INTERVAL)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!("❌ {} poll失败: {}", self.handshake.name(), e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        self.accept_all(&mut connections, &mut next_token);
                    }
                    token => {
                        let Some(conn) = connections.get_mut(&token) else {
                            continue;
                        };
                        if let Err(e) = self.service(conn, &tx) {
                            if e.is_fatal() {
                                info!("🔌 {} 连接关闭 {}: {}", self.handshake.name(), conn.peer, e);
                                if let Some(mut conn) = connections.remove(&token) {
                                    let _ = self.poll.registry().deregister(&mut conn.stream);
                                }
                            } else {
                                // 协议违规: 丢弃当前消息, 连接继续可用
                                warn!("⚠️ {} 协议错误 {}: {}", self.handshake.name(), conn.peer, e);
                                conn.buf.clear();
                                conn.state = H::State::default();
                            }
                        }
                    }
                }
            }
        }

        info!("✅ {} 接收端退出", self.handshake.name());
    }

    fn accept_all(
        &mut self,
        connections: &mut HashMap<Token, Connection<H::State>>,
        next_token: &mut usize,
    ) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(*next_token);
                    *next_token += 1;
                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!("❌ 注册连接失败 {}: {}", peer, e);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    info!("🔗 {} 新连接: {}", self.handshake.name(), peer);
                    connections.insert(
                        token,
                        Connection {
                            stream,
                            token,
                            peer,
                            buf: Vec::new(),
                            outbox: Vec::new(),
                            wants_write: false,
                            state: H::State::default(),
                        },
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("❌ accept失败: {}", e);
                    break;
                }
            }
        }
    }

    /// 读空套接字 (边沿触发), 尽可能推进握手, 再写出排队的确认.
    /// 可读和可写事件都走这里.
    fn service(
        &self,
        conn: &mut Connection<H::State>,
        tx: &Sender<H::Message>,
    ) -> Result<(), ChannelError> {
        let closed = read_available(&mut conn.stream, &mut conn.buf)?;
        let progress = self.drive(conn, tx);
        self.flush_outbox(conn)?;

        if closed {
            // 对端在载荷中途关闭
            if let Some(expected) = self.handshake.expected_len(&conn.state) {
                return Err(ChannelError::ShortRead {
                    expected,
                    received: conn.buf.len(),
                });
            }
            return Err(ChannelError::Disconnected);
        }
        progress
    }

    fn drive(
        &self,
        conn: &mut Connection<H::State>,
        tx: &Sender<H::Message>,
    ) -> Result<(), ChannelError> {
        loop {
            match self.handshake.advance(&mut conn.state, &mut conn.buf)? {
                Step::NeedMore => return Ok(()),
                Step::Reply(reply) => conn.outbox.extend_from_slice(&reply),
                Step::Complete { reply, message } => {
                    conn.outbox.extend_from_slice(&reply);
                    match message {
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                debug!("{} 队列已关闭", self.handshake.name());
                            }
                        }
                        Err(e) => warn!("⚠️ {} 丢弃消息: {}", self.handshake.name(), e),
                    }
                }
            }
        }
    }

    /// 写出排队的确认. 对端暂时不读时保留剩余字节并关注可写事件,
    /// 不阻塞其他连接.
    fn flush_outbox(&self, conn: &mut Connection<H::State>) -> Result<(), ChannelError> {
        let drained = flush(&mut conn.stream, &mut conn.outbox)?;
        if drained == conn.wants_write {
            let interest = if drained {
                Interest::READABLE
            } else {
                Interest::READABLE | Interest::WRITABLE
            };
            self.poll
                .registry()
                .reregister(&mut conn.stream, conn.token, interest)?;
            conn.wants_write = !drained;
        }
        Ok(())
    }
}

/// 读到 `WouldBlock` 为止, 返回对端是否已关闭
fn read_available(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<bool, ChannelError> {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(true),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// 尽量写出 `outbox`, 写出的字节从头部移除. 返回是否已全部写完.
fn flush(stream: &mut TcpStream, outbox: &mut Vec<u8>) -> Result<bool, ChannelError> {
    while !outbox.is_empty() {
        match stream.write(outbox) {
            Ok(0) => return Err(ChannelError::Disconnected),
            Ok(n) => {
                outbox.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
