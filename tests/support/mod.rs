#![allow(dead_code)]

use bytes::Bytes;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::codec::Framed;

use memcache_proxy::codec::FrameCodec;
use memcache_proxy::config::Config;
use memcache_proxy::frame::{Frame, Opcode, Status};
use memcache_proxy::server::serve;
use memcache_proxy::stats::ProxyStats;
use memcache_proxy::upstream::UpstreamPool;
use memcache_proxy::Error;

/// How a [`Backend`] treats its connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Closes each connection after replying to this many requests.
    CloseAfter(usize),
    /// Replies with an opaque that does not match the request.
    WrongOpaque,
}

/// Minimal memcached speaking the binary protocol, with an optional delay before each reply.
pub struct Backend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Frame>>>,
}

impl Backend {
    pub async fn start(delay: Duration) -> Backend {
        Backend::start_with(delay, Mode::Normal).await
    }

    pub async fn start_with(delay: Duration, mode: Mode) -> Backend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(Mutex::new(HashMap::new()));

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_backend(socket, delay, mode, seen.clone(), store.clone()));
            }
        });

        Backend { addr, requests }
    }

    /// Opcodes received so far, in arrival order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.opcode)
            .collect()
    }

    /// Keys received so far, in arrival order.
    pub fn keys(&self) -> Vec<Bytes> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.key.clone())
            .collect()
    }
}

async fn serve_backend(
    socket: TcpStream,
    delay: Duration,
    mode: Mode,
    requests: Arc<Mutex<Vec<Frame>>>,
    store: Arc<Mutex<HashMap<Bytes, Bytes>>>,
) {
    let mut framed = Framed::new(socket, FrameCodec::new());
    let mut replied = 0;

    while let Some(Ok(request)) = framed.next().await {
        if mode == Mode::CloseAfter(replied) {
            requests.lock().unwrap().push(request);
            return;
        }

        requests.lock().unwrap().push(request.clone());
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut response = {
            let mut store = store.lock().unwrap();
            match request.opcode {
                Opcode::Get | Opcode::GetK => match store.get(&request.key) {
                    Some(value) => {
                        let mut response = Frame::response_to(&request, Status::NoError)
                            .with_extras(vec![0u8; 4])
                            .with_value(value.clone());
                        if request.opcode == Opcode::GetK {
                            response.key = request.key.clone();
                        }
                        response
                    }
                    None => Frame::response_to(&request, Status::KeyNotFound).with_value("Not found"),
                },
                Opcode::Set => {
                    store.insert(request.key.clone(), request.value.clone());
                    Frame::response_to(&request, Status::NoError).with_cas(1)
                }
                Opcode::Delete => match store.remove(&request.key) {
                    Some(_) => Frame::response_to(&request, Status::NoError),
                    None => Frame::response_to(&request, Status::KeyNotFound).with_value("Not found"),
                },
                Opcode::Version => Frame::response_to(&request, Status::NoError).with_value("1.6.0"),
                _ => Frame::response_to(&request, Status::NoError),
            }
        };

        if mode == Mode::WrongOpaque {
            response.opaque = response.opaque.wrapping_add(1000);
        }

        if framed.send(response).await.is_err() {
            break;
        }
        replied += 1;

        if mode == Mode::CloseAfter(replied) {
            return;
        }
    }
}

pub struct Proxy {
    pub addr: SocketAddr,
    pub stats: Arc<ProxyStats>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), Error>>,
}

impl Proxy {
    pub async fn start(upstreams: &[SocketAddr], args: &[&str]) -> Proxy {
        let upstreams = upstreams
            .iter()
            .map(|addr| addr.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut argv = vec!["memcache-proxy", "--upstream", upstreams.as_str()];
        argv.extend_from_slice(args);
        let config = Config::try_parse_from(argv).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = Arc::new(UpstreamPool::new(&config.upstreams, config.max_frame_size).unwrap());
        let stats = Arc::new(ProxyStats::new(config.stat_prefix.clone()));
        let (tx, rx) = oneshot::channel();

        let handle = tokio::spawn(serve(listener, config, pool, stats.clone(), async {
            let _ = rx.await;
        }));

        Proxy {
            addr,
            stats,
            shutdown: Some(tx),
            handle,
        }
    }

    /// Starts draining and waits for the server to stop.
    pub async fn shutdown(mut self) -> Result<(), Error> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap()
    }
}

pub struct Client {
    framed: Framed<TcpStream, FrameCodec>,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        Client {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    /// Writes every request in a single flush so they reach the proxy pipelined.
    pub async fn send_all(&mut self, requests: Vec<Frame>) {
        for request in requests {
            self.framed.feed(request).await.unwrap();
        }
        SinkExt::<Frame>::flush(&mut self.framed).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a response")
            .map(|frame| frame.unwrap())
    }

    pub async fn recv_n(&mut self, n: usize) -> Vec<Frame> {
        let mut responses = Vec::with_capacity(n);
        for _ in 0..n {
            responses.push(self.recv().await.expect("connection closed"));
        }
        responses
    }

    pub async fn round_trip(&mut self, request: Frame) -> Frame {
        self.send_all(vec![request]).await;
        self.recv().await.expect("connection closed")
    }

    /// Writes raw bytes, bypassing the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }
}
