use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{self, FrameCodec};
use crate::config::Config;
use crate::connection::{Connection, Outbound};
use crate::pipeline::{self, Completions, ConnectionPool, DrainDecision, Options, Pipeline};
use crate::stats::ProxyStats;
use crate::upstream::UpstreamPool;
use crate::Error;

/// Process wide drain flag. Once started, connections close as soon as they have no
/// outstanding requests.
pub struct DrainSignal {
    tx: watch::Sender<bool>,
}

impl DrainSignal {
    pub fn new() -> DrainSignal {
        let (tx, _) = watch::channel(false);
        DrainSignal { tx }
    }

    pub fn start(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_draining(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for DrainSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainDecision for DrainSignal {
    fn drain_close(&self) -> bool {
        self.is_draining()
    }
}

/// Keeps `downstream_cx_active` accurate even when the connection task is aborted.
struct ActiveConnection(Arc<ProxyStats>);

impl ActiveConnection {
    fn new(stats: Arc<ProxyStats>) -> ActiveConnection {
        ProxyStats::inc(&stats.downstream_cx_total);
        ProxyStats::inc(&stats.downstream_cx_active);
        ActiveConnection(stats)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ProxyStats::dec(&self.0.downstream_cx_active);
    }
}

/// Everything a connection task needs, shared by all of them.
#[derive(Clone)]
struct Shared {
    pool: Arc<dyn ConnectionPool>,
    drain: Arc<DrainSignal>,
    stats: Arc<ProxyStats>,
    options: Options,
    max_frame_size: usize,
}

pub async fn run(config: Config) -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    config.validate()?;

    let listener = TcpListener::bind((config.bind.as_str(), config.port)).await?;
    let pool = UpstreamPool::new(&config.upstreams, config.max_frame_size)?;
    let stats = Arc::new(ProxyStats::new(config.stat_prefix.clone()));

    info!(
        upstreams = ?pool.addrs(),
        "Memcached proxy listening on {}",
        listener.local_addr()?
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    serve(listener, config, Arc::new(pool), stats, shutdown).await
}

/// Accepts connections until `shutdown` resolves, then drains them.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    pool: Arc<dyn ConnectionPool>,
    stats: Arc<ProxyStats>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let shared = Shared {
        pool,
        drain: Arc::new(DrainSignal::new()),
        stats: stats.clone(),
        options: config.pipeline_options(),
        max_frame_size: config.max_frame_size,
    };
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, client_address) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                info!("Accepted connection from {:?}", client_address);
                connections.spawn(handle_connection(shared.clone(), socket, client_address));
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    drop(listener);
    info!(connections = connections.len(), "Shutting down, draining connections");
    shared.drain.start();

    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            connections = connections.len(),
            "Shutdown timeout elapsed, closing remaining connections"
        );
        connections.shutdown().await;
    }

    info!("Final stats:\n{}", stats.snapshot());
    Ok(())
}

#[instrument(
    name = "connection",
    skip(shared, stream),
    fields(connection_id, client_address)
)]
async fn handle_connection(shared: Shared, stream: TcpStream, client_address: SocketAddr) {
    let codec = FrameCodec::new()
        .with_max_frame_size(shared.max_frame_size)
        .with_stats(shared.stats.clone());
    let mut conn = Connection::new(stream, client_address, codec, shared.stats.clone());

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    let _active = ActiveConnection::new(shared.stats.clone());

    let drain: Arc<dyn DrainDecision> = shared.drain.clone();
    let (mut pipeline, mut completions) = Pipeline::new(
        shared.pool.clone(),
        drain,
        shared.stats.clone(),
        shared.options,
    );
    let mut outbound = Outbound::default();

    let result = proxy(
        &shared,
        &mut conn,
        &mut pipeline,
        &mut completions,
        &mut outbound,
    )
    .await;

    pipeline.on_disconnect();

    match result {
        Ok(()) => info!("Connection closed"),
        Err(e) => error!("Connection closed: {}", e),
    }
}

async fn proxy(
    shared: &Shared,
    conn: &mut Connection,
    pipeline: &mut Pipeline,
    completions: &mut Completions,
    outbound: &mut Outbound,
) -> Result<(), Error> {
    let mut draining = shared.drain.subscribe();
    let mut drain_seen = false;

    if shared.drain.is_draining() {
        drain_seen = true;
        pipeline.drain_if_idle(outbound);
    }

    while !outbound.is_closing() {
        tokio::select! {
            frames = conn.read_frames() => {
                let frames = match frames {
                    Ok(Some(frames)) => frames,
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        if !matches!(e, codec::Error::Io(_)) {
                            ProxyStats::inc(&shared.stats.downstream_cx_protocol_error);
                        }
                        return Err(e.into());
                    }
                };

                for frame in frames {
                    match pipeline.submit(frame, outbound) {
                        Ok(()) => {}
                        Err(pipeline::Error::Closed) => break,
                        Err(e) if e.is_request_level() && !shared.options.close_on_request_error => {
                            warn!("Rejected request: {}", e);
                        }
                        Err(e) => {
                            ProxyStats::inc(&shared.stats.downstream_cx_protocol_error);
                            conn.flush(outbound).await?;
                            return Err(e.into());
                        }
                    }
                }
            }
            Some(completed) = completions.recv() => {
                pipeline.complete(completed, outbound);
            }
            changed = draining.changed(), if !drain_seen => {
                drain_seen = true;
                if changed.is_ok() && pipeline.drain_if_idle(outbound) {
                    debug!("Closing idle connection for drain");
                }
            }
        }

        conn.flush(outbound).await?;
    }

    Ok(())
}
