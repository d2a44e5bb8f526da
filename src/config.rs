use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::pipeline::Options;
use crate::Error;

const PORT: u16 = 22122;

#[derive(Parser, Debug, Clone)]
#[command(name = "memcache-proxy", about = "Binary protocol memcached proxy")]
pub struct Config {
    /// The address to listen on
    #[arg(short, long, default_value = "127.0.0.1")]
    pub bind: String,

    /// The port to listen on
    #[arg(short, long, default_value_t = PORT)]
    pub port: u16,

    /// Upstream memcached servers, keys are sharded across them
    #[arg(short, long = "upstream", value_delimiter = ',', env = "UPSTREAMS")]
    pub upstreams: Vec<SocketAddr>,

    /// Largest frame accepted from a client, header included
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// Prefix of the exported statistics
    #[arg(long, default_value = "proxy")]
    pub stat_prefix: String,

    /// Close client connections once idle while the proxy is draining
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub drain_close: bool,

    /// Close the client connection on a request level error instead of answering it
    #[arg(long, default_value_t = false)]
    pub close_on_request_error: bool,

    /// How long to wait for open connections on shutdown
    #[arg(long, default_value_t = 5000)]
    pub shutdown_timeout_ms: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.upstreams.is_empty() {
            return Err("at least one upstream server is required".into());
        }
        if self.max_frame_size == 0 {
            return Err("max frame size must be greater than zero".into());
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> Options {
        Options {
            drain_close_enabled: self.drain_close,
            close_on_request_error: self.close_on_request_error,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
