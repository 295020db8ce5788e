use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer size was too small")]
    IncorrectBufferSize,
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
    #[error("unable to re-open icmp socket: {0}")]
    SocketReopen(#[source] io::Error),
    #[error("unknown host {host}")]
    HostError { host: String },
    #[error("unable to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unable to parse configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),
    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("metrics server error: {0}")]
    Server(#[from] warp::Error),
    #[error("metrics server stopped")]
    ServerStopped,
    #[error("outcome channel closed")]
    ChannelClosed,
    #[error("prober task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPacketError {
    #[error("expected an Ipv4Packet")]
    NotIpv4Packet,
    #[error("expected an Icmpv4Packet payload")]
    NotIcmpv4Packet,
    #[error("expected an Icmpv6Packet")]
    NotIcmpv6Packet,
    #[error("payload too short, got {got}, want {want}")]
    PayloadTooShort { got: usize, want: usize },
    #[error("bad checksum, got {got:#06x}, want {want:#06x}")]
    Checksum { got: u16, want: u16 },
}
