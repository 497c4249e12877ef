use clap::Parser;

#[derive(Parser)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// STOMP broker address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:61613")]
    pub address: String,

    /// Virtual host sent in the CONNECT `host` header
    #[arg(long, default_value = "/")]
    pub host: String,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: String,

    /// Split outbound frames larger than this many bytes (0 disables)
    #[arg(long, default_value_t = 16 * 1024)]
    pub max_frame_size: usize,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Seconds to wait for CONNECTED
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Print every frame sent and received
    #[arg(long)]
    pub wire: bool,
}
