use clap::{Parser, Subcommand, ValueEnum};
use link_engine::transport::HttpMethod;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "chatrelay", version, about = "Topic-addressed event relay for stream bots")]
pub struct Args {
    /// Configuration file (defaults to <config dir>/chatrelay/config.toml)
    #[arg(short, long, global = true, env = "CHATRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hub address, overriding the configuration file
    #[arg(short, long, global = true, env = "CHATRELAY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the distribution hub
    Hub {
        /// Listen address, defaults to the configured endpoint
        #[arg(long)]
        bind: Option<String>,
    },

    /// Publish one message
    Publish {
        /// Topic, e.g. `chat:ronni:1337`
        topic: String,

        /// Payload frames, sent in order
        #[arg(required = true)]
        frames: Vec<String>,
    },

    /// Print every message whose topic contains all given segments
    Tail {
        /// Segments the topic must contain, in any order
        segments: Vec<String>,

        /// Hub-side topic prefix (empty receives everything)
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Relay a Twitch channel's chat onto `chat:<channel>:<user-id>`
    Chat {
        /// Channel to join
        #[arg(long)]
        channel: String,

        /// Login name; anonymous when omitted
        #[arg(long, env = "TWITCH_NICK", requires = "token")]
        nick: Option<String>,

        /// OAuth token for `--nick`
        #[arg(long, env = "TWITCH_OAUTH_TOKEN", hide_env_values = true, requires = "nick")]
        token: Option<String>,
    },

    /// Poll an HTTP endpoint and relay each JSON response onto `poll:<name>`
    Poll {
        /// Endpoint to poll
        #[arg(long)]
        url: String,

        /// Topic scope for the responses
        #[arg(long)]
        name: String,

        /// Seconds between polls (at least 10)
        #[arg(long)]
        interval: Option<u64>,

        /// HTTP method
        #[arg(long, value_enum)]
        method: Option<MethodArg>,

        /// Extra request header as `Name: value`; repeatable
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Poll once right away instead of waiting for the first tick
        #[arg(long)]
        now: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodArg {
    Get,
    Delete,
    Head,
    Options,
    Post,
    Put,
    Patch,
}

impl From<MethodArg> for HttpMethod {
    fn from(method: MethodArg) -> Self {
        match method {
            MethodArg::Get => HttpMethod::Get,
            MethodArg::Delete => HttpMethod::Delete,
            MethodArg::Head => HttpMethod::Head,
            MethodArg::Options => HttpMethod::Options,
            MethodArg::Post => HttpMethod::Post,
            MethodArg::Put => HttpMethod::Put,
            MethodArg::Patch => HttpMethod::Patch,
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
