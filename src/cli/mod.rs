use clap::{ Args, Parser, Subcommand };
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the ingress server that appends submitted conversations to the dataset.
    Serve(ServeArgs),
    /// Submit conversation payload files, queueing the ones that fail.
    Submit(SubmitArgs),
    /// Resubmit everything in the local retry queue.
    Drain(DrainArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required in the X-API-Key header of submissions. Blank disables the check.
    #[arg(long, env = "API_KEY")]
    pub api_key: Option<String>,

    /// Maximum accepted submissions per second across all clients. 0 disables limiting.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "20")]
    pub rate_limit_per_second: u32,

    // --- Dataset Store Args ---
    /// Where the shared log lives (huggingface, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "huggingface")]
    pub store_type: String,

    /// Access token with write access to the dataset repository.
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Dataset repository id (e.g., someone/chat-transcripts)
    #[arg(long, env = "HF_REPO_ID")]
    pub hf_repo_id: Option<String>,

    /// Base URL of the Hub API.
    #[arg(long, env = "HF_ENDPOINT", default_value = "https://huggingface.co")]
    pub hf_endpoint: String,

    /// Branch the log is committed to.
    #[arg(long, env = "HF_BRANCH", default_value = "main")]
    pub hf_branch: String,

    /// Path of the JSON Lines log inside the repository.
    #[arg(long, env = "DATA_PATH", default_value = "data/train.jsonl")]
    pub data_path: String,

    /// Timeout in seconds for each request to the store.
    #[arg(long, env = "STORE_TIMEOUT_SECS", default_value = "30")]
    pub store_timeout_secs: u64,

    // --- TLS Args ---
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the ingress server.
    #[arg(long, env = "COLLECTOR_ENDPOINT", default_value = "http://127.0.0.1:4000")]
    pub endpoint: String,

    /// API Key sent in the X-API-Key header.
    #[arg(long, env = "COLLECTOR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// File holding payloads that could not be submitted yet.
    #[arg(long, env = "RETRY_QUEUE_PATH", default_value = "retry_queue.json")]
    pub queue_path: PathBuf,

    /// Timeout in seconds for each submission.
    #[arg(long, env = "SUBMIT_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub client: ClientArgs,

    /// JSON files, each holding one conversation payload.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DrainArgs {
    #[command(flatten)]
    pub client: ClientArgs,
}
