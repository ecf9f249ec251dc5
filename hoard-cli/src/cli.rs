use clap::{Parser, Subcommand};
use hoard_engine::ProxyType;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Caching downloader",
    long_about = "Download remote resources into a bounded local cache.\n\
                  \n\
                  Cached files are reused across runs. When the cache exceeds its size or\n\
                  entry limits the oldest entries are evicted first."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Cache directory
    #[arg(
        long,
        global = true,
        default_value = "./hoard-cache",
        help = "Directory holding cached files and the cache index"
    )]
    pub cache_dir: PathBuf,

    /// Maximum total cache size with optional unit (B, KB, MB, GB, KiB, MiB, GiB)
    #[arg(
        long,
        global = true,
        default_value = "10MB",
        help = "Maximum total size of the cache with optional unit (B, KB, MB, GB, KiB, MiB, GiB), enforced by fetch. Use 0 for unlimited."
    )]
    pub max_size: String,

    /// Maximum number of cached entries
    #[arg(
        long,
        global = true,
        default_value = "10",
        help = "Maximum number of cached entries, enforced by fetch. Use 0 for unlimited."
    )]
    pub max_count: u64,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Overall timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "60",
        help = "Overall timeout in seconds for HTTP requests (0 disables it)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        global = true,
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        global = true,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value = "all",
        help = "Which requests the proxy applies to"
    )]
    pub proxy_type: ProxyType,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        global = true,
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,

    #[arg(long, global = true, help = "User agent sent with every request")]
    pub user_agent: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch one or more URLs through the cache and print their local paths
    Fetch {
        #[arg(required = true, help = "URL(s) to fetch")]
        urls: Vec<String>,

        #[arg(long, help = "Download again even if the URL is already cached")]
        reload: bool,

        #[arg(
            short = 'P',
            long = "progress",
            help = "Show progress bars while downloading"
        )]
        show_progress: bool,

        #[arg(
            long,
            value_name = "N",
            help = "Read back at most N bytes of each file and report how many were read"
        )]
        bytes: Option<u64>,
    },

    /// List cached entries, oldest first
    List,

    /// Remove one URL from the cache
    Evict {
        #[arg(help = "URL to remove")]
        url: String,
    },

    /// Remove every cached file
    Clear,

    /// Trim the cache to new limits, evicting oldest entries first, and print the result.
    /// Limits are not persisted; later fetches use --max-size and --max-count.
    Limits {
        #[arg(long, help = "New maximum total size (0 for unlimited)")]
        size: Option<String>,

        #[arg(long, help = "New maximum entry count (0 for unlimited)")]
        count: Option<u64>,
    },
}
