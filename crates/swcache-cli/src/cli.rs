//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use swcache_core::Method;

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Offline cache host for the Xenohuru site")]
#[command(version)]
pub struct Cli {
    /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache namespace directory (default: $XDG_CACHE_HOME/swcache)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Origin the site is served from
    #[arg(long, env = "SWCACHE_ORIGIN", global = true)]
    pub origin: Option<String>,

    /// Hostname of the REST API
    #[arg(long, env = "SWCACHE_API_HOST", global = true)]
    pub api_host: Option<String>,

    /// Cache version tag
    #[arg(long, env = "SWCACHE_CACHE_NAME", global = true)]
    pub cache_name: Option<String>,

    /// Write logs to a daily-rotated file in this directory instead of stderr
    #[arg(long, env = "SWCACHE_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Precache the manifest into the current version's store
    Install,

    /// Delete every other store and make the installed version active
    Activate,

    /// Install, then activate
    Update,

    /// Route one request through the cache layer and print the response body
    Fetch {
        /// Absolute URL to request
        url: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Extra request header, "Name: value" (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Print status line and headers before the body
        #[arg(short, long)]
        include: bool,
    },

    /// Show the active version and the stores on disk
    Status {
        /// List every entry in each store
        #[arg(long)]
        entries: bool,
    },

    /// Print which strategy a URL would be routed to
    Classify { url: String },

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "swcache",
            "fetch",
            "-X",
            "post",
            "-H",
            "Accept: application/json",
            "-i",
            "http://localhost:8080/index.html",
        ])
        .unwrap();

        match cli.command {
            Command::Fetch {
                url,
                method,
                headers,
                include,
            } => {
                assert_eq!(url, "http://localhost:8080/index.html");
                assert_eq!(method, Method::Post);
                assert_eq!(headers, vec!["Accept: application/json".to_string()]);
                assert!(include);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["swcache", "status", "--cache-dir", "/tmp/sw", "--entries"])
            .unwrap();
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/sw")));
        assert!(matches!(cli.command, Command::Status { entries: true }));
    }
}
