use clap::{Parser, Subcommand};
use intercache::ResourceKind;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    name = "intercache",
    version,
    about = "Interception-based HTTP response cache",
    long_about = "Runs requests through an on-disk response cache the way an embedding host\n\
                  would: each request is intercepted, served from the cache on a hit, and\n\
                  otherwise fetched from the network and stored for next time."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    /// Cache data directory
    #[arg(
        short = 'C',
        long,
        global = true,
        help = "Directory holding the cache (default: <tmp>/intercache)"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// How long an unfinished fill blocks other fills for the same key
    #[arg(
        long,
        global = true,
        default_value = "30s",
        help = "Fill timeout with optional unit (s, m, h). Examples: \"30s\", \"2m\""
    )]
    pub fill_timeout: String,

    /// Cacheable status codes
    #[arg(
        long = "status",
        global = true,
        help = "Cacheable response status (repeatable, default: 200)"
    )]
    pub statuses: Vec<u16>,

    /// Cacheable resource kinds
    #[arg(
        long = "kind",
        global = true,
        help = "Cacheable resource kind, e.g. image, xhr, script (repeatable, default: image and xhr)"
    )]
    pub kinds: Vec<ResourceKind>,

    /// Maximum age of stored entries
    #[arg(
        long,
        global = true,
        help = "Treat entries older than this as absent, with optional unit (s, m, h). Unlimited when omitted"
    )]
    pub max_age: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch URLs through the cache
    Fetch {
        /// URLs to request
        #[arg(required = true)]
        urls: Vec<String>,

        /// Resource kind the requests are classified as
        #[arg(long = "as", default_value = "xhr")]
        resource_kind: ResourceKind,

        /// Extra request headers
        #[arg(
            short = 'H',
            long = "header",
            help = "Add a request header in \"Name: Value\" format (repeatable)"
        )]
        headers: Vec<String>,

        /// Save each body to this directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Show whether a URL is cached, without fetching it
    Lookup {
        url: String,

        #[arg(long = "as", default_value = "xhr")]
        resource_kind: ResourceKind,
    },

    /// Remove the entry for a URL
    Purge {
        url: String,

        #[arg(long = "as", default_value = "xhr")]
        resource_kind: ResourceKind,
    },

    /// Remove every entry
    Clear,

    /// Show cache statistics
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let args = CliArgs::try_parse_from([
            "intercache",
            "--kind",
            "image",
            "--status",
            "200",
            "--status",
            "203",
            "fetch",
            "--as",
            "image",
            "http://localhost/a.png",
            "http://localhost/b.png",
        ])
        .unwrap();

        assert_eq!(args.kinds, vec![ResourceKind::Image]);
        assert_eq!(args.statuses, vec![200, 203]);
        let Commands::Fetch {
            urls,
            resource_kind,
            ..
        } = args.command
        else {
            panic!("expected fetch");
        };
        assert_eq!(urls.len(), 2);
        assert_eq!(resource_kind, ResourceKind::Image);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from(["intercache", "stats", "-v", "--max-age", "1h"]).unwrap();
        assert!(args.verbose);
        assert_eq!(args.max_age.as_deref(), Some("1h"));
        assert!(matches!(args.command, Commands::Stats));
    }
}
