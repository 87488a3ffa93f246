use clap::Parser;

/// Command-line overrides for the bind address and log verbosity.
#[derive(Debug, Parser)]
#[command(name = "mediadav", version, about = "Read-only WebDAV gateway that projects a torrent store into a Plex tree")]
pub struct Cli {
    /// Override HOST
    #[arg(long)]
    pub host: Option<String>,

    /// Override PORT
    #[arg(long)]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rd_webdav_url: String,
    pub rd_username: String,
    pub rd_password: String,
    pub omdb_api_key: Option<String>,
    pub tmdb_api_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub cache_ttl_secs: u64,
    pub verbose: bool,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads `.env` (if present), then process environment, then applies CLI overrides.
    pub fn load(cli: &Cli) -> Self {
        dotenvy::dotenv().ok();

        let mut config = Config {
            rd_webdav_url: env_string("RD_WEBDAV_URL", "https://dav.real-debrid.com"),
            rd_username: env_string("RD_USERNAME", ""),
            rd_password: env_string("RD_PASSWORD", ""),
            omdb_api_key: env_opt_string("OMDB_API_KEY"),
            tmdb_api_key: env_opt_string("TMDB_API_KEY"),
            host: env_string("HOST", "0.0.0.0"),
            port: env_u16("PORT", 8080),
            cache_ttl_secs: env_u64("CACHE_TTL", 300),
            verbose: cli.verbose,
        };

        if let Some(host) = &cli.host {
            config.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.port = port;
        }

        config
    }

    pub fn credentials_present(&self) -> bool {
        !self.rd_username.is_empty() && !self.rd_password.is_empty()
    }
}
