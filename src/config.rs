//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// Upper bound on a sanitized file name, extension included.
pub const MAX_FILE_NAME_LEN: usize = 90;
/// Hex characters taken from a v4 UUID when breaking a name collision.
pub const DISAMBIGUATOR_LEN: usize = 12;
pub const DEFAULT_STORAGE_DIR: &str = "uploads";
pub const DEFAULT_DIR_MODE: &str = "0775";
pub const DEFAULT_FILE_MODE: &str = "0664";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-stash", version = VERSION_INFO, about = "AxoStash file ingestion server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "STASH_STORAGE_DIR",
        default_value = DEFAULT_STORAGE_DIR,
        help = "Storage root for uploaded files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "STASH_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "STASH_HTTP_PORT",
        default_value_t = 3011,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "STASH_HTTPS_PORT",
        default_value_t = 3012,
        help = "HTTPS port"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "STASH_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "STASH_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(long, env = "STASH_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "STASH_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload body size in bytes"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "STASH_DIR_MODE",
        default_value = DEFAULT_DIR_MODE,
        value_parser = parse_mode,
        help = "Octal mode applied to created folders"
    )]
    pub dir_mode: u32,
    #[arg(
        long,
        env = "STASH_FILE_MODE",
        default_value = DEFAULT_FILE_MODE,
        value_parser = parse_mode,
        help = "Octal mode applied to stored files"
    )]
    pub file_mode: u32,
}

/// Parse a permission mode given in octal, with or without a `0o` prefix.
fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.trim().trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|err| format!("invalid octal mode {value:?}: {err}"))
}
