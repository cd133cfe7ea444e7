use serde::Deserialize;
use std::env::vars;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub enum Env {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "test")]
    Test,
    #[serde(rename = "staging")]
    Staging,
    #[serde(rename = "prod")]
    Prod,
}

impl Display for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Env::Local => write!(f, "local"),
            Env::Test => write!(f, "test"),
            Env::Staging => write!(f, "staging"),
            Env::Prod => write!(f, "prod"),
        }
    }
}

const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_OTP_TTL_SECS: u64 = 5 * 60;
const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;
const MAX_OTP_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_OTP_MAX_FAILURES: u32 = 5;
const DEFAULT_OTP_MAX_REQUESTS: u32 = 5;
const DEFAULT_OTP_RATE_WINDOW_SECS: u64 = 15 * 60;
const MAX_OTP_RATE_WINDOW_SECS: u64 = 24 * 60 * 60;
const DEFAULT_MAILER_PORT: u16 = 587;
const DEFAULT_IMAGE_DIR: &str = "./access/images";
const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// SMTP relay settings used by the email dispatcher.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    from: String,
    tls: bool,
    skip_connection_check: bool,
}

impl MailerConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Username and password, present only when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    pub fn from_address(&self) -> &str {
        &self.from
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn skip_connection_check(&self) -> bool {
        self.skip_connection_check
    }
}

// The final, validated configuration struct.
/// Per-email limits on passcode traffic within a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpRateLimitConfig {
    /// Wrong codes allowed before further checks are refused.
    pub max_failures: u32,
    /// Codes that may be requested.
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for OtpRateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: DEFAULT_OTP_MAX_FAILURES,
            max_requests: DEFAULT_OTP_MAX_REQUESTS,
            window: Duration::from_secs(DEFAULT_OTP_RATE_WINDOW_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    env: Env,
    database_url: String,
    server_addr: String,
    port: u16,
    jwt_secret: String,
    session_ttl: Duration,
    otp_ttl: Duration,
    otp_rate_limit: OtpRateLimitConfig,
    mailer: MailerConfig,
    image_dir: PathBuf,
    max_image_bytes: usize,
    cors_allowed_origins: Vec<String>,
    google_cloud_project: Option<String>,
}

// Intermediate struct for deserializing environment variables
// where most fields are optional and defaulted per environment.
#[derive(Deserialize)]
struct RawConfig {
    env: Env,
    database_url: String,
    server_addr: Option<String>,
    port: Option<u16>,
    jwt_secret: Option<String>,
    session_ttl_secs: Option<u64>,
    otp_ttl_secs: Option<u64>,
    otp_max_failures: Option<u32>,
    otp_max_requests: Option<u32>,
    otp_rate_window_secs: Option<u64>,
    mailer_host: Option<String>,
    mailer_port: Option<u16>,
    mailer_username: Option<String>,
    mailer_password: Option<String>,
    mailer_from: Option<String>,
    mailer_tls: Option<bool>,
    mailer_skip_connection_check: Option<bool>,
    image_dir: Option<String>,
    max_image_bytes: Option<usize>,
    cors_allowed_origins: Option<String>,
    google_cloud_project: Option<String>,
}

impl Config {
    /// Create a test configuration with default values.
    ///
    /// Available to both unit and integration tests. Not for production use.
    pub fn new_for_test() -> Self {
        Self {
            env: Env::Local,
            database_url: "postgres://localhost:5432/test".to_string(),
            server_addr: "127.0.0.1".to_string(),
            port: 8000,
            jwt_secret: "test-jwt-secret-key-for-local-development".to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            otp_ttl: Duration::from_secs(DEFAULT_OTP_TTL_SECS),
            otp_rate_limit: OtpRateLimitConfig::default(),
            mailer: MailerConfig {
                host: "localhost".to_string(),
                port: 1025,
                username: None,
                password: None,
                from: "TiawPao <no-reply@tiawpao.local>".to_string(),
                tls: false,
                skip_connection_check: true,
            },
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            cors_allowed_origins: vec!["*".to_string()],
            google_cloud_project: None,
        }
    }

    /// Test configuration storing uploads under `dir`.
    pub fn new_for_test_with_image_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: dir.into(),
            ..Self::new_for_test()
        }
    }

    pub fn environment(&self) -> &Env {
        &self.env
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_local(&self) -> bool {
        matches!(self.env, Env::Local)
    }

    /// Get the secret used to sign session tokens.
    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    pub fn otp_ttl(&self) -> Duration {
        self.otp_ttl
    }

    pub fn otp_rate_limit(&self) -> OtpRateLimitConfig {
        self.otp_rate_limit
    }

    pub fn mailer(&self) -> &MailerConfig {
        &self.mailer
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn max_image_bytes(&self) -> usize {
        self.max_image_bytes
    }

    pub fn cors_allowed_origins(&self) -> &[String] {
        &self.cors_allowed_origins
    }

    pub fn google_cloud_project(&self) -> Option<&str> {
        self.google_cloud_project.as_deref()
    }

    /// Initializes configuration by reading from environment variables
    /// (and a `.env` file when one exists) and applying environment-aware defaults.
    pub fn init() -> anyhow::Result<Self> {
        info!("Loading configuration from environment variables");

        if let Ok(path) = dotenvy::dotenv() {
            info!("Loaded environment overrides from {}", path.display());
        }

        let raw_config: RawConfig = serde_env::from_iter(vars())?;
        Self::from_raw(raw_config)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let RawConfig {
            env,
            database_url,
            server_addr,
            port,
            jwt_secret,
            session_ttl_secs,
            otp_ttl_secs,
            otp_max_failures,
            otp_max_requests,
            otp_rate_window_secs,
            mailer_host,
            mailer_port,
            mailer_username,
            mailer_password,
            mailer_from,
            mailer_tls,
            mailer_skip_connection_check,
            image_dir,
            max_image_bytes,
            cors_allowed_origins,
            google_cloud_project,
        } = raw_config;

        let relaxed = matches!(env, Env::Local | Env::Test);

        let server_addr = match server_addr {
            Some(addr) => {
                info!("Using provided SERVER_ADDR: {addr}");
                addr
            }
            None => {
                let default_addr = match env {
                    Env::Local => "127.0.0.1",
                    _ => "0.0.0.0",
                };
                info!(
                    "SERVER_ADDR not set, defaulting to {} for {} environment",
                    default_addr, env
                );
                default_addr.to_string()
            }
        };

        let port = match port {
            Some(port) => port,
            None if relaxed => {
                info!("PORT not set, defaulting to 8000 for {env} environment");
                8000
            }
            None => anyhow::bail!("PORT must be set for {env} environment"),
        };

        let jwt_secret = match jwt_secret {
            Some(secret) if secret.trim().is_empty() => anyhow::bail!("JWT_SECRET cannot be empty"),
            Some(secret) => secret,
            None if relaxed => {
                info!("JWT_SECRET not set, using default for {env} environment");
                "default-jwt-secret-for-local-development-only".to_string()
            }
            None => anyhow::bail!("JWT_SECRET must be set for {env} environment"),
        };

        let mailer_host = match mailer_host {
            Some(host) => host,
            None if relaxed => "localhost".to_string(),
            None => anyhow::bail!("MAILER_HOST must be set for {env} environment"),
        };

        if !relaxed && (mailer_username.is_none() || mailer_password.is_none()) {
            anyhow::bail!(
                "MAILER_USERNAME and MAILER_PASSWORD must be set for {} environment",
                env
            );
        }

        let mailer_from = match (mailer_from, mailer_username.as_deref()) {
            (Some(from), _) => from,
            (None, Some(user)) => format!("TiawPao <{user}>"),
            (None, None) => "TiawPao <no-reply@tiawpao.local>".to_string(),
        };

        let otp_ttl_secs = otp_ttl_secs.unwrap_or(DEFAULT_OTP_TTL_SECS);
        if !(1..=MAX_OTP_TTL_SECS).contains(&otp_ttl_secs) {
            anyhow::bail!("OTP_TTL_SECS must be between 1 and {MAX_OTP_TTL_SECS}");
        }

        let session_ttl_secs = session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if !(1..=MAX_SESSION_TTL_SECS).contains(&session_ttl_secs) {
            anyhow::bail!("SESSION_TTL_SECS must be between 1 and {MAX_SESSION_TTL_SECS}");
        }

        let otp_rate_limit = OtpRateLimitConfig {
            max_failures: otp_max_failures.unwrap_or(DEFAULT_OTP_MAX_FAILURES),
            max_requests: otp_max_requests.unwrap_or(DEFAULT_OTP_MAX_REQUESTS),
            window: Duration::from_secs(
                otp_rate_window_secs.unwrap_or(DEFAULT_OTP_RATE_WINDOW_SECS),
            ),
        };
        if otp_rate_limit.max_failures == 0
            || otp_rate_limit.max_requests == 0
            || otp_rate_limit.window.is_zero()
        {
            anyhow::bail!("OTP rate limits must be greater than zero");
        }
        if otp_rate_limit.window > Duration::from_secs(MAX_OTP_RATE_WINDOW_SECS) {
            anyhow::bail!("OTP_RATE_WINDOW_SECS must be at most {MAX_OTP_RATE_WINDOW_SECS}");
        }

        let cors_allowed_origins = parse_origins(cors_allowed_origins.as_deref());

        Ok(Config {
            env,
            database_url,
            server_addr,
            port,
            jwt_secret,
            session_ttl: Duration::from_secs(session_ttl_secs),
            otp_ttl: Duration::from_secs(otp_ttl_secs),
            otp_rate_limit,
            mailer: MailerConfig {
                host: mailer_host,
                port: mailer_port.unwrap_or(DEFAULT_MAILER_PORT),
                username: mailer_username,
                password: mailer_password,
                from: mailer_from,
                tls: mailer_tls.unwrap_or(!relaxed),
                skip_connection_check: mailer_skip_connection_check.unwrap_or(relaxed),
            },
            image_dir: image_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            max_image_bytes: max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            cors_allowed_origins,
            google_cloud_project,
        })
    }
}

fn parse_origins(raw: Option<&str>) -> Vec<String> {
    let origins: Vec<String> = raw
        .unwrap_or("*")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}
