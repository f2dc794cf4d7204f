use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use argon2::Params;
use tracing::warn;

const DEV_JWT_SECRET: &str = "concord_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_LOG_FILTER: &str = "concord=debug,tower_http=debug";

/// Fallback log filter from `CONCORD_LOG`. Read on its own so logging can be
/// installed before the rest of the configuration, whose fallbacks warn.
pub fn log_filter() -> String {
    log_filter_from_env_fn(|key| std::env::var(key).ok())
}

fn log_filter_from_env_fn<F>(env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    env("CONCORD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.into())
}

/// Server settings, read from `CONCORD_*` environment variables.
///
/// | Variable | Default |
/// |---|---|
/// | `CONCORD_HOST` | `0.0.0.0` |
/// | `CONCORD_PORT` | `3000` |
/// | `CONCORD_JWT_SECRET` | dev-only placeholder |
/// | `CONCORD_DB_PATH` | `concord.db` |
/// | `CONCORD_ARGON2_MEMORY_KIB` | argon2 default |
/// | `CONCORD_ARGON2_ITERATIONS` | argon2 default |
/// | `CONCORD_SESSION_SWEEP_SECS` | `60` |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub session_sweep_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key).ok())
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = env("CONCORD_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&env, "CONCORD_PORT", 3000);
        let listen_addr = format!("{host}:{port}").parse().unwrap_or_else(|_| {
            warn!("CONCORD_HOST '{}' is not an IP address, binding 0.0.0.0", host);
            SocketAddr::from(([0, 0, 0, 0], port))
        });

        Self {
            listen_addr,
            jwt_secret: env("CONCORD_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into()),
            db_path: env("CONCORD_DB_PATH")
                .unwrap_or_else(|| "concord.db".into())
                .into(),
            argon2_memory_kib: parse_or(&env, "CONCORD_ARGON2_MEMORY_KIB", Params::DEFAULT_M_COST),
            argon2_iterations: parse_or(&env, "CONCORD_ARGON2_ITERATIONS", Params::DEFAULT_T_COST),
            session_sweep_interval: Duration::from_secs(parse_or(&env, "CONCORD_SESSION_SWEEP_SECS", 60u64).max(1)),
        }
    }

    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse_or<F, T>(env: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match env(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has unparseable value '{}', using default", key, raw);
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    fn env_from_map(map: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key: &str| map.get(key).map(|v| v.to_string())
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::new()));

        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:3000");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.jwt_secret.len() >= 32);
        assert_eq!(cfg.db_path, PathBuf::from("concord.db"));
        assert_eq!(cfg.argon2_memory_kib, Params::DEFAULT_M_COST);
        assert_eq!(cfg.argon2_iterations, Params::DEFAULT_T_COST);
        assert_eq!(cfg.session_sweep_interval, Duration::from_secs(60));
    }

    #[test]
    fn reads_overrides() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("CONCORD_HOST", "127.0.0.1"),
            ("CONCORD_PORT", "8081"),
            ("CONCORD_JWT_SECRET", "production_secret_that_is_at_least_32_bytes"),
            ("CONCORD_DB_PATH", "/var/lib/concord/chat.db"),
            ("CONCORD_ARGON2_MEMORY_KIB", "65536"),
            ("CONCORD_ARGON2_ITERATIONS", "3"),
            ("CONCORD_SESSION_SWEEP_SECS", "5"),
        ])));

        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8081");
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/concord/chat.db"));
        assert_eq!(cfg.argon2_memory_kib, 65536);
        assert_eq!(cfg.argon2_iterations, 3);
        assert_eq!(cfg.session_sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn log_filter_has_its_own_lookup() {
        assert_eq!(
            log_filter_from_env_fn(env_from_map(HashMap::new())),
            "concord=debug,tower_http=debug"
        );
        assert_eq!(
            log_filter_from_env_fn(env_from_map(HashMap::from([("CONCORD_LOG", "info")]))),
            "info"
        );
    }

    /// Collects formatted log lines for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fallbacks_are_logged_once_a_subscriber_is_installed() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let cfg = tracing::subscriber::with_default(subscriber, || {
            ServerConfig::from_env_fn(env_from_map(HashMap::from([
                ("CONCORD_HOST", "not-an-ip"),
                ("CONCORD_ARGON2_ITERATIONS", "many"),
            ])))
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("CONCORD_HOST 'not-an-ip' is not an IP address"));
        assert!(output.contains("CONCORD_ARGON2_ITERATIONS has unparseable value 'many'"));
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.argon2_iterations, Params::DEFAULT_T_COST);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::from([
            ("CONCORD_PORT", "eighty"),
            ("CONCORD_SESSION_SWEEP_SECS", "0"),
        ])));

        assert_eq!(cfg.listen_addr.port(), 3000);
        assert_eq!(cfg.session_sweep_interval, Duration::from_secs(1));
    }
}
