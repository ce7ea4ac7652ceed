use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Worker configuration loaded from environment variables.
///
/// Everything except `DATABASE_URL` has a default suitable for local
/// development next to a ComfyUI instance on the same machine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgreSQL connection string (required).
    pub database_url: String,
    /// Connection pool size (default: `5`).
    pub database_max_connections: u32,
    /// ComfyUI base URL (default: `http://127.0.0.1:8188`).
    pub comfyui_api_url: String,
    /// ComfyUI's output directory as mounted on this host.
    pub comfyui_output_dir: PathBuf,
    /// Timeout for every ComfyUI call except the health probe.
    pub comfyui_timeout: Duration,
    /// Timeout for the health probe; kept short so ticks fail fast.
    pub comfyui_health_timeout: Duration,
    /// Root of the `<user>/<request>/` output layout.
    pub storage_root: PathBuf,
    /// Maximum number of requests processing at once (default: `2`).
    pub max_concurrent_generations: usize,
    /// Period of the pending-submission loop.
    pub pending_poll_interval: Duration,
    /// Period of the processing-sync loop.
    pub sync_poll_interval: Duration,
    /// How long a request may stay processing before it is cancelled and
    /// failed. Unset disables the limit.
    pub processing_timeout: Option<Duration>,
    /// Longest edge of generated thumbnails in pixels (default: `256`).
    pub thumbnail_max_edge: u32,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                  |
    /// |-------------------------------|--------------------------|
    /// | `DATABASE_URL`                | required                 |
    /// | `DATABASE_MAX_CONNECTIONS`    | `5`                      |
    /// | `COMFYUI_API_URL`             | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_OUTPUT_DIR`          | `./comfyui/output`       |
    /// | `COMFYUI_TIMEOUT_SECS`        | `30`                     |
    /// | `COMFYUI_HEALTH_TIMEOUT_SECS` | `5`                      |
    /// | `STORAGE_ROOT`                | `./storage/generations`  |
    /// | `MAX_CONCURRENT_GENERATIONS`  | `2`                      |
    /// | `PENDING_POLL_INTERVAL_SECS`  | `2`                      |
    /// | `SYNC_POLL_INTERVAL_SECS`     | `3`                      |
    /// | `PROCESSING_TIMEOUT_SECS`     | unset (no limit)         |
    /// | `THUMBNAIL_MAX_EDGE`          | `256`                    |
    ///
    /// # Panics
    ///
    /// If `DATABASE_URL` is missing, or a numeric variable does not parse
    /// or is zero.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").expect("DATABASE_URL must be set");

        let string = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.into());

        Self {
            database_url,
            database_max_connections: positive(&lookup, "DATABASE_MAX_CONNECTIONS", 5),
            comfyui_api_url: string("COMFYUI_API_URL", "http://127.0.0.1:8188"),
            comfyui_output_dir: string("COMFYUI_OUTPUT_DIR", "./comfyui/output").into(),
            comfyui_timeout: seconds(&lookup, "COMFYUI_TIMEOUT_SECS", 30),
            comfyui_health_timeout: seconds(&lookup, "COMFYUI_HEALTH_TIMEOUT_SECS", 5),
            storage_root: string("STORAGE_ROOT", "./storage/generations").into(),
            max_concurrent_generations: positive(&lookup, "MAX_CONCURRENT_GENERATIONS", 2),
            pending_poll_interval: seconds(&lookup, "PENDING_POLL_INTERVAL_SECS", 2),
            sync_poll_interval: seconds(&lookup, "SYNC_POLL_INTERVAL_SECS", 3),
            processing_timeout: lookup("PROCESSING_TIMEOUT_SECS")
                .is_some()
                .then(|| seconds(&lookup, "PROCESSING_TIMEOUT_SECS", 0)),
            thumbnail_max_edge: positive(&lookup, "THUMBNAIL_MAX_EDGE", 256),
        }
    }
}

fn parse<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        None => default,
    }
}

/// Like [`parse`], but zero is rejected as well.
fn positive<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    let value = parse(lookup, name, default);
    if value == T::default() {
        panic!("{name} must be greater than zero");
    }
    value
}

fn seconds<F>(lookup: &F, name: &str, default: u64) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    Duration::from_secs(positive(lookup, name, default))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/atelier")]);

        assert_eq!(config.database_url, "postgres://localhost/atelier");
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.comfyui_api_url, "http://127.0.0.1:8188");
        assert_eq!(config.comfyui_output_dir, PathBuf::from("./comfyui/output"));
        assert_eq!(config.comfyui_timeout, Duration::from_secs(30));
        assert_eq!(config.comfyui_health_timeout, Duration::from_secs(5));
        assert_eq!(config.storage_root, PathBuf::from("./storage/generations"));
        assert_eq!(config.max_concurrent_generations, 2);
        assert_eq!(config.pending_poll_interval, Duration::from_secs(2));
        assert_eq!(config.sync_poll_interval, Duration::from_secs(3));
        assert_eq!(config.processing_timeout, None);
        assert_eq!(config.thumbnail_max_edge, 256);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("DATABASE_URL", "postgres://db/atelier"),
            ("COMFYUI_API_URL", "http://gpu-1:8188"),
            ("MAX_CONCURRENT_GENERATIONS", " 4 "),
            ("SYNC_POLL_INTERVAL_SECS", "10"),
            ("THUMBNAIL_MAX_EDGE", "512"),
            ("PROCESSING_TIMEOUT_SECS", "900"),
        ]);

        assert_eq!(config.comfyui_api_url, "http://gpu-1:8188");
        assert_eq!(config.max_concurrent_generations, 4);
        assert_eq!(config.sync_poll_interval, Duration::from_secs(10));
        assert_eq!(config.thumbnail_max_edge, 512);
        assert_eq!(config.processing_timeout, Some(Duration::from_secs(900)));
    }

    #[test]
    #[should_panic(expected = "DATABASE_URL must be set")]
    fn database_url_is_required() {
        config(&[]);
    }

    #[test]
    #[should_panic(expected = "MAX_CONCURRENT_GENERATIONS must be a valid")]
    fn invalid_number_names_the_variable() {
        config(&[
            ("DATABASE_URL", "postgres://db/atelier"),
            ("MAX_CONCURRENT_GENERATIONS", "lots"),
        ]);
    }

    #[test]
    #[should_panic(expected = "SYNC_POLL_INTERVAL_SECS must be greater than zero")]
    fn zero_interval_is_rejected() {
        config(&[
            ("DATABASE_URL", "postgres://db/atelier"),
            ("SYNC_POLL_INTERVAL_SECS", "0"),
        ]);
    }

    #[test]
    #[should_panic(expected = "MAX_CONCURRENT_GENERATIONS must be greater than zero")]
    fn zero_concurrency_is_rejected() {
        config(&[
            ("DATABASE_URL", "postgres://db/atelier"),
            ("MAX_CONCURRENT_GENERATIONS", "0"),
        ]);
    }

    #[test]
    #[should_panic(expected = "PROCESSING_TIMEOUT_SECS must be greater than zero")]
    fn zero_processing_timeout_is_rejected() {
        config(&[
            ("DATABASE_URL", "postgres://db/atelier"),
            ("PROCESSING_TIMEOUT_SECS", "0"),
        ]);
    }
}
