use std::time::Duration;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub base_url: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,

    pub api_password: Option<String>,

    pub global_proxies: Vec<String>,
    pub transport_routes: Vec<TransportRoute>,

    pub recordings_dir: String,
    pub max_recording_duration: Duration,
    pub recordings_retention_days: i64,

    pub ffmpeg_path: String,
    pub ffmpeg_output_dir: String,

    pub log_level: String,
    pub log_json: bool,

    pub flaresolverr_url: Option<String>,
    pub flaresolverr_timeout: Duration,
}

/// URL-pattern specific transport routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportRoute {
    pub url_pattern: String,
    pub proxy: Option<String>,
    pub disable_ssl: bool,
    /// Bypass the global proxy and connect directly.
    pub direct: bool,
}

impl Config {
    /// Read configuration from the environment with defaults.
    pub fn load() -> Self {
        let port = env_u16("PORT", 7860);

        let mut global_proxies = env_list("GLOBAL_PROXIES");
        if global_proxies.is_empty() {
            // Legacy single proxy support
            if let Ok(proxy) = std::env::var("GLOBAL_PROXY") {
                if !proxy.is_empty() {
                    global_proxies.push(proxy);
                }
            }
        }

        Self {
            port,
            base_url: env_string("BASE_URL", &format!("http://localhost:{port}")),
            read_timeout: env_duration("READ_TIMEOUT", Duration::from_secs(30)),
            write_timeout: env_duration("WRITE_TIMEOUT", Duration::from_secs(120)),
            idle_timeout: env_duration("IDLE_TIMEOUT", Duration::from_secs(60)),
            api_password: std::env::var("API_PASSWORD").ok().filter(|p| !p.is_empty()),
            global_proxies,
            transport_routes: parse_transport_routes(
                &std::env::var("TRANSPORT_ROUTES").unwrap_or_default(),
            ),
            recordings_dir: env_string("RECORDINGS_DIR", "recordings"),
            max_recording_duration: env_duration(
                "MAX_RECORDING_DURATION",
                Duration::from_secs(8 * 3600),
            ),
            recordings_retention_days: env_i64("RECORDINGS_RETENTION_DAYS", 7),
            ffmpeg_path: env_string("FFMPEG_PATH", "ffmpeg"),
            ffmpeg_output_dir: env_string("FFMPEG_OUTPUT_DIR", "/tmp/nagare-streams"),
            log_level: env_string("LOG_LEVEL", "info"),
            log_json: env_bool("LOG_JSON", false),
            flaresolverr_url: std::env::var("FLARESOLVERR_URL")
                .ok()
                .filter(|u| !u.is_empty()),
            flaresolverr_timeout: env_duration("FLARESOLVERR_TIMEOUT", Duration::from_secs(60)),
        }
    }
}

/// Parse the TRANSPORT_ROUTES env var.
///
/// Format: `{URL=pattern, PROXY=url, DISABLE_SSL=true}, {URL=pattern2, DIRECT=true}`
pub fn parse_transport_routes(s: &str) -> Vec<TransportRoute> {
    let s = s.trim();
    if s.is_empty() {
        return Vec::new();
    }

    let mut routes = Vec::new();
    for part in s.split("}, {") {
        let part = part.trim_matches(|c: char| c == '{' || c == '}' || c.is_whitespace());
        if part.is_empty() {
            continue;
        }

        let mut route = TransportRoute::default();
        for field in part.split(", ") {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_uppercase().as_str() {
                "URL" => route.url_pattern = value.to_string(),
                "PROXY" => route.proxy = Some(value.to_string()),
                "DISABLE_SSL" => route.disable_ssl = value.eq_ignore_ascii_case("true"),
                "DIRECT" => route.direct = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }
        if !route.url_pattern.is_empty() {
            routes.push(route);
        }
    }

    routes
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.eq_ignore_ascii_case("true") || v == "1",
        _ => default,
    }
}

/// Durations accept plain seconds ("30") or suffixed forms ("30s", "5m", "8h").
fn env_duration(key: &str, default: Duration) -> Duration {
    let Ok(v) = std::env::var(key) else {
        return default;
    };
    parse_duration(&v).unwrap_or(default)
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let (num, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = num.trim().parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(n)),
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_routes_single() {
        let routes = parse_transport_routes("{URL=example.com, PROXY=socks5://127.0.0.1:1080}");
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].url_pattern, "example.com");
        assert_eq!(routes[0].proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert!(!routes[0].disable_ssl);
    }

    #[test]
    fn test_parse_transport_routes_multiple() {
        let routes = parse_transport_routes(
            "{URL=a.com, DISABLE_SSL=true}, {URL=b.com, DIRECT=true}, {URL=c.com, PROXY=http://p:8080}",
        );
        assert_eq!(routes.len(), 3);
        assert!(routes[0].disable_ssl);
        assert!(routes[1].direct);
        assert_eq!(routes[2].proxy.as_deref(), Some("http://p:8080"));
    }

    #[test]
    fn test_parse_transport_routes_skips_patternless() {
        let routes = parse_transport_routes("{PROXY=http://p:8080}");
        assert!(routes.is_empty());
    }

    #[test]
    fn test_parse_transport_routes_empty() {
        assert!(parse_transport_routes("").is_empty());
        assert!(parse_transport_routes("   ").is_empty());
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("8h"), Some(Duration::from_secs(28800)));
        assert_eq!(parse_duration("bogus"), None);
    }
}
