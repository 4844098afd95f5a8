use std::time::Duration;

/// Default age after which an idle connection is considered stale.
pub const DEFAULT_CONN_LIFETIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Maximum number of connections leased out at the same time.
    pub max_open: usize,
    /// Idle connections at least this old are closed instead of reused.
    pub conn_lifetime: Duration,
    /// Logical database selected on every new connection.
    pub database: Option<u32>,
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Config {
            host: "127.0.0.1".to_string(),
            port: 6379,
            max_open: 10 * cpus,
            conn_lifetime: DEFAULT_CONN_LIFETIME,
            database: None,
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_args(args: &[String]) -> Self {
        let mut config = Config::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        if let Ok(p) = args[i + 1].parse() {
                            config.port = p;
                        }
                        i += 1;
                    }
                }
                "--max-open" => {
                    if i + 1 < args.len() {
                        if let Ok(n) = args[i + 1].parse::<usize>() {
                            if n > 0 {
                                config.max_open = n;
                            }
                        }
                        i += 1;
                    }
                }
                "--conn-lifetime" => {
                    if i + 1 < args.len() {
                        if let Ok(secs) = args[i + 1].parse() {
                            config.conn_lifetime = Duration::from_secs(secs);
                        }
                        i += 1;
                    }
                }
                "--db" | "-n" => {
                    if i + 1 < args.len() {
                        if let Ok(db) = args[i + 1].parse() {
                            config.database = Some(db);
                        }
                        i += 1;
                    }
                }
                "--loglevel" => {
                    if i + 1 < args.len() {
                        config.loglevel = args[i + 1].clone();
                        i += 1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        config
    }

    /// `host:port` as passed to the socket connect call. IPv6 literals are
    /// bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
