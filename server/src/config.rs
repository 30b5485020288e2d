use std::env;
use std::str::FromStr;

/// Server configuration, read from `CANVAS_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Commands buffered for the room directory
    pub server_queue_capacity: usize,
    /// Commands buffered per room
    pub room_queue_capacity: usize,
    /// Events buffered per connection before new ones are dropped
    pub connection_queue_capacity: usize,
    /// Origins allowed to open a websocket. Empty means any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            server_queue_capacity: 64,
            room_queue_capacity: 64,
            connection_queue_capacity: 256,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        Self {
            bind_addr: lookup("CANVAS_BIND_ADDR").unwrap_or(default.bind_addr),
            server_queue_capacity: parse_capacity(
                &lookup,
                "CANVAS_SERVER_QUEUE",
                default.server_queue_capacity,
            ),
            room_queue_capacity: parse_capacity(
                &lookup,
                "CANVAS_ROOM_QUEUE",
                default.room_queue_capacity,
            ),
            connection_queue_capacity: parse_capacity(
                &lookup,
                "CANVAS_CONNECTION_QUEUE",
                default.connection_queue_capacity,
            ),
            allowed_origins: lookup("CANVAS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(default.allowed_origins),
        }
    }
}

fn parse_capacity<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| usize::from_str(v.trim())) {
        Some(Ok(value)) if value > 0 => value,
        Some(_) => {
            log::warn!("{} must be a positive integer; using {}", key, default);
            default
        }
        None => default,
    }
}
