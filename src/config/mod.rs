use std::env;

/// Upload coordinator configuration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum declared file size in bytes (default: 1 GB)
    pub max_file_size: i64,

    /// Chunk size the client is expected to slice at, in bytes (default: 5 MB)
    pub chunk_size: i64,

    /// Session lease in seconds; sessions are unreachable after this (default: 1h)
    pub session_ttl_secs: i64,

    /// Expiry of issued per-part write targets in seconds (default: 1h)
    pub target_expiry_secs: u64,

    /// Sweep interval of the expired-session reaper in seconds (default: 15m)
    pub reaper_interval_secs: u64,

    /// JWT secret key (required in production)
    pub jwt_secret: String,

    /// Allowed CORS origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            chunk_size: 5 * 1024 * 1024,       // 5 MB
            session_ttl_secs: 3600,
            target_expiry_secs: 3600,
            reaper_interval_secs: 900,
            jwt_secret: "secret".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            chunk_size: env::var("CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.chunk_size),

            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.session_ttl_secs),

            target_expiry_secs: env::var("TARGET_EXPIRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.target_expiry_secs),

            reaper_interval_secs: env::var("REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.reaper_interval_secs),

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string()),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (relaxed limits, short sweeps)
    pub fn development() -> Self {
        Self {
            reaper_interval_secs: 60,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert_eq!(config.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.session_ttl_secs, 3600);
    }

    #[test]
    fn test_development_config() {
        let config = UploadConfig::development();
        assert_eq!(config.reaper_interval_secs, 60);
        assert_eq!(config.target_expiry_secs, 3600);
    }

    #[test]
    fn test_from_env_cors_fallback() {
        unsafe { env::remove_var("ALLOWED_ORIGINS") };
        let config = UploadConfig::from_env();
        let default_config = UploadConfig::default();
        assert_eq!(config.allowed_origins, default_config.allowed_origins);
        assert!(!config.allowed_origins.contains(&"*".to_string()));
    }
}
