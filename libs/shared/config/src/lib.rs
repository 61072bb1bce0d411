use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub realtime_app_id: String,
    pub realtime_api_token: String,
    pub realtime_base_url: String,
    pub redis_url: Option<String>,
    pub slot_lock_ttl_seconds: u64,
    pub slot_lock_max_attempts: u32,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            realtime_app_id: env::var("REALTIME_APP_ID")
                .unwrap_or_else(|_| {
                    warn!("REALTIME_APP_ID not set, video consultations disabled");
                    String::new()
                }),
            realtime_api_token: env::var("REALTIME_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("REALTIME_API_TOKEN not set, video consultations disabled");
                    String::new()
                }),
            realtime_base_url: env::var("REALTIME_BASE_URL")
                .unwrap_or_else(|_| "https://rtc.live.cloudflare.com/v1".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            slot_lock_ttl_seconds: parse_or("SLOT_LOCK_TTL_SECONDS", 30),
            slot_lock_max_attempts: parse_or("SLOT_LOCK_MAX_ATTEMPTS", 5),
            server_port: parse_or("SERVER_PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_video_configured(&self) -> bool {
        !self.realtime_app_id.is_empty()
            && !self.realtime_api_token.is_empty()
            && !self.realtime_base_url.is_empty()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            realtime_app_id: String::new(),
            realtime_api_token: String::new(),
            realtime_base_url: "https://rtc.live.cloudflare.com/v1".to_string(),
            redis_url: None,
            slot_lock_ttl_seconds: 30,
            slot_lock_max_attempts: 5,
            server_port: 3000,
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
