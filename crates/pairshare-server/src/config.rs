use std::env;

use crate::capture::AmountPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub sqlite_path: String,
    pub image_dir: String,
    pub capture_dir: String,
    pub cors_origin: String,
    pub amount_policy: AmountPolicy,
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
    pub draft_idle_secs: u64,
    pub max_drafts: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .expect("SERVER_PORT must be a valid port number"),
            sqlite_path: env::var("SQLITE_PATH")
                .unwrap_or_else(|_| "./data/pairshare.db".to_string()),
            image_dir: env::var("IMAGE_DIR")
                .unwrap_or_else(|_| "./data/images".to_string()),
            capture_dir: env::var("CAPTURE_DIR")
                .unwrap_or_else(|_| "./data/captures".to_string()),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            amount_policy: env::var("AMOUNT_POLICY")
                .unwrap_or_else(|_| "any".to_string())
                .parse()
                .expect("AMOUNT_POLICY must be one of: any, non_negative, positive"),
            jpeg_quality: env::var("JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse::<u8>().ok())
                .unwrap_or(90)
                .clamp(1, 100),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20 * 1024 * 1024),
            draft_idle_secs: env::var("DRAFT_IDLE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60 * 60),
            max_drafts: env::var("MAX_DRAFTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
        }
    }
}
