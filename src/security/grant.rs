//! 捕获授权
//!
//! 平台授权流程签发的 token 格式为 `<unix 时间戳>.<HMAC-SHA256 十六进制>`，
//! 超过有效期或签名不符即视为无效

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// 授权 token 默认有效期 (秒)
pub const DEFAULT_GRANT_TTL: u64 = 300;

/// 密钥环境变量
pub const GRANT_SECRET_ENV: &str = "SCREENMIRROR_GRANT_SECRET";

/// 捕获授权签发/校验器
#[derive(Clone)]
pub struct GrantAuthority {
    secret: String,
    ttl: u64,
}

impl GrantAuthority {
    /// 从共享密钥创建
    pub fn new(secret: String, ttl: u64) -> Self {
        Self { secret, ttl }
    }

    /// 使用随机密钥创建 (仅本进程内有效)
    pub fn generate(ttl: u64) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(hex::encode(bytes), ttl)
    }

    /// 从环境变量创建
    ///
    /// 环境变量: `SCREENMIRROR_GRANT_SECRET`
    pub fn from_env(ttl: u64) -> Result<Self> {
        let secret = std::env::var(GRANT_SECRET_ENV)
            .map_err(|_| anyhow!("{} 环境变量未设置", GRANT_SECRET_ENV))?;
        Ok(Self::new(secret, ttl))
    }

    /// 有效期 (秒)
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    /// 签发当前时间的授权 token
    pub fn issue(&self) -> String {
        self.issue_at(Self::current_timestamp())
    }

    /// 签发指定时间的授权 token
    pub fn issue_at(&self, timestamp: u64) -> String {
        format!("{}.{}", timestamp, self.sign(timestamp))
    }

    /// 校验授权 token
    pub fn verify(&self, token: &str) -> bool {
        let Some((ts, mac)) = token.split_once('.') else {
            return false;
        };
        let Ok(timestamp) = ts.parse::<u64>() else {
            return false;
        };

        let now = Self::current_timestamp();
        if timestamp > now || now.saturating_sub(timestamp) > self.ttl {
            return false;
        }

        constant_time_eq(&self.sign(timestamp), mac)
    }

    fn sign(&self, timestamp: u64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("capture:{}", timestamp).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// 当前 Unix 时间戳 (秒)
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for GrantAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantAuthority")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// 常量时间比较，防止时序攻击
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
