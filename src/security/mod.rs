//! 安全模块
//!
//! 屏幕捕获授权 token 的签发与校验

pub mod grant;

pub use grant::{GrantAuthority, DEFAULT_GRANT_TTL};
