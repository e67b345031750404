//! 模块自持令牌编码
//!
//! 注册表每次附着描述符时签发一枚自持令牌。令牌值由本次注册的
//! 领域数据派生：模块规范名、签发时刻和进程内签发序号。同名模块
//! 重载后拿到的是新令牌，卸载前的旧令牌不会与之混淆。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 令牌长度（62^12 > 2^64，足以编码完整的 64 位摘要）
const TOKEN_LENGTH: usize = 12;

/// 进程内签发序号（同一毫秒内的两次注册靠它区分）
static ISSUE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// FNV-1a 偏移基准
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 素数
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 把一段字节折叠进 FNV-1a 摘要
fn fnv1a_fold(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 把 64 位值编码为定宽 62 进制字符串，高位在前
fn encode_base62(mut value: u64) -> String {
    let mut digits = [b'0'; TOKEN_LENGTH];
    for slot in digits.iter_mut().rev() {
        *slot = BASE62_CHARS[(value % 62) as usize];
        value /= 62;
    }
    digits.iter().map(|&b| b as char).collect()
}

/// 为一次注册签发令牌
///
/// 摘要依次折叠规范名、签发时刻（毫秒）和进程内签发序号，
/// 再编码为 12 位 62 进制字符串。
///
/// # Arguments
///
/// * `name` - 模块规范名
///
/// # Example
///
/// ```
/// use lbbs_core::utils::id::issue_token;
///
/// let token = issue_token("mod_chanserv");
/// assert_eq!(token.len(), 12);
/// // 同名模块再次注册得到不同令牌
/// assert_ne!(token, issue_token("mod_chanserv"));
/// ```
pub fn issue_token(name: &str) -> String {
    let seq = ISSUE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let mut digest = fnv1a_fold(FNV_OFFSET, name.as_bytes());
    digest = fnv1a_fold(digest, &millis.to_be_bytes());
    digest = fnv1a_fold(digest, &seq.to_be_bytes());

    encode_base62(digest)
}

/// 验证令牌格式是否有效
///
/// # Arguments
///
/// * `token` - 要验证的令牌字符串
///
/// # Returns
///
/// 如果令牌格式有效返回 `true`
pub fn is_valid_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issue_token_length_and_charset() {
        let token = issue_token("mod_chanserv");
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_same_name_distinct_tokens() {
        // 同名模块的每次注册（如重载）都拿到新令牌
        let mut tokens = HashSet::new();
        for _ in 0..1000 {
            assert!(tokens.insert(issue_token("net_smtp")), "令牌发生碰撞");
        }
    }

    #[test]
    fn test_different_names_distinct_tokens() {
        let a = issue_token("net_smtp");
        let b = issue_token("net_imap");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fnv1a_fold_order_sensitive() {
        // 折叠顺序参与摘要：名字不同段次序不可交换
        let ab = fnv1a_fold(fnv1a_fold(FNV_OFFSET, b"mod_a"), b"mod_b");
        let ba = fnv1a_fold(fnv1a_fold(FNV_OFFSET, b"mod_b"), b"mod_a");
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_encode_base62_fixed_width() {
        assert_eq!(encode_base62(0).len(), TOKEN_LENGTH);
        assert_eq!(encode_base62(0), "000000000000");
        assert_eq!(encode_base62(u64::MAX).len(), TOKEN_LENGTH);
        assert_eq!(encode_base62(61).chars().last(), Some('Z'));
    }

    #[test]
    fn test_is_valid_token() {
        // 有效令牌
        assert!(is_valid_token(&issue_token("mod_a")));
        assert!(is_valid_token("000000000000"));

        // 无效令牌 - 长度错误
        assert!(!is_valid_token("short"));
        assert!(!is_valid_token(""));

        // 无效令牌 - 包含非法字符
        assert!(!is_valid_token("a1B2c3D4e5f!"));
        assert!(!is_valid_token("a1B2c3-4e5f6"));
    }
}
