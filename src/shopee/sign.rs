use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature plus the timestamp it was computed for. Both travel together in
/// the query string of every partner API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub sign: String,
    pub timestamp: i64,
}

/// Build the string Shopee expects to be signed.
///
/// - `partner_id + path + timestamp` for public calls
/// - `+ shop_id` when only a shop id is given (refresh flow)
/// - `+ access_token + shop_id` when both are given (shop-level calls)
pub fn base_string(
    partner_id: u64,
    path: &str,
    timestamp: i64,
    access_token: Option<&str>,
    shop_id: Option<u64>,
) -> String {
    let mut base = format!("{partner_id}{path}{timestamp}");
    match (access_token, shop_id) {
        (Some(token), Some(shop)) => {
            base.push_str(token);
            base.push_str(&shop.to_string());
        }
        (None, Some(shop)) => base.push_str(&shop.to_string()),
        _ => {}
    }
    base
}

pub fn sign_at(
    path: &str,
    partner_id: u64,
    api_key: &str,
    access_token: Option<&str>,
    shop_id: Option<u64>,
    timestamp: i64,
) -> Signature {
    let base = base_string(partner_id, path, timestamp, access_token, shop_id);
    // HMAC accepts keys of any length, including empty ones.
    let mut mac = match HmacSha256::new_from_slice(api_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key of any length is valid"),
    };
    mac.update(base.as_bytes());
    Signature {
        sign: hex::encode(mac.finalize().into_bytes()),
        timestamp,
    }
}

pub fn sign(
    path: &str,
    partner_id: u64,
    api_key: &str,
    access_token: Option<&str>,
    shop_id: Option<u64>,
) -> Signature {
    sign_at(
        path,
        partner_id,
        api_key,
        access_token,
        shop_id,
        Utc::now().timestamp(),
    )
}
