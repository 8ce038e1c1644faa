use once_cell::sync::Lazy;
use std::env;

pub const PLATFORM: &str = "Shopee";

pub const AUTH_PARTNER_PATH: &str = "/api/v2/shop/auth_partner";
pub const TOKEN_GET_PATH: &str = "/api/v2/auth/token/get";
pub const ACCESS_TOKEN_GET_PATH: &str = "/api/v2/auth/access_token/get";
pub const SHOP_INFO_PATH: &str = "/api/v2/shop/get_shop_info";
pub const ORDER_LIST_PATH: &str = "/api/v2/order/get_order_list";
pub const ORDER_DETAIL_PATH: &str = "/api/v2/order/get_order_detail";

pub static SHOPEE_HOST: Lazy<String> = Lazy::new(|| {
    env::var("SHOPEE_HOST")
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "https://partner.shopeemobile.com".to_string())
});

/// Externally reachable base URL of this service, used for the OAuth redirect.
pub static PUBLIC_BASE_URL: Lazy<String> = Lazy::new(|| {
    env::var("PUBLIC_BASE_URL")
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "http://localhost:8000".to_string())
});

pub static SETTINGS_REDIRECT_PATH: Lazy<String> = Lazy::new(|| {
    env::var("SETTINGS_REDIRECT_PATH").unwrap_or_else(|_| "/app/marketplace-settings".to_string())
});

pub static CALLBACK_URL: Lazy<String> = Lazy::new(|| format!("{}/auth_callback", *PUBLIC_BASE_URL));
