pub mod auth;
pub mod client;
pub mod config;
pub mod orders;
pub mod shop;
pub mod sign;

pub use auth::TokenGrant;
pub use client::{ShopeeClient, ShopeeError};
pub use orders::{MarketOrder, OrderItem, OrderList, TimeWindow};
pub use shop::ShopProfile;
