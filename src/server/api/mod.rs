pub mod anime_controller;
pub mod health_controller;
pub mod proxy_controller;
