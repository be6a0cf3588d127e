pub mod app_handlers;
pub mod health_handlers;
pub mod proxy_handlers;
