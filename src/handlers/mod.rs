pub mod api_handlers;
pub mod gateway_handlers;
