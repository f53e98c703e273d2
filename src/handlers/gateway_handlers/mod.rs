pub mod alerts;
pub mod buffer;
pub mod classify;
pub mod decode;
pub mod pipeline;
