pub mod double_buffer;
pub mod prefetch;
