pub mod playback;
pub mod record;
