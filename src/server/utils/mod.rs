pub mod encoding_utils;
pub mod identity_utils;
pub mod m3u8_utils;
pub mod script_utils;
pub mod source_utils;
