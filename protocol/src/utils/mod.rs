mod encoding;

pub use encoding::Encoding;
