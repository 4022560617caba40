use encoding::{DecoderTrap, EncoderTrap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Text encodings a managed server may use on its standard streams.
///
/// Only byte-oriented encodings are listed: the daemon splits output on
/// `\n` bytes before decoding, which is not valid for UTF-16.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    ASCII,
    #[default]
    UTF8,
    GBK,
    GB18030,
    BIG5_2003,
    WINDOWS_1252,
}

fn map_encoding(encoding: &Encoding) -> encoding::EncodingRef {
    match encoding {
        Encoding::ASCII => encoding::all::ASCII,
        Encoding::UTF8 => encoding::all::UTF_8,
        Encoding::GBK => encoding::all::GBK,
        Encoding::GB18030 => encoding::all::GB18030,
        Encoding::BIG5_2003 => encoding::all::BIG5_2003,
        Encoding::WINDOWS_1252 => encoding::all::WINDOWS_1252,
    }
}

static STR2ENCODING_MAP: LazyLock<HashMap<&'static str, Encoding>> = LazyLock::new(|| {
    [
        Encoding::ASCII,
        Encoding::UTF8,
        Encoding::GBK,
        Encoding::GB18030,
        Encoding::BIG5_2003,
        Encoding::WINDOWS_1252,
    ]
    .into_iter()
    .map(|encoding| (encoding.get().name(), encoding))
    .collect()
});

impl Encoding {
    pub fn get(&self) -> encoding::EncodingRef {
        map_encoding(self)
    }

    /// Decodes raw bytes, replacing anything malformed.
    pub fn decode(&self, bytes: &[u8]) -> String {
        self.get()
            .decode(bytes, DecoderTrap::Replace)
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Encodes text, replacing characters the encoding cannot represent.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        self.get()
            .encode(text, EncoderTrap::Replace)
            .unwrap_or_else(|_| text.as_bytes().to_vec())
    }
}

impl Serialize for Encoding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.get().name())
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoding_name = String::deserialize(deserializer)?;
        STR2ENCODING_MAP
            .get(encoding_name.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| serde::de::Error::custom(format!("Unknown encoding: {}", encoding_name)))
    }
}
