#![no_main]

use libfuzzer_sys::fuzz_target;
use pagestream_core::{HeaderDefinition, StreamBlobHeader};

fuzz_target!(|data: &[u8]| {
    // Fuzz the fixed-format descriptor codec and header deserialization.
    // Tests handling of:
    // - Arbitrary metadata strings (bad base64, wrong lengths)
    // - Torn header pages (zeros, truncated JSON, noise)
    // - Extreme offset/size values

    // Descriptor decoding from arbitrary metadata strings
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(def) = HeaderDefinition::decode(text) {
            // Anything that decodes must survive re-encoding unchanged
            assert_eq!(HeaderDefinition::decode(&def.encode()).unwrap(), def);
        }
    }

    // Header deserialization over raw bytes, as the resolver sees them
    let _ = serde_json::from_slice::<StreamBlobHeader>(data);

    // Encode side: any offset/size pair round-trips
    if data.len() >= 12 {
        let offset = u64::from_le_bytes(data[0..8].try_into().unwrap());
        let size = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let def = HeaderDefinition::new(offset, size);
        assert_eq!(HeaderDefinition::decode(&def.encode()).unwrap(), def);
    }
});
