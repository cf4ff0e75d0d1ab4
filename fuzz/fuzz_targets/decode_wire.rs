#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

use guestcall::codec;
use guestcall::schema::TypeDescriptor;

static DESCRIPTORS: Lazy<Vec<TypeDescriptor>> = Lazy::new(|| {
    [
        "int",
        "string",
        "array<int>",
        "array<array<string>>",
        "object<string,array<string>>",
        "object<int,object<string,int>>",
    ]
    .iter()
    .map(|s| s.parse().unwrap())
    .collect()
});

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must fail cleanly, never panic or over-allocate.
    for descriptor in DESCRIPTORS.iter() {
        if let Ok(value) = codec::decode(data, descriptor) {
            // Anything that decodes re-encodes to something that decodes the same.
            let bytes = codec::encode_to_vec(&value, descriptor).unwrap();
            assert_eq!(codec::decode(&bytes, descriptor).unwrap(), value);
        }
    }
});
