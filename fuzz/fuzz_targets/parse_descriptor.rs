#![no_main]

use libfuzzer_sys::fuzz_target;

use guestcall::schema::TypeDescriptor;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Whatever parses renders to a canonical form that parses back to itself.
    if let Ok(descriptor) = text.parse::<TypeDescriptor>() {
        let rendered = descriptor.render();
        assert_eq!(rendered.parse::<TypeDescriptor>().unwrap(), descriptor);
    }
});
