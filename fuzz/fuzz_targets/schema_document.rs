#![no_main]
use libfuzzer_sys::fuzz_target;

use typeschema::{Registry, Schema, ValidateMode, Validator};

fuzz_target!(|data: (Vec<u8>, Vec<u8>)| {
    let mut schema: Schema = match serde_json::from_slice(&data.0) {
        Ok(schema) => schema,
        Err(_) => return,
    };

    // We're only interested in fuzzing against well-formed schemas.
    if schema.precompute_messages().is_err() {
        return;
    }

    if let Ok(instance) = serde_json::from_slice(&data.1) {
        let registry = Registry::default();
        let validator = Validator::new(&registry);
        let _ = validator.check(&schema, ValidateMode::ReadFromServer, &instance);
        let _ = validator.check(&schema, ValidateMode::WriteToServer, &instance);
    }
});
