#![no_main]
use libfuzzer_sys::fuzz_target;

use typeschema::{Describe, Field, Registry, Type, TypeRef, ValidateMode, Validator};

struct Pet;

impl Describe for Pet {
    fn describe() -> Type {
        Type::record("Pet")
            .field(Field::new::<String>("name").tag("minLength", "1").tag("pattern", "^[a-z]+$"))
            .field(Field::new::<u32>("age").tag("maximum", "100").tag("multipleOf", "2"))
            .field(Field::new::<Vec<String>>("tags").tag("uniqueItems", "true").optional())
            .field(Field::new::<String>("email").tag("format", "email").optional())
            .field(Field::new::<String>("id").tag("readOnly", "true").tag("format", "uuid"))
            .field(Field::new::<Vec<Pet>>("friends").optional())
    }
}

fuzz_target!(|data: &[u8]| {
    let registry = Registry::default();
    let schema = match registry.schema(TypeRef::of::<Pet>(), false, "") {
        Ok(Some(schema)) => schema,
        _ => return,
    };

    if let Ok(instance) = serde_json::from_slice(data) {
        let validator = Validator::new(&registry);
        let _ = validator.check(&schema, ValidateMode::ReadFromServer, &instance);
        let _ = validator.check(&schema, ValidateMode::WriteToServer, &instance);
    }
});
