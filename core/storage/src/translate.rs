//! Logical to physical path and payload translation.
//!
//! A v1 mount stores, reads and lists at the logical path. A v2 mount
//! keeps values under `<mount>/data/<rest>` wrapped as `{"data": value}`
//! and lists under `<mount>/metadata/<rest>`.

use vsync_common::{EngineVersion, Error, Result, SecretPath, SecretValue, Value, SEPARATOR};

use crate::mounts::ResolvedMount;

/// Key wrapping the value in a v2 payload.
pub const DATA_KEY: &str = "data";

/// Store operation a physical path is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    List,
    Delete,
}

impl Operation {
    /// Segment a v2 mount inserts after its prefix.
    fn v2_segment(self) -> &'static str {
        match self {
            Operation::Read | Operation::Write | Operation::Delete => "data",
            Operation::List => "metadata",
        }
    }
}

/// Produce the physical path for an operation on a logical path.
pub fn translate(path: &SecretPath, mount: &ResolvedMount, operation: Operation) -> SecretPath {
    if !mount.version.is_v2() {
        return path.clone();
    }
    let Some(prefix) = mount.prefix.as_deref() else {
        return path.clone();
    };

    let relative = path.relative();
    let rest = match relative.strip_prefix(prefix) {
        Some(rest) => rest,
        None if relative == prefix.trim_end_matches(SEPARATOR) => "",
        None => return path.clone(),
    };
    let lead = if path.is_absolute() { "/" } else { "" };

    SecretPath::new(format!(
        "{}{}{}{}{}",
        lead,
        prefix,
        operation.v2_segment(),
        SEPARATOR,
        rest
    ))
}

/// Shape a value into the payload a mount expects.
pub fn wrap_for_write(value: &SecretValue, version: EngineVersion) -> SecretValue {
    if version.is_v2() {
        let mut payload = SecretValue::new();
        payload.insert(DATA_KEY, Value::from(value.clone()));
        payload
    } else {
        value.clone()
    }
}

/// Extract the value from a payload read back from a mount.
///
/// Returns `Ok(None)` for a v2 payload whose `data` is null, which the
/// backend reports for soft-deleted secrets.
///
/// # Errors
/// - `Serialization` if a v2 payload has no `data` mapping
pub fn unwrap_for_read(mut payload: SecretValue, version: EngineVersion) -> Result<Option<SecretValue>> {
    if !version.is_v2() {
        return Ok(Some(payload));
    }
    match payload.remove(DATA_KEY) {
        Some(Value::Map(map)) => Ok(Some(SecretValue::from(map))),
        Some(Value::Null) => Ok(None),
        Some(_) => Err(Error::Serialization(
            "kv v2 payload field `data` is not a mapping".to_string(),
        )),
        None => Err(Error::Serialization(
            "kv v2 payload has no `data` field".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v2(prefix: &str) -> ResolvedMount {
        ResolvedMount {
            prefix: Some(prefix.to_string()),
            version: EngineVersion::V2,
        }
    }

    fn v1(prefix: &str) -> ResolvedMount {
        ResolvedMount {
            prefix: Some(prefix.to_string()),
            version: EngineVersion::V1,
        }
    }

    #[test]
    fn test_translate_v1_is_identity() {
        let path = SecretPath::new("/secret/app/db");
        for op in [Operation::Read, Operation::Write, Operation::List, Operation::Delete] {
            assert_eq!(translate(&path, &v1("secret/"), op), path);
            assert_eq!(translate(&path, &ResolvedMount::unresolved(), op), path);
        }
    }

    #[test]
    fn test_translate_v2_inserts_segment() {
        let path = SecretPath::new("/secret/app/db");
        let mount = v2("secret/");
        assert_eq!(translate(&path, &mount, Operation::Read).as_str(), "/secret/data/app/db");
        assert_eq!(translate(&path, &mount, Operation::Write).as_str(), "/secret/data/app/db");
        assert_eq!(translate(&path, &mount, Operation::Delete).as_str(), "/secret/data/app/db");

        let folder = SecretPath::new("secret/app/");
        assert_eq!(translate(&folder, &mount, Operation::List).as_str(), "secret/metadata/app/");
    }

    #[test]
    fn test_translate_v2_mount_root() {
        let mount = v2("secret/");
        assert_eq!(
            translate(&SecretPath::new("/secret"), &mount, Operation::List).as_str(),
            "/secret/metadata/"
        );
        assert_eq!(
            translate(&SecretPath::new("secret/"), &mount, Operation::List).as_str(),
            "secret/metadata/"
        );
    }

    #[test]
    fn test_translate_v2_nested_mount() {
        let mount = v2("team/a/");
        assert_eq!(
            translate(&SecretPath::new("team/a/svc/key"), &mount, Operation::Read).as_str(),
            "team/a/data/svc/key"
        );
    }

    #[test]
    fn test_wrap_for_write() {
        let value: SecretValue = vec![("user", "a")].into_iter().collect();
        assert_eq!(wrap_for_write(&value, EngineVersion::V1), value);
        assert_eq!(wrap_for_write(&value, EngineVersion::Unknown), value);

        let payload = wrap_for_write(&value, EngineVersion::V2);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get(DATA_KEY), Some(&Value::from(value)));
    }

    #[test]
    fn test_unwrap_soft_deleted() {
        let mut payload = SecretValue::new();
        payload.insert(DATA_KEY, Value::Null);
        payload.insert("metadata", Value::Map(Default::default()));
        assert_eq!(unwrap_for_read(payload, EngineVersion::V2).unwrap(), None);
    }

    #[test]
    fn test_unwrap_malformed() {
        let payload: SecretValue = vec![("user", "a")].into_iter().collect();
        assert!(unwrap_for_read(payload.clone(), EngineVersion::V2).is_err());
        assert_eq!(
            unwrap_for_read(payload.clone(), EngineVersion::V1).unwrap(),
            Some(payload)
        );

        let mut scalar = SecretValue::new();
        scalar.insert(DATA_KEY, "text");
        assert!(unwrap_for_read(scalar, EngineVersion::V2).is_err());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            ((i64::MAX as u64 + 1)..=u64::MAX).prop_map(Value::Unsigned),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::Float),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_v2_wrap_unwrap_round_trip(
            map in prop::collection::btree_map("[a-z_]{1,8}", arb_value(), 0..6)
        ) {
            let value = SecretValue::from(map);
            let payload = wrap_for_write(&value, EngineVersion::V2);
            let back = unwrap_for_read(payload, EngineVersion::V2).unwrap();
            prop_assert_eq!(back, Some(value));
        }

        #[test]
        fn prop_v2_payload_survives_json(
            map in prop::collection::btree_map("[a-z_]{1,8}", arb_value(), 0..6)
        ) {
            let value = SecretValue::from(map);
            let json = wrap_for_write(&value, EngineVersion::V2).to_json();
            let payload = SecretValue::from_json(json).unwrap();
            let back = unwrap_for_read(payload, EngineVersion::V2).unwrap();
            prop_assert_eq!(back, Some(value));
        }
    }
}
