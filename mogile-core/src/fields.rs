//! Counted-field lists in tracker responses.
//!
//! List-style responses carry a count field followed by indexed item fields,
//! numbered from 1: `paths=2&path1=..&path2=..`, `domains=1&domain1=..`,
//! `key_count=3&key_1=..`. All list decoding goes through [`count`] so the
//! bounds handling is the same everywhere.

use crate::protocol::Fields;

/// Error decoding response fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("missing field {0:?}")]
    Missing(String),
    #[error("field {key:?} is not a count: {value:?}")]
    BadCount { key: String, value: String },
}

/// Number of items in a counted list.
///
/// When `count_key` is present it must parse as an unsigned integer and every
/// item `1..=count` must exist. When it is absent, items are counted by probing
/// `item_key(1)`, `item_key(2)`, .. until the first gap.
pub fn count(
    fields: &Fields,
    count_key: &str,
    item_key: impl Fn(usize) -> String,
) -> Result<usize, FieldError> {
    let Some(raw) = fields.get(count_key) else {
        return Ok((1..)
            .take_while(|&i| fields.contains_key(&item_key(i)))
            .count());
    };
    let n = raw.trim().parse::<usize>().map_err(|_| FieldError::BadCount {
        key: count_key.to_string(),
        value: raw.clone(),
    })?;
    if let Some(gap) = (1..=n).map(&item_key).find(|k| !fields.contains_key(k)) {
        return Err(FieldError::Missing(gap));
    }
    Ok(n)
}

/// Values of a counted list, in index order.
pub fn counted_values(
    fields: &Fields,
    count_key: &str,
    item_key: impl Fn(usize) -> String,
) -> Result<Vec<String>, FieldError> {
    let n = count(fields, count_key, &item_key)?;
    (1..=n).map(|i| required(fields, &item_key(i)).map(str::to_string)).collect()
}

/// A field that must be present.
pub fn required<'a>(fields: &'a Fields, key: &str) -> Result<&'a str, FieldError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| FieldError::Missing(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_fields;

    fn path_key(i: usize) -> String {
        format!("path{i}")
    }

    #[test]
    fn counted_in_index_order() {
        let f = decode_fields("paths=2&path2=b&path1=a");
        assert_eq!(counted_values(&f, "paths", path_key).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn zero_count_is_empty() {
        let f = decode_fields("paths=0");
        assert!(counted_values(&f, "paths", path_key).unwrap().is_empty());
    }

    #[test]
    fn missing_count_scans_items() {
        let f = decode_fields("path=1&path1=http%3A%2F%2Fh%2Fx.fid&path3=ignored");
        assert_eq!(
            counted_values(&f, "paths", path_key).unwrap(),
            vec!["http://h/x.fid"]
        );
        assert_eq!(count(&Fields::new(), "paths", path_key).unwrap(), 0);
    }

    #[test]
    fn missing_item_is_error() {
        let f = decode_fields("paths=2&path1=a");
        assert_eq!(
            counted_values(&f, "paths", path_key),
            Err(FieldError::Missing("path2".into()))
        );
    }

    #[test]
    fn bad_count_is_error() {
        let f = decode_fields("paths=two&path1=a");
        assert!(matches!(
            count(&f, "paths", path_key),
            Err(FieldError::BadCount { .. })
        ));
        let f = decode_fields("paths=-1");
        assert!(matches!(
            count(&f, "paths", path_key),
            Err(FieldError::BadCount { .. })
        ));
    }

    #[test]
    fn nested_counts() {
        let f = decode_fields(
            "domains=1&domain1=media&domain1classes=2\
             &domain1class1name=default&domain1class1mindevcount=2\
             &domain1class2name=thumbs&domain1class2mindevcount=1",
        );
        let n = count(&f, "domains", |i| format!("domain{i}")).unwrap();
        assert_eq!(n, 1);
        let classes = counted_values(&f, "domain1classes", |j| format!("domain1class{j}name"))
            .unwrap();
        assert_eq!(classes, vec!["default", "thumbs"]);
    }

    #[test]
    fn required_field() {
        let f = decode_fields("fid=42");
        assert_eq!(required(&f, "fid").unwrap(), "42");
        assert_eq!(required(&f, "devid"), Err(FieldError::Missing("devid".into())));
    }
}
