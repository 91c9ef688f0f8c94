use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

pub(crate) fn format_optional(value: Option<PrimitiveDateTime>) -> Option<String> {
    value.map(format_primitive)
}

/// Whole seconds from `from` until `to`, negative when `to` is in the past.
pub(crate) fn seconds_until(from: PrimitiveDateTime, to: PrimitiveDateTime) -> i64 {
    (to - from).whole_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn format_primitive_outputs_utc_z() {
        let value = datetime!(2025-01-02 10:20:30);
        assert_eq!(format_primitive(value), "2025-01-02T10:20:30Z");
    }

    #[test]
    fn format_optional_skips_missing_values() {
        assert_eq!(format_optional(None), None);
        assert_eq!(
            format_optional(Some(datetime!(2025-03-01 08:00:00))).as_deref(),
            Some("2025-03-01T08:00:00Z")
        );
    }

    #[test]
    fn seconds_until_is_signed() {
        let start = datetime!(2025-01-02 10:00:00);
        assert_eq!(seconds_until(start, datetime!(2025-01-02 10:30:00)), 1800);
        assert_eq!(seconds_until(start, datetime!(2025-01-02 09:59:00)), -60);
    }
}
