// Property-based tests for schedule parsing, secret masking and artifact matching

use chrono::{Datelike, TimeZone, Timelike, Utc};
use common::artifact::ArtifactPattern;
use common::schedule::{normalize_expression, CronTrigger};
use common::secret::{Secret, SecretMasker, MASK};
use proptest::prelude::*;

proptest! {
    /// A five-field expression fires only on its minute, hour and POSIX weekday (0 and 7 are Sunday)
    #[test]
    fn prop_posix_weekday_fields_are_honored(
        minute in 0u32..60,
        hour in 0u32..24,
        day_of_week in 0u32..=7,
    ) {
        let expression = format!("{} {} * * {}", minute, hour, day_of_week);
        let trigger = CronTrigger::new(&expression, chrono_tz::UTC).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let upcoming = trigger.upcoming(start, 5);
        prop_assert_eq!(upcoming.len(), 5);
        for instant in upcoming {
            prop_assert_eq!(instant.minute(), minute);
            prop_assert_eq!(instant.hour(), hour);
            prop_assert_eq!(instant.second(), 0);
            prop_assert_eq!(instant.weekday().num_days_from_sunday(), day_of_week % 7);
        }
    }

    /// Normalization keeps the first four fields and prepends a zero seconds field
    #[test]
    fn prop_normalization_prepends_seconds(
        minute in 0u32..60,
        hour in 0u32..24,
        day in 1u32..=28,
        month in 1u32..=12,
    ) {
        let expression = format!("{} {} {} {} *", minute, hour, day, month);
        let normalized = normalize_expression(&expression).unwrap();
        prop_assert_eq!(normalized, format!("0 {} {} {} {} *", minute, hour, day, month));
    }

    /// Masked text never contains the secret value
    #[test]
    fn prop_masked_output_hides_secret(
        value in "[A-Z0-9]{6,16}",
        prefix in "[a-z :]{0,20}",
        suffix in "[a-z :]{0,20}",
    ) {
        let masker = SecretMasker::new(&[Secret::new("EMAIL_PASSWORD", value.clone())]);
        let text = format!("{}{}{}{}", prefix, value, suffix, value);

        let masked = masker.mask(&text);

        prop_assert!(!masked.contains(&value));
        prop_assert_eq!(masked, format!("{}{}{}{}", prefix, MASK, suffix, MASK));
    }

    /// The report glob matches exactly the Crypto_Report_*.png names
    #[test]
    fn prop_report_pattern_matches_prefix_and_extension(suffix in "[A-Za-z0-9_-]{0,20}") {
        let pattern = ArtifactPattern::new("Crypto_Report_*.png").unwrap();

        let report = format!("Crypto_Report_{}.png", suffix);
        let lowercase = format!("crypto_report_{}.png", suffix);
        let wrong_extension = format!("Crypto_Report_{}.png.bak", suffix);
        let unrelated = format!("summary_{}.png", suffix);
        prop_assert!(pattern.matches(&report));
        prop_assert!(!pattern.matches(&lowercase));
        prop_assert!(!pattern.matches(&wrong_extension));
        prop_assert!(!pattern.matches(&unrelated));
    }
}
