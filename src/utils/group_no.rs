use chrono::{DateTime, Utc};
use rand::Rng;

/// 生成团号: G + 时间戳(秒) + 6 位随机数
pub fn generate_group_no(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    format!(
        "G{}{:06}",
        now.format("%Y%m%d%H%M%S"),
        rng.gen_range(0..=999_999)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_group_no_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap();
        let no = generate_group_no(now);
        assert_eq!(no.len(), 1 + 14 + 6);
        assert!(no.starts_with("G20250301123005"));
        assert!(no[1..].chars().all(|c| c.is_ascii_digit()));
    }
}
