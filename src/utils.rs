use chrono::{DateTime, SubsecRound, Utc};
use lazy_regex::regex;
use sqlx::SqlitePool;

/// Current time truncated to milliseconds, so values survive a trip through
/// JSON and SQLite unchanged.
pub(crate) fn get_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn collapse_whitespace(s: &str) -> String {
    regex!(r"\s+").replace_all(s, " ").trim().to_string()
}

pub(crate) async fn is_table_exists(
    pool: &SqlitePool,
    table_name: &str,
) -> Result<bool, sqlx::Error> {
    Ok(
        sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?
            .is_some(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_newlines_and_tabs() {
        assert_eq!(
            collapse_whitespace("  Software\n\t Engineer   II "),
            "Software Engineer II"
        );
        assert_eq!(collapse_whitespace(" \n "), "");
    }
}
