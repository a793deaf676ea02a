use sqlx::MySqlPool;

/// Appends an entry to `activity_logs`. A failed write is logged and swallowed;
/// the request that triggered it has already succeeded.
pub async fn record(
    db: &MySqlPool,
    entity_type: &str,
    entity_id: Option<i64>,
    action: &str,
    description: impl Into<String>,
) {
    let description: String = description.into();
    tracing::info!(entity_type, entity_id, action, "{description}");

    let res = sqlx::query(
        r#"
        INSERT INTO activity_logs (entity_type, entity_id, action, description)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(action)
    .bind(truncate(&description, 500))
    .execute(db)
    .await;

    if let Err(e) = res {
        tracing::warn!(error = %e, entity_type, "failed to write activity log");
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ééé", 2), "éé");
    }
}
