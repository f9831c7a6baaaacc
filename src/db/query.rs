//! Filtered, sorted, paginated episode queries.
//!
//! The page query and the count query share one predicate builder so the
//! reported total always matches the rows a caller can page through.

use crate::filter::NormalizedFilter;
use crate::status::DownloadStatus;
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::items::ITEM_COLUMNS;
use super::{Database, Item};

impl Database {
    /// One page of items matching `filter`, plus the total number of matches
    pub async fn query_items(&self, filter: &NormalizedFilter) -> Result<(Vec<Item>, i64)> {
        let mut page: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items"));
        push_predicates(&mut page, filter);
        page.push(" ORDER BY ");
        page.push(filter.sort.order_by());
        page.push(" LIMIT ");
        page.push_bind(filter.page_size);
        page.push(" OFFSET ");
        page.push_bind(filter.offset());

        let items = page
            .build_query_as::<Item>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to query items", e))?;

        let total = self.count_items(filter).await?;

        Ok((items, total))
    }

    /// Number of items matching `filter`, ignoring page and sort
    pub async fn count_items(&self, filter: &NormalizedFilter) -> Result<i64> {
        let mut count: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM items");
        push_predicates(&mut count, filter);

        count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::from_sqlx("Failed to count items", e))
    }
}

fn push_predicates<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a NormalizedFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(query) = &filter.query {
        let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
        builder
            .push(" AND search_text LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\'");
    }

    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }

    match filter.downloaded {
        Some(true) => {
            builder.push(" AND status = ").push_bind(DownloadStatus::Downloaded);
        }
        Some(false) => {
            builder.push(" AND status != ").push_bind(DownloadStatus::Downloaded);
        }
        None => {}
    }

    if let Some(played) = filter.played {
        builder.push(" AND played = ").push_bind(played);
    }

    if !filter.feed_ids.is_empty() {
        builder.push(" AND feed_id IN (");
        let mut ids = builder.separated(", ");
        for id in &filter.feed_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
    }

    if !filter.tag_ids.is_empty() {
        builder.push(" AND feed_id IN (SELECT feed_id FROM feed_tags WHERE tag_id IN (");
        let mut ids = builder.separated(", ");
        for id in &filter.tag_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated("))");
    }
}

/// Escape LIKE wildcards so the query matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50% off_now"), "50\\% off\\_now");
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }
}
